//! Field normalization for duplicate comparison.
//!
//! [`normalize`] turns a stored [`Record`] into a [`NormalizedRecord`]: a
//! lowercased, punctuation-free copy of the fields that candidate generators
//! compare (author, title, venue, year, volume, number, pages). The stored
//! record keeps its display-quality values.
//!
//! ```
//! use bibmerge::normalize::normalize;
//! use bibmerge::{Record, RecordState};
//!
//! let record = Record::new("Smith2020", "article", RecordState::MdPrepared, "src1/1")
//!     .with_field("title", "Machine Learning! (2<sup>nd</sup> Edition)")
//!     .with_field("journal", "MIS Quarterly")
//!     .with_field("volume", "no volume");
//!
//! let normalized = normalize(&record);
//! assert_eq!(normalized.title.as_deref(), Some("machine learning 2nd edition"));
//! assert_eq!(normalized.container_title.as_deref(), Some("mis quarterly"));
//! assert_eq!(normalized.volume, None);
//! ```

use crate::identity::{IdentityKey, identity_key_or_na};
use crate::record::{EntryType, Origin, Record, RecordMap, RecordState};
use crate::regex::{Captures, Regex};
use serde::Serialize;
use std::sync::LazyLock;

/// Author strings are cut to this many characters before comparison.
pub const AUTHOR_PREFIX_LEN: usize = 60;

const MISSING_VALUE_SENTINELS: [&str; 5] = ["no issue", "no volume", "no pages", "no author", "nan"];

static UNICODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<U\+([0-9A-Fa-f]+)>").unwrap());

static NOISE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9, ]+").unwrap());

static WHITESPACE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MARKUP_REPLACEMENTS: [(&str, &str); 11] = [
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("<sup>", ""),
    ("</sup>", ""),
    ("<sub>", ""),
    ("</sub>", ""),
    ("<inf>", ""),
    ("</inf>", ""),
    ("α", "a"),
    ("ß", "b"),
    ("γ", "g"),
];

/// Comparison view of a record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub entry_type: EntryType,
    pub status: RecordState,
    pub origin: Origin,
    pub colrev_id: IdentityKey,
    pub author: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub journal: Option<String>,
    /// Journal, booktitle and series concatenated: the venue regardless of entry type.
    pub container_title: Option<String>,
    pub volume: Option<String>,
    pub number: Option<String>,
    pub pages: Option<String>,
}

/// Whether a raw value means "no data".
pub fn is_missing(value: &str) -> bool {
    let value = value.trim();
    value.is_empty()
        || MISSING_VALUE_SENTINELS
            .iter()
            .any(|s| value.eq_ignore_ascii_case(s))
}

/// Builds the comparison view of a record.
pub fn normalize(record: &Record) -> NormalizedRecord {
    let author = record
        .field("author")
        .map(|a| a.chars().take(AUTHOR_PREFIX_LEN).collect::<String>())
        .and_then(|a| normalize_text(&a));

    let journal = record.field("journal").and_then(normalize_venue);

    let (title, container_title) = if record.entry_type == EntryType::Inbook {
        (
            record.field("chapter").and_then(normalize_text),
            record.field("title").and_then(normalize_venue),
        )
    } else {
        let container: String = [
            journal.as_deref(),
            record.field("booktitle").and_then(normalize_venue).as_deref(),
            record.field("series").and_then(normalize_venue).as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect();
        (
            record.field("title").and_then(normalize_text),
            Some(container).filter(|c| !c.is_empty()),
        )
    };

    NormalizedRecord {
        id: record.id.clone(),
        entry_type: record.entry_type.clone(),
        status: record.colrev_status,
        origin: record.colrev_origin.clone(),
        colrev_id: identity_key_or_na(record),
        author,
        title,
        year: record.field("year").and_then(preprocess),
        journal,
        container_title,
        volume: record.field("volume").and_then(preprocess).map(|v| {
            let numeric = normalize_volume(&v);
            if numeric.is_empty() { v } else { numeric }
        }),
        number: record.field("number").and_then(preprocess),
        pages: record
            .field("pages")
            .and_then(preprocess)
            .map(|p| format_page_numbers(&p.replace("--", "-").replace(' ', ""))),
    }
}

/// Normalized views of every record that may take part in deduplication.
pub fn dedupe_ready(records: &RecordMap) -> Vec<NormalizedRecord> {
    records
        .values()
        .filter(|r| r.is_dedupe_candidate())
        .map(normalize)
        .collect()
}

/// Collapses whitespace, strips surrounding quotes and lowercases.
/// Sentinels and empty results become `None`.
fn preprocess(value: &str) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    let collapsed = WHITESPACE_REGEX.replace_all(value, " ");
    let cleaned = collapsed
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_lowercase();
    if is_missing(&cleaned) {
        None
    } else {
        Some(cleaned)
    }
}

/// Titles and authors: markup removed, punctuation runs replaced by a space.
fn normalize_text(value: &str) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    let mut text = convert_unicode_string(value).to_lowercase();
    for (from, to) in MARKUP_REPLACEMENTS {
        text = text.replace(from, to);
    }
    preprocess(&NOISE_REGEX.replace_all(&text, " "))
}

/// Venue names: punctuation dropped entirely.
fn normalize_venue(value: &str) -> Option<String> {
    if is_missing(value) {
        return None;
    }
    preprocess(&NOISE_REGEX.replace_all(&value.to_lowercase(), ""))
}

/// Decodes `<U+XXXX>` escapes left behind by some database exports.
pub(crate) fn convert_unicode_string(input: &str) -> String {
    UNICODE_REGEX
        .replace_all(input, |caps: &Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

/// First run of digits in a volume string (`"61 (Supplement 1)"` → `"61"`).
fn normalize_volume(volume: &str) -> String {
    volume
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect()
}

/// Completes abbreviated page ranges (`"1234-45"` → `"1234-1245"`).
fn format_page_numbers(page_range: &str) -> String {
    let Some((from, to)) = page_range.split_once('-') else {
        return page_range.to_string();
    };
    if to.contains('-') {
        return page_range.to_string();
    }

    let (from_prefix, from_num) = split_prefix_and_number(from);
    let (to_prefix, to_num) = split_prefix_and_number(to);

    if from_prefix != to_prefix && !from_prefix.is_empty() && !to_prefix.is_empty() {
        return page_range.to_string();
    }
    let (Some(from_num), Some(to_num)) = (from_num, to_num) else {
        return page_range.to_string();
    };
    if !is_ascii_number(from_num) || !is_ascii_number(to_num) {
        return page_range.to_string();
    }

    let completed_to = if to_num.len() < from_num.len() {
        format!("{}{}", &from_num[..from_num.len() - to_num.len()], to_num)
    } else {
        to_num.to_string()
    };

    if from_num == completed_to {
        return format!("{from_prefix}{from_num}");
    }
    format!("{from_prefix}{from_num}-{from_prefix}{completed_to}")
}

fn is_ascii_number(input: &str) -> bool {
    input.bytes().all(|b| b.is_ascii_digit())
}

fn split_prefix_and_number(input: &str) -> (&str, Option<&str>) {
    match input.find(|c: char| c.is_ascii_digit()) {
        Some(index) => (&input[..index], Some(&input[index..])),
        None => (input, None),
    }
}
