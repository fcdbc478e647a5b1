//! Cross-source identity keys (`colrev_id`).
//!
//! A colrev_id is a deterministic fingerprint of the masterdata that identifies
//! a publication independently of the search source it came from:
//!
//! ```text
//! colrev_id1:|a|mis-quarterly|44|2|2020|smith-doe|a-study-of-things
//!            kind venue      vol num year authors title
//! ```
//!
//! Two records with the same key are the same publication, which makes the key
//! the exact-match fast path in front of fuzzy similarity. Building a key needs
//! a title and at least one of author, year or venue.

use crate::normalize::convert_unicode_string;
use crate::record::{EntryType, Record, RecordMap};
use crate::{MergeError, Result};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

pub const KEY_PREFIX: &str = "colrev_id1:";

/// Placeholder for key parts without data.
const EMPTY_PART: &str = "-";

/// A colrev_id, or the `NA` sentinel for records with too little data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub enum IdentityKey {
    Key(String),
    NotAvailable,
}

impl IdentityKey {
    pub fn as_key(&self) -> Option<&str> {
        match self {
            IdentityKey::Key(key) => Some(key),
            IdentityKey::NotAvailable => None,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_key().unwrap_or("NA"))
    }
}

impl From<IdentityKey> for String {
    fn from(value: IdentityKey) -> Self {
        value.to_string()
    }
}

/// Builds the colrev_id of a record.
///
/// # Errors
///
/// Returns [`MergeError::InsufficientData`] when the title is missing, or when
/// none of author, year and venue is present.
pub fn create_identity_key(record: &Record) -> Result<String> {
    let title = work_title(record);
    let authors = record.field("author").map(author_part).filter(|a| a != EMPTY_PART);
    let year = record.field("year");
    let venue = venue(record);

    let mut missing = Vec::new();
    if title.is_none() {
        missing.push("title");
    }
    if authors.is_none() && year.is_none() && venue.is_none() {
        missing.extend(["author", "year", "venue"]);
    }
    if !missing.is_empty() {
        return Err(MergeError::InsufficientData {
            id: record.id.clone(),
            missing: missing.join(", "),
        });
    }

    let parts = [
        kind_part(&record.entry_type),
        venue.map_or_else(|| EMPTY_PART.to_string(), key_part),
        record.field("volume").map_or_else(|| EMPTY_PART.to_string(), key_part),
        record.field("number").map_or_else(|| EMPTY_PART.to_string(), key_part),
        year.map_or_else(|| EMPTY_PART.to_string(), key_part),
        authors.unwrap_or_else(|| EMPTY_PART.to_string()),
        title.map_or_else(|| EMPTY_PART.to_string(), key_part),
    ];

    Ok(format!("{KEY_PREFIX}|{}", parts.iter().join("|")))
}

/// Bulk variant: records without enough data get [`IdentityKey::NotAvailable`].
pub fn identity_key_or_na(record: &Record) -> IdentityKey {
    match create_identity_key(record) {
        Ok(key) => IdentityKey::Key(key),
        Err(err) => {
            tracing::debug!(record = %record.id, error = %err, "no colrev_id");
            IdentityKey::NotAvailable
        }
    }
}

fn kind_part(entry_type: &EntryType) -> String {
    match entry_type {
        EntryType::Article => "a".to_string(),
        EntryType::Inproceedings => "p".to_string(),
        EntryType::Book => "b".to_string(),
        other => other.as_str().to_string(),
    }
}

/// The addressable title: for `inbook` entries that is the chapter.
fn work_title(record: &Record) -> Option<&str> {
    match record.entry_type {
        EntryType::Inbook => record.field("chapter").or_else(|| record.field("title")),
        _ => record.field("title"),
    }
}

fn venue(record: &Record) -> Option<&str> {
    match record.entry_type {
        EntryType::Article => record.field("journal"),
        EntryType::Inproceedings | EntryType::Incollection => record.field("booktitle"),
        EntryType::Inbook => match record.field("chapter") {
            Some(_) => record.field("booktitle").or_else(|| record.field("title")),
            None => record.field("booktitle"),
        },
        EntryType::Phdthesis | EntryType::Mastersthesis => record.field("school"),
        EntryType::Techreport => record.field("institution"),
        _ => record
            .field("journal")
            .or_else(|| record.field("booktitle"))
            .or_else(|| record.field("series"))
            .or_else(|| record.field("publisher")),
    }
}

/// Lowercased words joined by `-`, punctuation removed.
fn key_part(value: &str) -> String {
    let cleaned: String = convert_unicode_string(value)
        .to_lowercase()
        .chars()
        .map(|c| if c == '-' || c == '/' { ' ' } else { c })
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let joined = cleaned.split_whitespace().join("-");
    if joined.is_empty() {
        EMPTY_PART.to_string()
    } else {
        joined
    }
}

/// Family names of a BibTeX author list, joined by `-`.
fn author_part(authors: &str) -> String {
    let names = authors
        .split(" and ")
        .map(family_name)
        .map(key_part)
        .filter(|n| n != EMPTY_PART)
        .join("-");
    if names.is_empty() {
        EMPTY_PART.to_string()
    } else {
        names
    }
}

/// The family name of one author.
///
/// `"Smith, John"` is family-first. Without a comma the name is read as
/// `"John Smith"`, except when it ends in initials (`"Smith JJ"`, `"Smith J."`),
/// as in PubMed-style exports.
fn family_name(name: &str) -> &str {
    let name = name.trim();
    if let Some((family, _)) = name.split_once(',') {
        return family.trim();
    }
    let words = name.split_whitespace().collect_vec();
    match words.as_slice() {
        [] => "",
        [first, .., last] if is_initials(last) => *first,
        [.., last] => *last,
    }
}

fn is_initials(word: &str) -> bool {
    let letters = word.chars().filter(|c| *c != '.' && *c != '-').collect_vec();
    !letters.is_empty() && letters.len() <= 3 && letters.iter().all(|c| c.is_uppercase())
}

/// colrev_id → record IDs, for matching externally retrieved records against
/// the store before falling back to similarity.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    keys: HashMap<String, Vec<String>>,
}

impl IdentityIndex {
    pub fn from_records(records: &RecordMap) -> Self {
        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for record in records.values() {
            if let IdentityKey::Key(key) = identity_key_or_na(record) {
                keys.entry(key).or_default().push(record.id.clone());
            }
        }
        Self { keys }
    }

    /// IDs of all stored records sharing this key.
    pub fn matches(&self, key: &str) -> &[String] {
        self.keys.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The ID of the single stored record matching `record`, if exactly one does.
    pub fn find(&self, record: &Record) -> Option<&str> {
        let key = create_identity_key(record).ok()?;
        match self.matches(&key) {
            [id] => Some(id.as_str()),
            _ => None,
        }
    }

    /// Groups of stored IDs that share a key.
    pub fn collisions(&self) -> impl Iterator<Item = &[String]> {
        self.keys
            .values()
            .filter(|ids| ids.len() > 1)
            .map(Vec::as_slice)
    }
}
