//! Bibliographic record model.
//!
//! A [`Record`] is what the record store holds: a handful of typed bookkeeping
//! fields (`ID`, `ENTRYTYPE`, `colrev_origin`, `colrev_status`, provenance) and
//! an open map of bibliographic fields such as `title`, `author` or `journal`.

pub mod origin;
pub mod state;

pub use origin::Origin;
pub use state::RecordState;

use crate::normalize::is_missing;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Provenance key marking a record (or a field source) as curated.
pub const CURATED: &str = "CURATED";

/// Records keyed by ID. Keys and `Record::id` always agree.
pub type RecordMap = BTreeMap<String, Record>;

/// Publication kind (`ENTRYTYPE`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EntryType {
    Article,
    Inproceedings,
    Inbook,
    Incollection,
    Book,
    Proceedings,
    Phdthesis,
    Mastersthesis,
    Techreport,
    Misc,
    Unpublished,
    /// Any kind not listed above, kept verbatim (lowercased).
    Other(String),
}

impl EntryType {
    pub fn as_str(&self) -> &str {
        match self {
            EntryType::Article => "article",
            EntryType::Inproceedings => "inproceedings",
            EntryType::Inbook => "inbook",
            EntryType::Incollection => "incollection",
            EntryType::Book => "book",
            EntryType::Proceedings => "proceedings",
            EntryType::Phdthesis => "phdthesis",
            EntryType::Mastersthesis => "mastersthesis",
            EntryType::Techreport => "techreport",
            EntryType::Misc => "misc",
            EntryType::Unpublished => "unpublished",
            EntryType::Other(kind) => kind,
        }
    }

    /// Containers are not citable works and never merge with anything.
    pub fn is_container(&self) -> bool {
        matches!(self, EntryType::Proceedings)
    }
}

impl From<&str> for EntryType {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "article" => EntryType::Article,
            "inproceedings" | "conference" => EntryType::Inproceedings,
            "inbook" => EntryType::Inbook,
            "incollection" => EntryType::Incollection,
            "book" => EntryType::Book,
            "proceedings" => EntryType::Proceedings,
            "phdthesis" => EntryType::Phdthesis,
            "mastersthesis" => EntryType::Mastersthesis,
            "techreport" => EntryType::Techreport,
            "misc" => EntryType::Misc,
            "unpublished" => EntryType::Unpublished,
            other => EntryType::Other(other.to_string()),
        }
    }
}

impl From<String> for EntryType {
    fn from(value: String) -> Self {
        EntryType::from(value.as_str())
    }
}

impl From<EntryType> for String {
    fn from(value: EntryType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the value of a masterdata field came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    #[serde(default)]
    pub note: String,
}

impl Provenance {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            note: String::new(),
        }
    }

    pub fn is_curated(&self) -> bool {
        self.source.starts_with(CURATED)
    }
}

/// A single bibliographic record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ENTRYTYPE")]
    pub entry_type: EntryType,
    #[serde(default)]
    pub colrev_origin: Origin,
    pub colrev_status: RecordState,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub colrev_masterdata_provenance: BTreeMap<String, Provenance>,
    /// IDs the operator declared as distinct publications.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub manual_non_duplicate: BTreeSet<String>,
    /// IDs of the records merged into this one.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub colrev_merged_ids: BTreeSet<String>,
    /// Bibliographic fields (`title`, `author`, `journal`, ...).
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        entry_type: impl Into<EntryType>,
        colrev_status: RecordState,
        colrev_origin: impl Into<Origin>,
    ) -> Self {
        Self {
            id: id.into(),
            entry_type: entry_type.into(),
            colrev_origin: colrev_origin.into(),
            colrev_status,
            colrev_masterdata_provenance: BTreeMap::new(),
            manual_non_duplicate: BTreeSet::new(),
            colrev_merged_ids: BTreeSet::new(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_field(mut self, key: &str, value: &str) -> Self {
        self.set_field(key, value);
        self
    }

    #[must_use]
    pub fn with_provenance(mut self, key: &str, provenance: Provenance) -> Self {
        self.colrev_masterdata_provenance
            .insert(key.to_string(), provenance);
        self
    }

    /// Marks the whole record as curated by `source`.
    #[must_use]
    pub fn curated_by(self, source: &str) -> Self {
        self.with_provenance(CURATED, Provenance::new(source))
    }

    pub fn set_field(&mut self, key: &str, value: &str) {
        self.fields.insert(key.to_string(), value.to_string());
    }

    /// A field's value, treating empty strings and missing-value sentinels as absent.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !is_missing(v))
    }

    pub fn masterdata_is_curated(&self) -> bool {
        self.colrev_masterdata_provenance.contains_key(CURATED)
    }

    pub fn field_is_curated(&self, key: &str) -> bool {
        self.masterdata_is_curated()
            || self
                .colrev_masterdata_provenance
                .get(key)
                .is_some_and(Provenance::is_curated)
    }

    /// Whether this record is a dedupe candidate at all.
    pub fn is_dedupe_candidate(&self) -> bool {
        self.colrev_status.is_merge_eligible()
            && !(self.colrev_status == RecordState::RevPrescreenExcluded
                && self.field("prescreen_exclusion") == Some("script:non_latin_alphabet"))
    }

    /// Short human-readable citation used in log lines and prompts.
    pub fn format_bib_style(&self) -> String {
        format!(
            "{} ({}) {}. {}",
            self.field("author").unwrap_or("-"),
            self.field("year").unwrap_or("-"),
            self.field("title").unwrap_or("-"),
            self.field("journal")
                .or_else(|| self.field("booktitle"))
                .unwrap_or("-"),
        )
    }
}

/// Capability needed by the resolver and the merge applier.
pub trait Mergeable {
    fn id(&self) -> &str;
    fn status(&self) -> RecordState;
    fn entry_type(&self) -> &EntryType;
    fn origin(&self) -> &Origin;
    fn masterdata_is_curated(&self) -> bool;
    /// Whether the operator has declared `other` as a distinct publication.
    fn declared_distinct_from(&self, other: &str) -> bool;
    /// One-line description for prompts and logs.
    fn describe(&self) -> String;
    /// Absorbs `dupe` into `self`.
    fn merge_from(&mut self, dupe: &Self)
    where
        Self: Sized;
}

impl Mergeable for Record {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> RecordState {
        self.colrev_status
    }

    fn entry_type(&self) -> &EntryType {
        &self.entry_type
    }

    fn origin(&self) -> &Origin {
        &self.colrev_origin
    }

    fn masterdata_is_curated(&self) -> bool {
        Record::masterdata_is_curated(self)
    }

    fn declared_distinct_from(&self, other: &str) -> bool {
        self.manual_non_duplicate.contains(other)
    }

    fn describe(&self) -> String {
        format!("{}: {}", self.id, self.format_bib_style())
    }

    /// Field-level merge.
    ///
    /// A dupe field is taken when the main record lacks it, or when the dupe's
    /// value is curated and the main's is not. Curated main fields are never
    /// overwritten. Origins are unioned and the dupe's ID is remembered in
    /// `colrev_merged_ids`.
    fn merge_from(&mut self, dupe: &Record) {
        for (key, value) in &dupe.fields {
            if is_missing(value) {
                continue;
            }
            let take = match self.field(key) {
                None => true,
                Some(_) if self.field_is_curated(key) => false,
                Some(current) => current != value && dupe.field_is_curated(key),
            };
            if !take {
                continue;
            }
            self.fields.insert(key.clone(), value.clone());
            if let Some(provenance) = dupe.colrev_masterdata_provenance.get(key) {
                self.colrev_masterdata_provenance
                    .insert(key.clone(), provenance.clone());
            } else if let Some(curation) = dupe.colrev_masterdata_provenance.get(CURATED) {
                self.colrev_masterdata_provenance.insert(
                    key.clone(),
                    Provenance::new(format!("{CURATED}:{}", curation.source)),
                );
            } else {
                self.colrev_masterdata_provenance.remove(key);
            }
        }

        self.colrev_origin.absorb(&dupe.colrev_origin);
        self.manual_non_duplicate.extend(
            dupe.manual_non_duplicate
                .iter()
                .filter(|id| **id != self.id)
                .cloned(),
        );
        if dupe.id != self.id {
            self.colrev_merged_ids.insert(dupe.id.clone());
        }
        self.colrev_merged_ids.extend(
            dupe.colrev_merged_ids
                .iter()
                .filter(|id| **id != self.id)
                .cloned(),
        );
    }
}

/// Why a lookup by ID came back empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundReason {
    /// No record with this ID exists in the searched collection.
    Missing(String),
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundReason::Missing(id) => write!(f, "no record with ID {id}"),
        }
    }
}

/// Looks up a record by ID.
pub fn lookup<'a>(records: &'a RecordMap, id: &str) -> Result<&'a Record, NotFoundReason> {
    records
        .get(id)
        .ok_or_else(|| NotFoundReason::Missing(id.to_string()))
}
