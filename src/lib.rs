//! Record identity and duplicate merging for literature review record stores.
//!
//! `bibmerge` takes bibliographic records that were imported from several
//! search sources and merges the ones describing the same publication, while
//! keeping track of every source record that contributed (`colrev_origin`).
//!
//! # Key Features
//!
//! - **Identity keys**: deterministic `colrev_id` fingerprints for exact
//!   cross-source matching ([`identity`])
//! - **Normalization**: comparison views of records for similarity matching
//!   ([`normalize`])
//! - **Candidate generation**: a pluggable contract plus a built-in
//!   similarity matcher ([`candidates`])
//! - **Safe merging**: a priority policy for choosing the surviving record,
//!   cross-level and same-source merge guards, curated-field protection and
//!   batch closure over chained merges ([`resolve`], [`merge`])
//! - **Corrections**: undoing merges from the previous snapshot and applying
//!   operator merges ([`correction`])
//!
//! # Basic Usage
//!
//! ```rust
//! use bibmerge::config::{DedupeConfig, SameSourcePolicy};
//! use bibmerge::merge::MergeEngine;
//! use bibmerge::store::{MemoryStore, RecordStore};
//! use bibmerge::{CandidatePair, Record, RecordState};
//!
//! let store = MemoryStore::from_records([
//!     Record::new("R1", "article", RecordState::MdPrepared, "src1/1")
//!         .with_field("journal", "MISQ")
//!         .with_field("year", "2020"),
//!     Record::new("R2", "article", RecordState::MdPrepared, "src2/1")
//!         .with_field("journal", "MIS Quarterly")
//!         .with_field("year", "2020"),
//! ]);
//!
//! let config = DedupeConfig::default().with_policy(SameSourcePolicy::Prevent);
//! let engine = MergeEngine::new(config);
//! let report = engine
//!     .apply_merges(&store, [CandidatePair::duplicate("R1", "R2")], false)
//!     .unwrap();
//!
//! assert_eq!(report.merged.len(), 1);
//! let records = store.load_all().unwrap();
//! assert_eq!(records["R1"].colrev_origin.to_string(), "src1/1;src2/1");
//! assert!(!records.contains_key("R2"));
//! ```
//!
//! # Error Handling
//!
//! Fallible operations return [`Result`], which wraps [`MergeError`].
//! Data-quality problems (too little data for a colrev_id, disallowed pairs,
//! clusters that cannot be restored) are collected in reports and never abort
//! a batch; persistence and configuration problems are returned as errors.

use thiserror::Error;

pub mod audit;
pub mod candidates;
pub mod closure;
pub mod config;
pub mod correction;
pub mod identity;
pub mod merge;
pub mod normalize;
pub mod record;
pub mod resolve;
pub mod store;

mod regex;

// Reexports
pub use candidates::{CandidatePair, Decision};
pub use config::{DedupeConfig, SameSourcePolicy};
pub use merge::{MergeEngine, MergeReport};
pub use record::{EntryType, Origin, Record, RecordMap, RecordState};
pub use resolve::{DisallowedReason, MergeResolver};

/// A specialized Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Errors raised by the identity and merge engine.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Insufficient data to identify {id}: missing {missing}")]
    InsufficientData { id: String, missing: String },

    #[error("Merge of {dupe} into {main} disallowed: {reason}")]
    DisallowedMerge {
        main: String,
        dupe: String,
        reason: DisallowedReason,
    },

    #[error("Cannot restore {}: missing from the previous snapshot: {}", .ids.join(","), .missing.join(","))]
    RestoreImpossible { ids: Vec<String>, missing: Vec<String> },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Invalid same_source_merges setting: {0} (expected apply, prevent or ask)")]
    InvalidPolicy(String),

    #[error("No previous snapshot available: {0}")]
    SnapshotUnavailable(String),

    #[error("Unknown record: {0}")]
    UnknownRecord(String),

    #[error("Parse error: {0}")]
    InvalidFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(feature = "csv")]
impl From<csv::Error> for MergeError {
    fn from(err: csv::Error) -> Self {
        MergeError::InvalidFormat(err.to_string())
    }
}
