//! Processing states of a record.
//!
//! States are declared in process order, so the derived `Ord` answers
//! questions like "has this record been prepared yet?".

use crate::MergeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The `colrev_status` of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    MdRetrieved,
    MdImported,
    MdNeedsManualPreparation,
    /// Metadata cleaned, waiting for deduplication.
    MdPrepared,
    /// Deduplicated.
    MdProcessed,
    RevPrescreenExcluded,
    RevPrescreenIncluded,
    PdfNeedsManualRetrieval,
    PdfImported,
    PdfNotAvailable,
    PdfNeedsManualPreparation,
    PdfPrepared,
    RevExcluded,
    RevIncluded,
    RevSynthesized,
}

impl RecordState {
    const ALL: [RecordState; 15] = [
        RecordState::MdRetrieved,
        RecordState::MdImported,
        RecordState::MdNeedsManualPreparation,
        RecordState::MdPrepared,
        RecordState::MdProcessed,
        RecordState::RevPrescreenExcluded,
        RecordState::RevPrescreenIncluded,
        RecordState::PdfNeedsManualRetrieval,
        RecordState::PdfImported,
        RecordState::PdfNotAvailable,
        RecordState::PdfNeedsManualPreparation,
        RecordState::PdfPrepared,
        RecordState::RevExcluded,
        RecordState::RevIncluded,
        RecordState::RevSynthesized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::MdRetrieved => "md_retrieved",
            RecordState::MdImported => "md_imported",
            RecordState::MdNeedsManualPreparation => "md_needs_manual_preparation",
            RecordState::MdPrepared => "md_prepared",
            RecordState::MdProcessed => "md_processed",
            RecordState::RevPrescreenExcluded => "rev_prescreen_excluded",
            RecordState::RevPrescreenIncluded => "rev_prescreen_included",
            RecordState::PdfNeedsManualRetrieval => "pdf_needs_manual_retrieval",
            RecordState::PdfImported => "pdf_imported",
            RecordState::PdfNotAvailable => "pdf_not_available",
            RecordState::PdfNeedsManualPreparation => "pdf_needs_manual_preparation",
            RecordState::PdfPrepared => "pdf_prepared",
            RecordState::RevExcluded => "rev_excluded",
            RecordState::RevIncluded => "rev_included",
            RecordState::RevSynthesized => "rev_synthesized",
        }
    }

    /// Whether a record in this state may take part in merges.
    pub fn is_merge_eligible(&self) -> bool {
        *self >= RecordState::MdPrepared
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordState {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .find(|state| state.as_str() == s)
            .copied()
            .ok_or_else(|| MergeError::InvalidFormat(format!("unknown colrev_status '{s}'")))
    }
}
