//! Candidate pairs for the merge engine.
//!
//! Candidate generation is pluggable: an external classifier, a precomputed
//! decision list or the built-in [`similarity`] matcher all produce a stream
//! of [`CandidatePair`]s that [`MergeEngine::apply_merges`] consumes.
//!
//! [`MergeEngine::apply_merges`]: crate::merge::MergeEngine::apply_merges

#[cfg(feature = "similarity")]
pub mod similarity;

use crate::normalize::NormalizedRecord;
use serde::{Deserialize, Serialize};

/// Verdict on a candidate pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Duplicate,
    NoDuplicate,
}

/// Two record IDs with a duplicate verdict and an optional similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub id_a: String,
    pub id_b: String,
    pub decision: Decision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl CandidatePair {
    pub fn duplicate(id_a: impl Into<String>, id_b: impl Into<String>) -> Self {
        Self {
            id_a: id_a.into(),
            id_b: id_b.into(),
            decision: Decision::Duplicate,
            score: None,
        }
    }

    pub fn no_duplicate(id_a: impl Into<String>, id_b: impl Into<String>) -> Self {
        Self {
            decision: Decision::NoDuplicate,
            ..Self::duplicate(id_a, id_b)
        }
    }

    #[must_use]
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    /// Pairs without a score are taken at face value.
    pub fn meets_threshold(&self, threshold: f64) -> bool {
        self.score.is_none_or(|score| score >= threshold)
    }
}

/// Produces candidate pairs from the dedupe-ready records.
pub trait CandidateSource {
    fn candidates<'a>(
        &'a self,
        records: &'a [NormalizedRecord],
    ) -> impl Iterator<Item = CandidatePair> + 'a;
}

/// A precomputed decision list, e.g. the output of an external classifier.
impl CandidateSource for Vec<CandidatePair> {
    fn candidates<'a>(
        &'a self,
        _records: &'a [NormalizedRecord],
    ) -> impl Iterator<Item = CandidatePair> + 'a {
        self.iter().cloned()
    }
}
