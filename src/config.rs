//! Deduplication settings.
//!
//! [`DedupeConfig`] is constructed once per run and handed to the
//! [`MergeEngine`](crate::merge::MergeEngine); nothing is read from globals.
//! Settings are usually part of the project's JSON settings document:
//!
//! ```
//! use bibmerge::config::{DedupeConfig, SameSourcePolicy};
//!
//! let config = DedupeConfig::from_json(r#"{ "same_source_merges": "prevent" }"#).unwrap();
//! assert_eq!(config.same_source_merges, SameSourcePolicy::Prevent);
//!
//! assert!(DedupeConfig::from_json(r#"{ "same_source_merges": "sometimes" }"#).is_err());
//! ```

use crate::{MergeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// What to do when both records of a pair came from the same search source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SameSourcePolicy {
    /// Merge anyway and log a warning.
    Apply,
    /// Refuse and append the pair to the audit file.
    Prevent,
    /// Ask the configured prompt.
    #[default]
    Ask,
}

impl SameSourcePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSourcePolicy::Apply => "apply",
            SameSourcePolicy::Prevent => "prevent",
            SameSourcePolicy::Ask => "ask",
        }
    }
}

impl FromStr for SameSourcePolicy {
    type Err = MergeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "apply" => Ok(SameSourcePolicy::Apply),
            "prevent" => Ok(SameSourcePolicy::Prevent),
            "ask" => Ok(SameSourcePolicy::Ask),
            other => Err(MergeError::InvalidPolicy(other.to_string())),
        }
    }
}

impl TryFrom<String> for SameSourcePolicy {
    type Error = MergeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SameSourcePolicy> for String {
    fn from(value: SameSourcePolicy) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SameSourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings of the deduplication process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupeConfig {
    pub same_source_merges: SameSourcePolicy,
    /// Refused same-source merges are appended here as `main_id,dupe_id`.
    pub same_source_merge_file: PathBuf,
    /// Minimum score for a candidate pair to count as a duplicate when the
    /// candidate source attaches scores.
    pub merge_threshold: f64,
}

impl Default for DedupeConfig {
    fn default() -> Self {
        Self {
            same_source_merges: SameSourcePolicy::Ask,
            same_source_merge_file: PathBuf::from("same_source_merges.txt"),
            merge_threshold: 0.8,
        }
    }
}

impl DedupeConfig {
    /// Parses the `dedupe` settings object.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvalidPolicy`] for unknown `same_source_merges` values,
    /// [`MergeError::InvalidFormat`] for malformed JSON or out-of-range thresholds.
    pub fn from_json(input: &str) -> Result<Self> {
        let config: DedupeConfig = serde_json::from_str(input).map_err(|err| {
            // serde wraps the `try_from` error; surface the policy error itself
            match serde_json::from_str::<serde_json::Value>(input)
                .ok()
                .and_then(|v| v.get("same_source_merges").cloned())
            {
                Some(serde_json::Value::String(policy)) if policy.parse::<SameSourcePolicy>().is_err() => {
                    MergeError::InvalidPolicy(policy)
                }
                _ => MergeError::InvalidFormat(err.to_string()),
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.merge_threshold) {
            return Err(MergeError::InvalidFormat(format!(
                "merge_threshold must be within [0, 1], got {}",
                self.merge_threshold
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SameSourcePolicy) -> Self {
        self.same_source_merges = policy;
        self
    }

    #[must_use]
    pub fn with_audit_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.same_source_merge_file = path.into();
        self
    }
}
