//! Provenance trail of a record (`colrev_origin`).
//!
//! Each token has the form `{source_name}/{source_record_id}`. Tokens are held
//! in a sorted set, so a merged record lists its origins in the same order no
//! matter which side of the merge it was.

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The set of source tokens that contributed to a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Origin {
    tokens: BTreeSet<String>,
}

impl Origin {
    /// Parses a semicolon-joined origin string. Empty tokens are ignored.
    pub fn parse(input: &str) -> Self {
        Self {
            tokens: input
                .split(';')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
        }
    }

    pub fn single(token: impl Into<String>) -> Self {
        Self {
            tokens: BTreeSet::from([token.into()]),
        }
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Source names (the part before the first `/`) of all tokens.
    pub fn source_names(&self) -> BTreeSet<&str> {
        self.tokens.iter().map(|t| source_name(t)).collect()
    }

    /// Source names shared with another origin.
    pub fn shared_sources<'a>(&'a self, other: &'a Origin) -> BTreeSet<&'a str> {
        let theirs = other.source_names();
        self.source_names()
            .into_iter()
            .filter(|s| theirs.contains(s))
            .collect()
    }

    /// Adds every token of `other`. No token is ever removed.
    pub fn absorb(&mut self, other: &Origin) {
        self.tokens.extend(other.tokens.iter().cloned());
    }

    /// Sources contributing more than one token, with the record ids they contributed.
    pub fn duplicated_sources(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut by_source: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for token in &self.tokens {
            let (source, id) = token.split_once('/').unwrap_or((token.as_str(), ""));
            by_source.entry(source).or_default().push(id);
        }
        by_source.retain(|_, ids| ids.len() > 1);
        by_source
    }
}

fn source_name(token: &str) -> &str {
    token.split('/').next().unwrap_or(token)
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.iter().join(";"))
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        Origin::parse(&value)
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        Origin::parse(value)
    }
}

impl From<Origin> for String {
    fn from(value: Origin) -> Self {
        value.to_string()
    }
}
