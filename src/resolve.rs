//! Merge decision resolver.
//!
//! For a pair of records that were found to be duplicates, the resolver
//! decides which one survives (the *main* record) and which one is absorbed
//! (the *dupe*), and whether the merge is allowed at all.
//!
//! ## Priority policy
//!
//! The survivor is chosen by a table of [`PriorityRule`]s; the first rule that
//! applies decides:
//!
//! 1. Same status: the record whose ID does not end in a digit is main;
//!    otherwise the lexicographically smaller ID.
//! 2. Exactly one record is `md_prepared`: it becomes the dupe.
//! 3. Exactly one record is `md_processed`: it stays main.
//! 4. The curated record is main; with neither or both curated, rule 1's ordering.
//!
//! ## Disallowed merges
//!
//! - entries of type `proceedings` never merge (cross-level merge)
//! - records the operator declared distinct never merge
//! - records sharing a search source merge only as the
//!   [`SameSourcePolicy`] allows

use crate::config::SameSourcePolicy;
use crate::record::{EntryType, Mergeable, RecordState};
use itertools::Itertools;
use std::fmt;
use std::io::{BufRead, Write};

/// Why a pair was not merged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisallowedReason {
    /// One side is a container entry such as `proceedings`.
    CrossLevel { entry_type: EntryType },
    /// Both records share at least one search source and the policy refused.
    SameSource { sources: Vec<String> },
    /// The operator declared the records distinct.
    DeclaredDistinct,
    /// A record has not reached `md_prepared` yet.
    Ineligible { id: String, status: RecordState },
}

impl DisallowedReason {
    pub fn is_same_source(&self) -> bool {
        matches!(self, DisallowedReason::SameSource { .. })
    }
}

impl fmt::Display for DisallowedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisallowedReason::CrossLevel { entry_type } => {
                write!(f, "cross-level merge with a {entry_type} entry")
            }
            DisallowedReason::SameSource { sources } => {
                write!(f, "same-source merge ({})", sources.join(", "))
            }
            DisallowedReason::DeclaredDistinct => f.write_str("records declared as non-duplicates"),
            DisallowedReason::Ineligible { id, status } => {
                write!(f, "{id} is {status} and not yet prepared")
            }
        }
    }
}

/// One row of the priority policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityRule {
    SameStatusCanonicalId,
    PreparedIsDupe,
    ProcessedIsMain,
    CuratedIsMain,
}

/// The default policy table.
pub const DEFAULT_PRIORITY: [PriorityRule; 4] = [
    PriorityRule::SameStatusCanonicalId,
    PriorityRule::PreparedIsDupe,
    PriorityRule::ProcessedIsMain,
    PriorityRule::CuratedIsMain,
];

impl PriorityRule {
    /// `Some(true)` if `a` should be main, `Some(false)` if `b`, `None` if the
    /// rule does not apply.
    pub fn decide<R: Mergeable + ?Sized>(&self, a: &R, b: &R) -> Option<bool> {
        match self {
            PriorityRule::SameStatusCanonicalId => {
                (a.status() == b.status()).then(|| canonical_first(a.id(), b.id()))
            }
            PriorityRule::PreparedIsDupe => exactly_one(
                a.status() == RecordState::MdPrepared,
                b.status() == RecordState::MdPrepared,
            )
            .map(|a_prepared| !a_prepared),
            PriorityRule::ProcessedIsMain => exactly_one(
                a.status() == RecordState::MdProcessed,
                b.status() == RecordState::MdProcessed,
            ),
            PriorityRule::CuratedIsMain => Some(
                exactly_one(a.masterdata_is_curated(), b.masterdata_is_curated())
                    .unwrap_or_else(|| canonical_first(a.id(), b.id())),
            ),
        }
    }
}

/// `Some(true)` if only the first flag is set, `Some(false)` if only the second.
fn exactly_one(a: bool, b: bool) -> Option<bool> {
    match (a, b) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// Whether `a` is the canonical ID of the two.
fn canonical_first(a: &str, b: &str) -> bool {
    let ends_in_digit = |id: &str| id.chars().last().is_some_and(|c| c.is_ascii_digit());
    match (ends_in_digit(a), ends_in_digit(b)) {
        (false, true) => true,
        (true, false) => false,
        _ => a <= b,
    }
}

/// Decides same-source merges under [`SameSourcePolicy::Ask`].
pub trait SameSourcePrompt {
    /// `true` to merge `dupe` into `main` although they share `sources`.
    fn confirm(&self, main: &dyn Mergeable, dupe: &dyn Mergeable, sources: &[String]) -> bool;
}

impl<F> SameSourcePrompt for F
where
    F: Fn(&dyn Mergeable, &dyn Mergeable, &[String]) -> bool,
{
    fn confirm(&self, main: &dyn Mergeable, dupe: &dyn Mergeable, sources: &[String]) -> bool {
        self(main, dupe, sources)
    }
}

/// Asks on the terminal (stderr/stdin).
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl SameSourcePrompt for TerminalPrompt {
    fn confirm(&self, main: &dyn Mergeable, dupe: &dyn Mergeable, sources: &[String]) -> bool {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "\nSame-source merge ({}):\n  {}\n  {}\nMerge {} into {}? [y/N] ",
            sources.join(", "),
            main.describe(),
            dupe.describe(),
            dupe.id(),
            main.id(),
        );
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Chooses the surviving record of a pair and guards against unsafe merges.
pub struct MergeResolver {
    policy: SameSourcePolicy,
    priority: Vec<PriorityRule>,
    prompt: Option<Box<dyn SameSourcePrompt + Send + Sync>>,
}

impl fmt::Debug for MergeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergeResolver")
            .field("policy", &self.policy)
            .field("priority", &self.priority)
            .field("prompt", &self.prompt.is_some())
            .finish()
    }
}

impl MergeResolver {
    #[must_use]
    pub fn new(policy: SameSourcePolicy) -> Self {
        Self {
            policy,
            priority: DEFAULT_PRIORITY.to_vec(),
            prompt: None,
        }
    }

    /// Installs the prompt consulted under [`SameSourcePolicy::Ask`]. Without
    /// one, `ask` refuses same-source merges.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl SameSourcePrompt + Send + Sync + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    /// Replaces the priority table.
    #[must_use]
    pub fn with_priority(mut self, rules: Vec<PriorityRule>) -> Self {
        self.priority = rules;
        self
    }

    pub fn policy(&self) -> SameSourcePolicy {
        self.policy
    }

    /// Orders a pair as `(main, dupe)`.
    pub fn resolve_pair<'r, R: Mergeable>(&self, a: &'r R, b: &'r R) -> (&'r R, &'r R) {
        let a_is_main = self
            .priority
            .iter()
            .find_map(|rule| rule.decide(a, b))
            .unwrap_or_else(|| canonical_first(a.id(), b.id()));
        if a_is_main { (a, b) } else { (b, a) }
    }

    /// Checks whether `dupe` may be merged into `main`.
    pub fn allow<R: Mergeable>(&self, main: &R, dupe: &R) -> Result<(), DisallowedReason> {
        for record in [main, dupe] {
            if record.entry_type().is_container() {
                tracing::debug!(main = main.id(), dupe = dupe.id(), "cross-level merge blocked");
                return Err(DisallowedReason::CrossLevel {
                    entry_type: record.entry_type().clone(),
                });
            }
        }

        if main.declared_distinct_from(dupe.id()) || dupe.declared_distinct_from(main.id()) {
            return Err(DisallowedReason::DeclaredDistinct);
        }

        let sources = main
            .origin()
            .shared_sources(dupe.origin())
            .into_iter()
            .map(String::from)
            .collect_vec();
        if sources.is_empty() {
            return Ok(());
        }

        let allowed = match self.policy {
            SameSourcePolicy::Apply => {
                tracing::warn!(
                    main = main.id(),
                    dupe = dupe.id(),
                    main_origin = %main.origin(),
                    dupe_origin = %dupe.origin(),
                    "applying same-source merge"
                );
                true
            }
            SameSourcePolicy::Prevent => false,
            SameSourcePolicy::Ask => match &self.prompt {
                Some(prompt) => prompt.confirm(main, dupe, &sources),
                None => {
                    tracing::warn!(
                        main = main.id(),
                        dupe = dupe.id(),
                        "same-source merge needs confirmation but no prompt is configured"
                    );
                    false
                }
            },
        };

        if allowed {
            Ok(())
        } else {
            Err(DisallowedReason::SameSource { sources })
        }
    }

    /// Boolean form of [`allow`](Self::allow).
    pub fn is_allowed<R: Mergeable>(&self, main: &R, dupe: &R) -> bool {
        self.allow(main, dupe).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str, status: RecordState, origin: &str) -> Record {
        Record::new(id, "article", status, origin)
    }

    fn main_id(resolver: &MergeResolver, a: &Record, b: &Record) -> String {
        resolver.resolve_pair(a, b).0.id.clone()
    }

    #[rstest]
    #[case("Smith2020", "Smith2020a", "Smith2020a")]
    #[case("Smith2020a", "Smith2020", "Smith2020a")]
    #[case("R2", "R1", "R1")]
    #[case("Doe2019b", "Doe2019a", "Doe2019a")]
    fn test_same_status_prefers_ids_without_trailing_digit(
        #[case] a: &str,
        #[case] b: &str,
        #[case] expected: &str,
    ) {
        let resolver = MergeResolver::new(SameSourcePolicy::Prevent);
        let a = record(a, RecordState::MdPrepared, "s1/1");
        let b = record(b, RecordState::MdPrepared, "s2/1");
        assert_eq!(main_id(&resolver, &a, &b), expected);
    }

    #[test]
    fn test_prepared_record_becomes_dupe() {
        let resolver = MergeResolver::new(SameSourcePolicy::Prevent);
        let prepared = record("A", RecordState::MdPrepared, "s1/1");
        let included = record("B1", RecordState::RevIncluded, "s2/1");
        assert_eq!(main_id(&resolver, &prepared, &included), "B1");
        assert_eq!(main_id(&resolver, &included, &prepared), "B1");
    }

    #[test]
    fn test_processed_record_stays_main() {
        let resolver = MergeResolver::new(SameSourcePolicy::Prevent);
        let processed = record("A1", RecordState::MdProcessed, "s1/1");
        let included = record("B", RecordState::RevIncluded, "s2/1");
        assert_eq!(main_id(&resolver, &included, &processed), "A1");
    }

    #[test]
    fn test_curated_record_is_main_otherwise() {
        let resolver = MergeResolver::new(SameSourcePolicy::Prevent);
        let curated = record("A1", RecordState::RevIncluded, "s1/1").curated_by("https://x");
        let excluded = record("B", RecordState::RevExcluded, "s2/1");
        assert_eq!(main_id(&resolver, &excluded, &curated), "A1");

        let plain = record("A1", RecordState::RevIncluded, "s1/1");
        assert_eq!(main_id(&resolver, &excluded, &plain), "B");
    }

    #[test]
    fn test_custom_priority_table() {
        let resolver = MergeResolver::new(SameSourcePolicy::Prevent)
            .with_priority(vec![PriorityRule::CuratedIsMain]);
        let curated = record("A1", RecordState::MdPrepared, "s1/1").curated_by("https://x");
        let other = record("B", RecordState::MdPrepared, "s2/1");
        assert_eq!(main_id(&resolver, &other, &curated), "A1");
    }

    #[test]
    fn test_cross_level_merge_is_blocked() {
        let resolver = MergeResolver::new(SameSourcePolicy::Apply);
        let proceedings = Record::new("P", "proceedings", RecordState::MdPrepared, "s1/1");
        let paper = record("A", RecordState::MdPrepared, "s2/1");
        assert_eq!(
            resolver.allow(&paper, &proceedings),
            Err(DisallowedReason::CrossLevel {
                entry_type: EntryType::Proceedings
            })
        );
        assert!(!resolver.is_allowed(&proceedings, &paper));
    }

    #[test]
    fn test_declared_distinct_records_are_blocked() {
        let resolver = MergeResolver::new(SameSourcePolicy::Apply);
        let mut a = record("A", RecordState::MdProcessed, "s1/1");
        a.manual_non_duplicate.insert("B".into());
        let b = record("B", RecordState::MdProcessed, "s2/1");
        assert_eq!(resolver.allow(&b, &a), Err(DisallowedReason::DeclaredDistinct));
    }

    #[rstest]
    #[case(SameSourcePolicy::Apply, true)]
    #[case(SameSourcePolicy::Prevent, false)]
    #[case(SameSourcePolicy::Ask, false)]
    fn test_same_source_policies(#[case] policy: SameSourcePolicy, #[case] allowed: bool) {
        let resolver = MergeResolver::new(policy);
        let a = record("R1", RecordState::MdPrepared, "src1/1");
        let b = record("R2", RecordState::MdPrepared, "src1/2;src3/1");
        assert_eq!(resolver.is_allowed(&a, &b), allowed);
        if !allowed {
            assert_eq!(
                resolver.allow(&a, &b),
                Err(DisallowedReason::SameSource {
                    sources: vec!["src1".to_string()]
                })
            );
        }
    }

    #[test]
    fn test_ask_policy_consults_prompt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let resolver = MergeResolver::new(SameSourcePolicy::Ask).with_prompt(
            move |main: &dyn Mergeable, _dupe: &dyn Mergeable, sources: &[String]| {
                counter.fetch_add(1, Ordering::SeqCst);
                main.id() == "R1" && sources == ["src1".to_string()]
            },
        );
        let a = record("R1", RecordState::MdPrepared, "src1/1");
        let b = record("R2", RecordState::MdPrepared, "src1/2");
        let c = record("R3", RecordState::MdPrepared, "src2/2");

        assert!(resolver.is_allowed(&a, &b));
        assert!(!resolver.is_allowed(&b, &a));
        assert!(resolver.is_allowed(&a, &c));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
