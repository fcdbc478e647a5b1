//! Merge application.
//!
//! [`MergeEngine`] turns a batch of candidate decisions into record merges:
//!
//! 1. both IDs are resolved through the batch's [`Forwarding`] table, so a
//!    record absorbed earlier in the batch is represented by its survivor
//! 2. pairs that already resolve to the same record are skipped
//! 3. the [`MergeResolver`] picks main and dupe and refuses unsafe merges
//! 4. the dupe's fields and origins are merged into the main record
//! 5. the dupe is forwarded to the main record and removed at the end of the batch
//!
//! Refused pairs never abort the batch. The store is loaded once and saved
//! once; a failed save leaves it untouched.

use crate::audit::AuditLog;
use crate::candidates::{CandidatePair, Decision};
use crate::closure::Forwarding;
use crate::config::DedupeConfig;
use crate::record::{Mergeable, NotFoundReason, RecordMap, RecordState, lookup};
use crate::resolve::{DisallowedReason, MergeResolver, SameSourcePrompt};
use crate::store::RecordStore;
use crate::{MergeError, Result};
use itertools::Itertools;
use std::collections::BTreeSet;
use std::fmt;

/// A merge that was carried out.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedPair {
    pub main: String,
    pub dupe: String,
    pub score: Option<f64>,
}

/// A pair the resolver refused.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPair {
    pub main: String,
    pub dupe: String,
    pub reason: DisallowedReason,
}

impl From<SkippedPair> for MergeError {
    fn from(pair: SkippedPair) -> Self {
        MergeError::DisallowedMerge {
            main: pair.main,
            dupe: pair.dupe,
            reason: pair.reason,
        }
    }
}

/// Outcome of one merge batch.
#[derive(Debug, Default)]
pub struct MergeReport {
    pub merged: Vec<MergedPair>,
    pub skipped: Vec<SkippedPair>,
    /// Pairs whose IDs already resolved to the same record.
    pub already_merged: Vec<(String, String)>,
    /// Duplicate decisions scored below the configured threshold.
    pub below_threshold: Vec<CandidatePair>,
    pub non_duplicates: usize,
    /// Records promoted from `md_prepared` to `md_processed`.
    pub promoted: BTreeSet<String>,
    pub errors: Vec<MergeError>,
}

impl MergeReport {
    fn skipped_by(&self, pred: fn(&DisallowedReason) -> bool) -> impl Iterator<Item = &SkippedPair> {
        self.skipped.iter().filter(move |pair| pred(&pair.reason))
    }

    pub fn skipped_same_source(&self) -> impl Iterator<Item = &SkippedPair> {
        self.skipped_by(DisallowedReason::is_same_source)
    }

    pub fn skipped_cross_level(&self) -> impl Iterator<Item = &SkippedPair> {
        self.skipped_by(|reason| matches!(reason, DisallowedReason::CrossLevel { .. }))
    }

    /// Pairs to record in the same-source audit file.
    pub fn prevented_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.skipped_same_source()
            .map(|pair| (pair.main.as_str(), pair.dupe.as_str()))
    }
}

impl fmt::Display for MergeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let same_source = self.skipped_same_source().count();
        let cross_level = self.skipped_cross_level().count();
        write!(
            f,
            "merged: {}, skipped same-source: {}, skipped cross-level: {}, skipped other: {}, \
             already merged: {}, below threshold: {}, non-duplicates: {}, errors: {}",
            self.merged.len(),
            same_source,
            cross_level,
            self.skipped.len() - same_source - cross_level,
            self.already_merged.len(),
            self.below_threshold.len(),
            self.non_duplicates,
            self.errors.len(),
        )
    }
}

/// A record that holds more than one record from the same search source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SameSourceMerge {
    pub id: String,
    pub source: String,
    pub source_ids: Vec<String>,
}

impl fmt::Display for SameSourceMerge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}: [{}])", self.id, self.source, self.source_ids.join(", "))
    }
}

/// Lists records whose origins contain several tokens of one source.
pub fn same_source_merges(records: &RecordMap) -> Vec<SameSourceMerge> {
    let found = records
        .values()
        .flat_map(|record| {
            record
                .colrev_origin
                .duplicated_sources()
                .into_iter()
                .map(move |(source, ids)| SameSourceMerge {
                    id: record.id.clone(),
                    source: source.to_string(),
                    source_ids: ids.into_iter().map(String::from).collect(),
                })
        })
        .collect_vec();
    for merge in &found {
        tracing::info!(%merge, "same-source merge");
    }
    found
}

/// The merge engine: configuration, resolver and audit log of one run.
#[derive(Debug)]
pub struct MergeEngine {
    config: DedupeConfig,
    resolver: MergeResolver,
    audit: AuditLog,
}

impl MergeEngine {
    pub fn new(config: DedupeConfig) -> Self {
        Self {
            resolver: MergeResolver::new(config.same_source_merges),
            audit: AuditLog::new(config.same_source_merge_file.clone()),
            config,
        }
    }

    /// Installs the prompt used under the `ask` same-source policy.
    #[must_use]
    pub fn with_prompt(mut self, prompt: impl SameSourcePrompt + Send + Sync + 'static) -> Self {
        self.resolver = self.resolver.with_prompt(prompt);
        self
    }

    /// Replaces the resolver, e.g. to use another priority table.
    #[must_use]
    pub fn with_resolver(mut self, resolver: MergeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn config(&self) -> &DedupeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &MergeResolver {
        &self.resolver
    }

    /// Applies a batch of decisions to the store.
    ///
    /// With `remaining_non_dupe`, every record still `md_prepared` after the
    /// batch is promoted to `md_processed`. The store is only saved when the
    /// batch changed a record, so a batch without effect keeps the previous
    /// snapshot. Refused same-source pairs are appended to the audit file after
    /// the store was saved.
    ///
    /// # Errors
    ///
    /// [`MergeError::Persistence`] when loading or saving fails. A failed load
    /// or save leaves the store unchanged. A failed audit write comes after the
    /// records were committed; it is logged and listed in
    /// [`MergeReport::errors`] instead.
    pub fn apply_merges<S>(
        &self,
        store: &S,
        decisions: impl IntoIterator<Item = CandidatePair>,
        remaining_non_dupe: bool,
    ) -> Result<MergeReport>
    where
        S: RecordStore + ?Sized,
    {
        let loaded = store.load_all()?;
        let mut records = loaded.clone();
        let mut report = self.merge_in_place(&mut records, decisions, remaining_non_dupe);
        if records != loaded {
            store.save_all(&records)?;
        }
        let audited = self.audit.append_pairs(report.prevented_pairs());
        if let Err(err) = audited {
            tracing::error!(%err, "records saved but the audit file was not written");
            report.errors.push(err);
        }
        tracing::info!(%report, "merge batch applied");
        Ok(report)
    }

    /// [`apply_merges`](Self::apply_merges) on a record map, without persistence.
    pub fn merge_in_place(
        &self,
        records: &mut RecordMap,
        decisions: impl IntoIterator<Item = CandidatePair>,
        remaining_non_dupe: bool,
    ) -> MergeReport {
        let mut batch = Batch::new(records);

        for pair in decisions {
            match pair.decision {
                Decision::NoDuplicate => batch.mark_non_duplicate(&pair),
                Decision::Duplicate if !pair.meets_threshold(self.config.merge_threshold) => {
                    tracing::debug!(a = %pair.id_a, b = %pair.id_b, score = ?pair.score, "below threshold");
                    batch.report.below_threshold.push(pair);
                }
                Decision::Duplicate => batch.merge_resolved(&pair, &self.resolver),
            }
        }

        let mut report = batch.finish();
        if remaining_non_dupe {
            promote_prepared(records, None, &mut report);
        }
        report
    }

    /// Operator merges: the first ID of each pair (after closure) is main.
    ///
    /// Priority policy and disallowed-merge checks are bypassed.
    pub fn apply_manual_merge<S>(
        &self,
        store: &S,
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> Result<MergeReport>
    where
        S: RecordStore + ?Sized,
    {
        let loaded = store.load_all()?;
        let mut records = loaded.clone();
        let report = manual_merge_in_place(&mut records, pairs);
        if records != loaded {
            store.save_all(&records)?;
        }
        tracing::info!(%report, "manual merges applied");
        Ok(report)
    }

    /// Merges a comma-separated ID list (`"A,B,C"`) into its first ID.
    ///
    /// # Errors
    ///
    /// [`MergeError::InvalidFormat`] when fewer than two IDs are given.
    pub fn merge_records<S>(&self, store: &S, ids: &str) -> Result<MergeReport>
    where
        S: RecordStore + ?Sized,
    {
        let ids = ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .collect_vec();
        let Some((main, dupes)) = ids.split_first().filter(|(_, dupes)| !dupes.is_empty()) else {
            return Err(MergeError::InvalidFormat(format!(
                "expected at least two comma-separated IDs, got {ids:?}"
            )));
        };
        let pairs = dupes
            .iter()
            .map(|dupe| (main.to_string(), dupe.to_string()))
            .collect_vec();
        self.apply_manual_merge(store, pairs)
    }
}

/// Promotes `md_prepared` records (all, or only `only`) to `md_processed`.
fn promote_prepared(records: &mut RecordMap, only: Option<&BTreeSet<String>>, report: &mut MergeReport) {
    for record in records.values_mut() {
        if record.colrev_status != RecordState::MdPrepared {
            continue;
        }
        if only.is_some_and(|ids| !ids.contains(&record.id)) {
            continue;
        }
        record.colrev_status = RecordState::MdProcessed;
        report.promoted.insert(record.id.clone());
    }
}

/// Merges pairs with the operator-chosen main, on a record map.
pub fn manual_merge_in_place(
    records: &mut RecordMap,
    pairs: impl IntoIterator<Item = (String, String)>,
) -> MergeReport {
    let mut batch = Batch::new(records);
    for (main, dupe) in pairs {
        let main = batch.forwarding.resolve(&main);
        let dupe = batch.forwarding.resolve(&dupe);
        if main == dupe {
            batch.report.already_merged.push((main, dupe));
            continue;
        }
        if let Err(err) = batch.check_known(&[main.as_str(), dupe.as_str()]) {
            batch.report.errors.push(err);
            continue;
        }
        batch.merge(&main, &dupe, None);
    }
    batch.finish()
}

/// Working state of one batch over a record map.
struct Batch<'r> {
    records: &'r mut RecordMap,
    forwarding: Forwarding,
    non_duplicates: BTreeSet<String>,
    report: MergeReport,
}

impl<'r> Batch<'r> {
    /// Starts from the merges recorded in `colrev_merged_ids`, so IDs absorbed
    /// in earlier batches resolve to their survivor.
    fn new(records: &'r mut RecordMap) -> Self {
        let mut forwarding = Forwarding::new();
        for record in records.values() {
            for merged in &record.colrev_merged_ids {
                if !records.contains_key(merged) {
                    forwarding.forward(merged, &record.id);
                }
            }
        }
        Self {
            records,
            forwarding,
            non_duplicates: BTreeSet::new(),
            report: MergeReport::default(),
        }
    }

    fn check_known(&self, ids: &[&str]) -> Result<()> {
        for id in ids {
            lookup(self.records, id).map_err(|_| MergeError::UnknownRecord(id.to_string()))?;
        }
        Ok(())
    }

    fn mark_non_duplicate(&mut self, pair: &CandidatePair) {
        self.report.non_duplicates += 1;
        for id in [&pair.id_a, &pair.id_b] {
            let id = self.forwarding.resolve(id);
            match self.check_known(&[id.as_str()]) {
                Ok(()) => {
                    self.non_duplicates.insert(id);
                }
                Err(err) => self.report.errors.push(err),
            }
        }
    }

    fn merge_resolved(&mut self, pair: &CandidatePair, resolver: &MergeResolver) {
        let a = self.forwarding.resolve(&pair.id_a);
        let b = self.forwarding.resolve(&pair.id_b);
        if a == b {
            self.report
                .already_merged
                .push((pair.id_a.clone(), pair.id_b.clone()));
            return;
        }

        let (main, dupe) = match (lookup(self.records, &a), lookup(self.records, &b)) {
            (Ok(record_a), Ok(record_b)) => {
                let (main, dupe) = resolver.resolve_pair(record_a, record_b);
                let ineligible = [main, dupe]
                    .into_iter()
                    .find(|r| !r.status().is_merge_eligible())
                    .map(|r| DisallowedReason::Ineligible {
                        id: r.id.clone(),
                        status: r.status(),
                    });
                let verdict = match ineligible {
                    Some(reason) => Err(reason),
                    None => resolver.allow(main, dupe),
                };
                if let Err(reason) = verdict {
                    tracing::debug!(main = %main.id, dupe = %dupe.id, %reason, "merge skipped");
                    self.report.skipped.push(SkippedPair {
                        main: main.id.clone(),
                        dupe: dupe.id.clone(),
                        reason,
                    });
                    return;
                }
                (main.id.clone(), dupe.id.clone())
            }
            (Err(missing), _) | (_, Err(missing)) => {
                tracing::warn!(%missing, "candidate pair references an unknown record");
                let NotFoundReason::Missing(id) = missing;
                self.report.errors.push(MergeError::UnknownRecord(id));
                return;
            }
        };

        self.merge(&main, &dupe, pair.score);
    }

    /// Merges two known representatives.
    fn merge(&mut self, main: &str, dupe: &str, score: Option<f64>) {
        let Some(dupe_record) = self.records.get(dupe).cloned() else {
            return;
        };
        let Some(main_record) = self.records.get_mut(main) else {
            return;
        };
        main_record.merge_from(&dupe_record);
        main_record.manual_non_duplicate.remove(dupe);
        self.forwarding.forward(dupe, main);
        tracing::debug!(main, dupe, origin = %main_record.colrev_origin, "merged");
        self.report.merged.push(MergedPair {
            main: main.to_string(),
            dupe: dupe.to_string(),
            score,
        });
    }

    fn finish(mut self) -> MergeReport {
        for absorbed in self.forwarding.absorbed() {
            self.records.remove(absorbed);
        }
        let survivors: BTreeSet<String> = self
            .non_duplicates
            .iter()
            .map(|id| self.forwarding.resolve(id))
            .collect();
        promote_prepared(self.records, Some(&survivors), &mut self.report);
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SameSourcePolicy;
    use crate::record::{Origin, Provenance, Record};
    use crate::store::{MemoryStore, RecordStore};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn prepared(id: &str, origin: &str) -> Record {
        Record::new(id, "article", RecordState::MdPrepared, origin)
            .with_field("title", &format!("Title of {id}"))
    }

    fn engine(policy: SameSourcePolicy, dir: &TempDir) -> MergeEngine {
        MergeEngine::new(
            DedupeConfig::default()
                .with_policy(policy)
                .with_audit_file(dir.path().join("same_source_merges.txt")),
        )
    }

    fn origins(records: &RecordMap) -> BTreeSet<String> {
        records
            .values()
            .flat_map(|r| r.colrev_origin.tokens().map(String::from).collect_vec())
            .collect()
    }

    #[test]
    fn test_misq_scenario() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([
            Record::new("R1", "article", RecordState::MdPrepared, "src1/1")
                .with_field("journal", "MISQ")
                .with_field("year", "2020"),
            Record::new("R2", "article", RecordState::MdPrepared, "src2/1")
                .with_field("journal", "MIS Quarterly")
                .with_field("year", "2020"),
        ]);

        let report = engine(SameSourcePolicy::Prevent, &dir)
            .apply_merges(&store, [CandidatePair::duplicate("R1", "R2")], false)
            .unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records["R1"].colrev_origin.to_string(), "src1/1;src2/1");
        assert_eq!(records["R1"].field("journal"), Some("MISQ"));
        assert_eq!(report.merged.len(), 1);
        assert_eq!(store.access_counts(), (2, 1));
    }

    #[test]
    fn test_same_source_prevent_is_audited() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([prepared("R1", "src1/1"), prepared("R2", "src1/2")]);
        let engine = engine(SameSourcePolicy::Prevent, &dir);

        let report = engine
            .apply_merges(&store, [CandidatePair::duplicate("R2", "R1")], false)
            .unwrap();

        assert_eq!(store.load_all().unwrap().len(), 2);
        assert_eq!(report.skipped_same_source().count(), 1);
        let audit = std::fs::read_to_string(&engine.config().same_source_merge_file).unwrap();
        assert_eq!(audit, "R1,R2\n");
    }

    #[test]
    fn test_same_source_apply_merges() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([prepared("R1", "src1/1"), prepared("R2", "src1/2")]);
        let engine = engine(SameSourcePolicy::Apply, &dir);

        let report = engine
            .apply_merges(&store, [CandidatePair::duplicate("R1", "R2")], false)
            .unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(report.merged.len(), 1);
        assert_eq!(records["R1"].colrev_origin.to_string(), "src1/1;src1/2");
        assert!(!engine.config().same_source_merge_file.exists());
        assert_eq!(
            same_source_merges(&records),
            vec![SameSourceMerge {
                id: "R1".into(),
                source: "src1".into(),
                source_ids: vec!["1".into(), "2".into()],
            }]
        );
        assert_eq!(same_source_merges(&records)[0].to_string(), "R1 (src1: [1, 2])");
    }

    #[test]
    fn test_ask_refusal_is_audited_like_prevent() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([prepared("R1", "src1/1"), prepared("R2", "src1/2")]);
        let engine = engine(SameSourcePolicy::Ask, &dir)
            .with_prompt(|_: &dyn Mergeable, _: &dyn Mergeable, _: &[String]| false);

        engine
            .apply_merges(&store, [CandidatePair::duplicate("R1", "R2")], false)
            .unwrap();

        let audit = std::fs::read_to_string(&engine.config().same_source_merge_file).unwrap();
        assert_eq!(audit, "R1,R2\n");
    }

    #[rstest]
    #[case(&[("A", "B"), ("B", "C")])]
    #[case(&[("B", "C"), ("A", "B")])]
    #[case(&[("C", "B"), ("A", "C")])]
    #[case(&[("A", "B"), ("B", "C"), ("C", "A")])]
    fn test_transitivity_regardless_of_order(#[case] pairs: &[(&str, &str)]) {
        let mut records: RecordMap = [prepared("A", "s1/1"), prepared("B", "s2/1"), prepared("C", "s3/1")]
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let engine = MergeEngine::new(DedupeConfig::default());

        engine.merge_in_place(
            &mut records,
            pairs.iter().map(|(a, b)| CandidatePair::duplicate(*a, *b)),
            false,
        );

        assert_eq!(records.len(), 1);
        let survivor = records.values().next().unwrap();
        assert_eq!(survivor.id, "A");
        assert_eq!(survivor.colrev_origin, Origin::parse("s1/1;s2/1;s3/1"));
    }

    #[test]
    fn test_idempotence_and_origin_conservation() {
        let mut records: RecordMap = [prepared("A", "s1/1"), prepared("B", "s2/1;s4/1"), prepared("C", "s3/1")]
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let before = origins(&records);
        let engine = MergeEngine::new(DedupeConfig::default());
        let decisions = [CandidatePair::duplicate("A", "B"), CandidatePair::duplicate("B", "C")];

        engine.merge_in_place(&mut records, decisions.clone(), false);
        let once = records.clone();
        let report = engine.merge_in_place(&mut records, decisions, false);

        assert_eq!(origins(&records), before);
        assert_eq!(records, once);
        assert!(report.merged.is_empty());
        assert!(report.errors.is_empty());
        assert_eq!(report.already_merged.len(), 2);
    }

    #[test]
    fn test_later_batches_follow_earlier_merges() {
        let store = MemoryStore::from_records([prepared("A", "s1/1"), prepared("B", "s2/1"), prepared("C", "s3/1")]);
        let engine = MergeEngine::new(DedupeConfig::default());
        engine
            .apply_merges(&store, [CandidatePair::duplicate("A", "B")], false)
            .unwrap();

        let report = engine
            .apply_merges(&store, [CandidatePair::duplicate("B", "C")], false)
            .unwrap();

        let records = store.load_all().unwrap();
        assert!(report.errors.is_empty());
        assert_eq!(report.merged.len(), 1);
        assert_eq!((report.merged[0].main.as_str(), report.merged[0].dupe.as_str()), ("A", "C"));
        assert_eq!(records.keys().collect_vec(), vec!["A"]);
        assert_eq!(records["A"].colrev_origin.to_string(), "s1/1;s2/1;s3/1");
        assert_eq!(
            records["A"].colrev_merged_ids,
            BTreeSet::from(["B".to_string(), "C".to_string()])
        );
    }

    #[test]
    fn test_batch_without_effect_is_not_saved() {
        let store = MemoryStore::from_records([prepared("A", "s1/1"), prepared("B", "s2/1")]);
        let engine = MergeEngine::new(DedupeConfig::default());
        let decisions = [CandidatePair::duplicate("A", "B")];
        engine.apply_merges(&store, decisions.clone(), false).unwrap();

        let report = engine.apply_merges(&store, decisions, false).unwrap();

        assert!(report.merged.is_empty());
        assert_eq!(report.already_merged.len(), 1);
        assert_eq!(store.access_counts(), (2, 1));
    }

    #[test]
    fn test_self_merge_is_a_no_op() {
        let mut records: RecordMap = [prepared("A", "s1/1")].into_iter().map(|r| (r.id.clone(), r)).collect();
        let before = records.clone();
        let report = MergeEngine::new(DedupeConfig::default()).merge_in_place(
            &mut records,
            [CandidatePair::duplicate("A", "A")],
            false,
        );
        assert_eq!(records, before);
        assert_eq!(report.already_merged.len(), 1);
    }

    #[test]
    fn test_curated_fields_are_protected() {
        let mut records: RecordMap = [
            prepared("A", "s1/1")
                .with_field("journal", "MIS Quarterly")
                .with_provenance("journal", Provenance::new("CURATED:https://example.org/misq")),
            prepared("A1", "s2/1").with_field("journal", "MISQ"),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

        MergeEngine::new(DedupeConfig::default()).merge_in_place(
            &mut records,
            [CandidatePair::duplicate("A1", "A")],
            false,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records["A"].field("journal"), Some("MIS Quarterly"));
    }

    #[test]
    fn test_blocked_pairs_do_not_abort_the_batch() {
        let mut records: RecordMap = [
            prepared("A", "s1/1"),
            Record::new("P", "proceedings", RecordState::MdPrepared, "s2/1"),
            Record::new("I", "article", RecordState::MdImported, "s3/1"),
            prepared("B", "s4/1"),
        ]
        .into_iter()
        .map(|r| (r.id.clone(), r))
        .collect();

        let report = MergeEngine::new(DedupeConfig::default()).merge_in_place(
            &mut records,
            [
                CandidatePair::duplicate("A", "P"),
                CandidatePair::duplicate("A", "I"),
                CandidatePair::duplicate("A", "Z"),
                CandidatePair::duplicate("A", "B"),
            ],
            false,
        );

        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.skipped_cross_level().count(), 1);
        assert_eq!(report.skipped.len(), 2);
        assert!(matches!(report.errors[0], MergeError::UnknownRecord(ref id) if id == "Z"));
        assert_eq!(
            report.to_string(),
            "merged: 1, skipped same-source: 0, skipped cross-level: 1, skipped other: 1, \
             already merged: 0, below threshold: 0, non-duplicates: 0, errors: 1"
        );
    }

    #[test]
    fn test_no_duplicate_and_remaining_promotion() {
        let mut records: RecordMap = [prepared("A", "s1/1"), prepared("B", "s2/1"), prepared("C", "s3/1")]
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let engine = MergeEngine::new(DedupeConfig::default());

        let report = engine.merge_in_place(&mut records, [CandidatePair::no_duplicate("A", "B")], false);
        assert_eq!(report.promoted, BTreeSet::from(["A".to_string(), "B".to_string()]));
        assert_eq!(records["C"].colrev_status, RecordState::MdPrepared);

        let report = engine.merge_in_place(&mut records, std::iter::empty(), true);
        assert_eq!(report.promoted, BTreeSet::from(["C".to_string()]));
        assert!(records.values().all(|r| r.colrev_status == RecordState::MdProcessed));
    }

    #[test]
    fn test_low_scores_are_not_merged() {
        let mut records: RecordMap = [prepared("A", "s1/1"), prepared("B", "s2/1")]
            .into_iter()
            .map(|r| (r.id.clone(), r))
            .collect();
        let report = MergeEngine::new(DedupeConfig::default()).merge_in_place(
            &mut records,
            [CandidatePair::duplicate("A", "B").with_score(0.4)],
            false,
        );
        assert_eq!(records.len(), 2);
        assert_eq!(report.below_threshold.len(), 1);
    }

    #[test]
    fn test_failed_save_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([
            prepared("R1", "src1/1"),
            prepared("R2", "src1/2"),
            prepared("R3", "src2/1"),
        ]);
        store.fail_saves(true);
        let engine = engine(SameSourcePolicy::Prevent, &dir);

        let err = engine
            .apply_merges(
                &store,
                [CandidatePair::duplicate("R1", "R2"), CandidatePair::duplicate("R1", "R3")],
                false,
            )
            .unwrap_err();

        assert!(matches!(err, MergeError::Persistence(_)));
        assert_eq!(store.load_all().unwrap().len(), 3);
        assert!(!engine.config().same_source_merge_file.exists());
    }

    #[test]
    fn test_failed_audit_write_keeps_saved_batch() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::from_records([
            prepared("R1", "src1/1"),
            prepared("R2", "src1/2"),
            prepared("R3", "src2/1"),
        ]);
        let engine = MergeEngine::new(
            DedupeConfig::default()
                .with_policy(SameSourcePolicy::Prevent)
                .with_audit_file(dir.path().join("missing").join("same_source_merges.txt")),
        );

        let report = engine
            .apply_merges(
                &store,
                [CandidatePair::duplicate("R1", "R2"), CandidatePair::duplicate("R1", "R3")],
                false,
            )
            .unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(records.keys().collect_vec(), vec!["R1", "R2"]);
        assert_eq!(report.merged.len(), 1);
        assert_eq!(report.skipped_same_source().count(), 1);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], MergeError::Persistence(_)));
    }

    #[test]
    fn test_merge_records_uses_first_id_as_main() {
        let dir = TempDir::new().unwrap();
        let mut declared = prepared("B1", "s2/1");
        declared.manual_non_duplicate.insert("A1".into());
        let store = MemoryStore::from_records([
            prepared("A1", "s1/1"),
            declared,
            Record::new("P", "proceedings", RecordState::MdPrepared, "s1/2"),
        ]);
        let engine = engine(SameSourcePolicy::Prevent, &dir);

        let report = engine.merge_records(&store, "B1, A1,P").unwrap();

        let records = store.load_all().unwrap();
        assert_eq!(report.merged.len(), 2);
        assert_eq!(records.keys().collect_vec(), vec!["B1"]);
        assert_eq!(records["B1"].colrev_origin.to_string(), "s1/1;s1/2;s2/1");
        assert!(records["B1"].manual_non_duplicate.is_empty());

        assert!(matches!(
            engine.merge_records(&store, "B1"),
            Err(MergeError::InvalidFormat(_))
        ));
    }
}
