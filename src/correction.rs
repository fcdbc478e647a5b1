//! Correction of merge errors.
//!
//! Wrong merges are undone from the store's previous snapshot; missed
//! duplicates are merged manually. Operators flag both kinds in correction
//! sheets:
//!
//! ```text
//! cluster_id,ID,error
//! 1,Smith2020,x
//! 1,Smith2020a,
//! 2,Doe2019,
//! ```
//!
//! A cluster is flagged when any of its rows has a non-empty `error` cell.

use crate::merge::{MergeEngine, MergeReport};
use crate::record::{RecordMap, RecordState};
use crate::store::{History, RecordStore};
use crate::{MergeError, Result};
use itertools::Itertools;
use std::fmt;

/// Outcome of an undo batch.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Clusters whose records were restored.
    pub restored: Vec<Vec<String>>,
    /// One [`MergeError::RestoreImpossible`] per cluster that could not be restored.
    pub failed: Vec<MergeError>,
}

impl fmt::Display for UndoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "restored: {}, errors: {}",
            self.restored.len(),
            self.failed.len()
        )
    }
}

/// Undoes the merge that produced `cluster`.
pub fn undo_merge<S>(store: &S, cluster: &[String]) -> Result<UndoReport>
where
    S: RecordStore + History + ?Sized,
{
    undo_merges(store, &[cluster.to_vec()])
}

/// Undoes several merges in one batch.
///
/// # Errors
///
/// [`MergeError::SnapshotUnavailable`] when the store has no previous
/// snapshot, [`MergeError::Persistence`] when loading or saving fails.
/// Clusters that cannot be restored are reported, not returned as errors.
pub fn undo_merges<S>(store: &S, clusters: &[Vec<String>]) -> Result<UndoReport>
where
    S: RecordStore + History + ?Sized,
{
    let mut records = store.load_all()?;
    let prior = store.previous_snapshot()?;
    let report = undo_in_place(&mut records, &prior, clusters);
    if !report.restored.is_empty() {
        store.save_all(&records)?;
    }
    tracing::info!(%report, "undo batch applied");
    Ok(report)
}

/// Restores every cluster whose IDs all exist in `prior`.
///
/// Restored records are `md_processed` and list the other cluster IDs as
/// manual non-duplicates.
pub fn undo_in_place(records: &mut RecordMap, prior: &RecordMap, clusters: &[Vec<String>]) -> UndoReport {
    let mut report = UndoReport::default();

    for cluster in clusters {
        let ids = cluster.iter().map(|id| id.trim().to_string()).unique().collect_vec();
        let missing = ids
            .iter()
            .filter(|id| !prior.contains_key(id.as_str()))
            .cloned()
            .collect_vec();
        if !missing.is_empty() {
            let err = MergeError::RestoreImpossible { ids, missing };
            tracing::error!(%err, "please fix manually");
            report.failed.push(err);
            continue;
        }

        for id in &ids {
            records.remove(id);
        }
        for id in &ids {
            let mut record = prior[id].clone();
            record
                .manual_non_duplicate
                .extend(ids.iter().filter(|other| *other != id).cloned());
            record.colrev_status = RecordState::MdProcessed;
            tracing::info!(id = %record.id, "restored");
            records.insert(id.clone(), record);
        }
        for record in records.values_mut().filter(|r| !ids.contains(&r.id)) {
            record.colrev_merged_ids.retain(|merged| !ids.contains(merged));
        }
        report.restored.push(ids);
    }
    report
}

/// Parses `ID1,ID2` lines. Blank lines are skipped.
pub fn parse_pair_lines(input: &str) -> Result<Vec<(String, String)>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            line.split(',')
                .map(str::trim)
                .collect_tuple()
                .filter(|(a, b): &(&str, &str)| !a.is_empty() && !b.is_empty())
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .ok_or_else(|| {
                    MergeError::InvalidFormat(format!(
                        "line {}: expected `ID1,ID2`, got `{line}`",
                        number + 1
                    ))
                })
        })
        .collect()
}

#[cfg(feature = "csv")]
pub use sheet::CorrectionSheet;

#[cfg(feature = "csv")]
mod sheet {
    use crate::{MergeError, Result};
    use csv::{ReaderBuilder, Trim};
    use serde::Deserialize;
    use std::path::Path;

    #[derive(Debug, Clone, Deserialize)]
    struct SheetRow {
        cluster_id: String,
        #[serde(rename = "ID")]
        id: String,
        #[serde(default)]
        error: String,
    }

    /// A correction sheet with `cluster_id`, `ID` and `error` columns.
    #[derive(Debug, Clone, Default)]
    pub struct CorrectionSheet {
        rows: Vec<SheetRow>,
    }

    impl CorrectionSheet {
        /// Parses a comma-separated sheet with a header row.
        pub fn parse(input: &str) -> Result<Self> {
            let mut reader = ReaderBuilder::new()
                .trim(Trim::All)
                .from_reader(input.as_bytes());
            let rows = reader
                .deserialize()
                .collect::<std::result::Result<Vec<SheetRow>, _>>()?;
            Ok(Self { rows })
        }

        pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();
            let input = std::fs::read_to_string(path).map_err(|err| {
                MergeError::InvalidFormat(format!("{}: {err}", path.display()))
            })?;
            Self::parse(&input)
        }

        /// ID lists of the clusters with a non-empty `error` cell, in sheet order.
        pub fn flagged_clusters(&self) -> Vec<Vec<String>> {
            let mut clusters: Vec<(&str, Vec<String>, bool)> = Vec::new();
            for row in &self.rows {
                let index = match clusters.iter().position(|(id, _, _)| *id == row.cluster_id) {
                    Some(index) => index,
                    None => {
                        clusters.push((row.cluster_id.as_str(), Vec::new(), false));
                        clusters.len() - 1
                    }
                };
                let (_, ids, flagged) = &mut clusters[index];
                ids.push(row.id.clone());
                *flagged |= !row.error.is_empty();
            }
            clusters
                .into_iter()
                .filter(|(_, _, flagged)| *flagged)
                .map(|(_, ids, _)| ids)
                .collect()
        }
    }
}

/// Inputs of [`fix_errors`].
#[derive(Debug, Clone, Default)]
pub struct FixInput {
    /// Sheet of merged clusters; flagged clusters are undone.
    #[cfg(feature = "csv")]
    pub duplicates: Option<CorrectionSheet>,
    /// Sheet of unmerged clusters; flagged clusters are merged.
    #[cfg(feature = "csv")]
    pub non_duplicates: Option<CorrectionSheet>,
    /// Further pairs to merge, e.g. from [`parse_pair_lines`].
    pub merge_pairs: Vec<(String, String)>,
}

impl FixInput {
    fn undo_clusters(&self) -> Vec<Vec<String>> {
        #[cfg(feature = "csv")]
        {
            if let Some(sheet) = &self.duplicates {
                return sheet.flagged_clusters();
            }
        }
        Vec::new()
    }

    fn pairs_to_merge(&self) -> Vec<(String, String)> {
        #[allow(unused_mut)]
        let mut pairs = Vec::new();
        #[cfg(feature = "csv")]
        {
            if let Some(sheet) = &self.non_duplicates {
                for cluster in sheet.flagged_clusters() {
                    if let Some((main, rest)) = cluster.split_first() {
                        pairs.extend(rest.iter().map(|dupe| (main.clone(), dupe.clone())));
                    }
                }
            }
        }
        pairs.extend(self.merge_pairs.iter().cloned());
        pairs
    }
}

/// Outcome of [`fix_errors`].
#[derive(Debug, Default)]
pub struct FixReport {
    pub undo: Option<UndoReport>,
    pub merge: Option<MergeReport>,
}

/// Undoes flagged merges, then merges flagged non-duplicates.
pub fn fix_errors<S>(engine: &MergeEngine, store: &S, input: &FixInput) -> Result<FixReport>
where
    S: RecordStore + History + ?Sized,
{
    let mut report = FixReport::default();

    let clusters = input.undo_clusters();
    if !clusters.is_empty() {
        report.undo = Some(undo_merges(store, &clusters)?);
    }

    let pairs = input.pairs_to_merge();
    if !pairs.is_empty() {
        report.merge = Some(engine.apply_manual_merge(store, pairs)?);
    }

    if report.undo.is_none() && report.merge.is_none() {
        tracing::error!("no flagged clusters or pairs to correct");
    }
    Ok(report)
}
