//! Built-in similarity matcher.
//!
//! Records are grouped by year and compared pairwise within each group:
//!
//! 1. Identical colrev_ids are duplicates (score `1.0`).
//! 2. Otherwise a pair is a duplicate when
//!    - the Jaro-Winkler title similarity is at least 0.93, volume or pages
//!      agree and the venue matches, or
//!    - the title similarity is at least 0.99 and year, volume and pages agree.
//!
//! Only duplicates are emitted; the score is the title similarity.
//!
//! ```
//! use bibmerge::candidates::CandidateSource;
//! use bibmerge::candidates::similarity::SimilaritySource;
//! use bibmerge::normalize::dedupe_ready;
//! use bibmerge::{Record, RecordMap, RecordState};
//!
//! let mut records = RecordMap::new();
//! for (id, origin, title) in [
//!     ("R1", "src1/1", "Digital platform ecosystems"),
//!     ("R2", "src2/1", "Digital Platform Ecosystems."),
//! ] {
//!     let record = Record::new(id, "article", RecordState::MdPrepared, origin)
//!         .with_field("title", title)
//!         .with_field("journal", "Information Systems Research")
//!         .with_field("volume", "21")
//!         .with_field("year", "2010");
//!     records.insert(id.to_string(), record);
//! }
//!
//! let normalized = dedupe_ready(&records);
//! let pairs: Vec<_> = SimilaritySource::new().candidates(&normalized).collect();
//! assert_eq!(pairs.len(), 1);
//! assert_eq!((pairs[0].id_a.as_str(), pairs[0].id_b.as_str()), ("R1", "R2"));
//! ```

use super::{CandidatePair, CandidateSource};
use crate::normalize::NormalizedRecord;
use either::Either;
use itertools::Itertools;
use rayon::prelude::*;
use std::collections::BTreeMap;
use strsim::jaro_winkler;

const TITLE_SIMILARITY_THRESHOLD: f64 = 0.93;
const STRICT_TITLE_SIMILARITY_THRESHOLD: f64 = 0.99;

#[derive(Debug, Default, Clone)]
pub struct SimilaritySource {
    run_in_parallel: bool,
}

impl SimilaritySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares year groups on the rayon thread pool. Output order is the same
    /// as in sequential mode.
    #[must_use]
    pub fn with_parallelism(mut self, run_in_parallel: bool) -> Self {
        self.run_in_parallel = run_in_parallel;
        self
    }
}

impl CandidateSource for SimilaritySource {
    fn candidates<'a>(
        &'a self,
        records: &'a [NormalizedRecord],
    ) -> impl Iterator<Item = CandidatePair> + 'a {
        let groups = group_by_year(records);
        tracing::debug!(records = records.len(), groups = groups.len(), "comparing records");

        if self.run_in_parallel {
            let pairs: Vec<CandidatePair> = groups
                .into_par_iter()
                .flat_map_iter(|(_, group)| group_pairs(group))
                .collect();
            Either::Left(pairs.into_iter())
        } else {
            Either::Right(
                groups
                    .into_iter()
                    .flat_map(|(_, group)| group_pairs(group)),
            )
        }
    }
}

/// Records without a year form their own group.
fn group_by_year(records: &[NormalizedRecord]) -> BTreeMap<&str, Vec<&NormalizedRecord>> {
    let mut groups: BTreeMap<&str, Vec<&NormalizedRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.year.as_deref().unwrap_or_default())
            .or_default()
            .push(record);
    }
    groups
}

fn group_pairs<'a>(group: Vec<&'a NormalizedRecord>) -> impl Iterator<Item = CandidatePair> + 'a {
    group
        .into_iter()
        .tuple_combinations()
        .filter_map(|(a, b)| compare(a, b))
}

fn both_equal(a: &Option<String>, b: &Option<String>) -> bool {
    a.as_ref().zip(b.as_ref()).is_some_and(|(a, b)| a == b)
}

fn compare(a: &NormalizedRecord, b: &NormalizedRecord) -> Option<CandidatePair> {
    if let (Some(key_a), Some(key_b)) = (a.colrev_id.as_key(), b.colrev_id.as_key()) {
        if key_a == key_b {
            return Some(CandidatePair::duplicate(&a.id, &b.id).with_score(1.0));
        }
    }

    let title_similarity = jaro_winkler(a.title.as_deref()?, b.title.as_deref()?);
    let venues_match = both_equal(&a.container_title, &b.container_title);
    let volumes_match = both_equal(&a.volume, &b.volume);
    let pages_match = both_equal(&a.pages, &b.pages);
    let years_match = both_equal(&a.year, &b.year);

    let is_duplicate = (title_similarity >= TITLE_SIMILARITY_THRESHOLD
        && (volumes_match || pages_match)
        && venues_match)
        || (title_similarity >= STRICT_TITLE_SIMILARITY_THRESHOLD
            && years_match
            && volumes_match
            && pages_match);

    is_duplicate.then(|| CandidatePair::duplicate(&a.id, &b.id).with_score(title_similarity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::dedupe_ready;
    use crate::record::{Record, RecordMap, RecordState};
    use pretty_assertions::assert_eq;

    fn article(id: &str, origin: &str, title: &str, year: &str) -> Record {
        Record::new(id, "article", RecordState::MdPrepared, origin)
            .with_field("title", title)
            .with_field("journal", "MIS Quarterly")
            .with_field("volume", "44")
            .with_field("year", year)
    }

    fn pairs(records: Vec<Record>, parallel: bool) -> Vec<(String, String)> {
        let map: RecordMap = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        let normalized = dedupe_ready(&map);
        SimilaritySource::new()
            .with_parallelism(parallel)
            .candidates(&normalized)
            .map(|pair| (pair.id_a, pair.id_b))
            .collect()
    }

    #[test]
    fn test_identical_colrev_ids_score_one() {
        let records = vec![
            article("A", "src1/1", "The Paper", "2020").with_field("author", "Smith, J."),
            article("B", "src2/1", "The paper.", "2020").with_field("author", "Smith, John"),
        ];
        let map: RecordMap = records.into_iter().map(|r| (r.id.clone(), r)).collect();
        let normalized = dedupe_ready(&map);
        let found: Vec<_> = SimilaritySource::new().candidates(&normalized).collect();
        assert_eq!(found, vec![CandidatePair::duplicate("A", "B").with_score(1.0)]);
    }

    #[test]
    fn test_similar_titles_in_same_venue_match() {
        let found = pairs(
            vec![
                article("A", "src1/1", "Digital platform ecosystems", "2020")
                    .with_field("author", "Smith, J."),
                article("B", "src2/1", "Digital platform ecosystem", "2020"),
                article("C", "src2/2", "Something entirely different", "2020"),
            ],
            false,
        );
        assert_eq!(found, vec![("A".to_string(), "B".to_string())]);
    }

    #[test]
    fn test_different_years_are_not_compared() {
        let found = pairs(
            vec![
                article("A", "src1/1", "Digital platform ecosystems", "2020"),
                article("B", "src2/1", "Digital platform ecosystems", "2021"),
            ],
            false,
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_unprepared_records_are_ignored() {
        let mut imported = article("B", "src2/1", "Digital platform ecosystems", "2020");
        imported.colrev_status = RecordState::MdImported;
        let found = pairs(
            vec![article("A", "src1/1", "Digital platform ecosystems", "2020"), imported],
            false,
        );
        assert!(found.is_empty());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let records: Vec<Record> = (0..6)
            .flat_map(|i| {
                let year = format!("{}", 2015 + i % 3);
                [
                    article(&format!("A{i}"), "src1/1", &format!("Paper number {i}"), &year),
                    article(&format!("B{i}"), "src2/1", &format!("Paper number {i}."), &year),
                ]
            })
            .collect();
        let sequential = pairs(records.clone(), false);
        let parallel = pairs(records, true);
        assert_eq!(sequential, parallel);
        assert!(sequential.contains(&("A0".to_string(), "B0".to_string())));
    }
}
