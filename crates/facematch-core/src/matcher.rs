//! Nearest-neighbour matching of a probe embedding against enrolled records.

use crate::types::{Embedding, EnrollmentRecord};
use serde::Serialize;
use uuid::Uuid;

/// Default cosine similarity a match must strictly exceed.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.6;

/// Outcome of matching one probe against a gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MatchResult {
    NoMatch,
    Matched {
        person_id: i64,
        person_name: String,
        record_id: Uuid,
        /// Cosine similarity of the winning record [-1, 1].
        similarity: f32,
    },
}

impl MatchResult {
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrollmentRecord], threshold: f32) -> MatchResult;
}

/// Flat-scan cosine similarity matcher.
///
/// Visits every gallery entry. The best similarity must be strictly greater
/// than `threshold`. On equal best similarity the earliest record in gallery
/// order wins.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn compare(&self, probe: &Embedding, gallery: &[EnrollmentRecord], threshold: f32) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, record) in gallery.iter().enumerate() {
            let sim = probe.similarity(&record.embedding);
            // Strict `>` keeps the first-encountered record on ties.
            if sim > best_sim {
                best_sim = sim;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_sim > threshold => {
                let record = &gallery[idx];
                MatchResult::Matched {
                    person_id: record.person_id,
                    person_name: record.person_name.clone(),
                    record_id: record.record_id,
                    similarity: best_sim,
                }
            }
            _ => MatchResult::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(person_id: i64, name: &str, values: &[f32]) -> EnrollmentRecord {
        EnrollmentRecord::new(person_id, name, Embedding::new(values.to_vec()))
    }

    #[test]
    fn test_scans_whole_gallery() {
        // Best match is the last entry
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![
            record(1, "decoy1", &[0.0, 1.0, 0.0]),
            record(2, "decoy2", &[0.0, 0.0, 1.0]),
            record(3, "match", &[1.0, 0.0, 0.0]),
        ];

        let result = CosineMatcher.compare(&probe, &gallery, 0.5);
        match result {
            MatchResult::Matched { person_id, person_name, similarity, record_id } => {
                assert_eq!(person_id, 3);
                assert_eq!(person_name, "match");
                assert_eq!(record_id, gallery[2].record_id);
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            MatchResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_no_match_below_threshold() {
        let probe = Embedding::new(vec![1.0, 0.0, 0.0]);
        let gallery = vec![record(1, "other", &[0.0, 1.0, 0.0])];
        assert_eq!(CosineMatcher.compare(&probe, &gallery, 0.5), MatchResult::NoMatch);
    }

    #[test]
    fn test_empty_gallery() {
        let probe = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(CosineMatcher.compare(&probe, &[], 0.0), MatchResult::NoMatch);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Similarity exactly 0.6: [0.6, 0.8] · [1, 0] over unit norms
        let probe = Embedding::new(vec![1.0, 0.0]);
        let gallery = vec![record(1, "edge", &[0.6, 0.8])];
        let sim = probe.similarity(&gallery[0].embedding);

        assert_eq!(CosineMatcher.compare(&probe, &gallery, sim), MatchResult::NoMatch);

        let just_below = f32::from_bits(sim.to_bits() - 1);
        assert!(CosineMatcher.compare(&probe, &gallery, just_below).is_match());
    }

    #[test]
    fn test_tie_first_inserted_wins() {
        let probe = Embedding::new(vec![1.0, 0.5]);
        let gallery = vec![
            record(7, "first", &[2.0, 1.5]),
            record(8, "second", &[2.0, 1.5]),
        ];
        assert_eq!(
            probe.similarity(&gallery[0].embedding),
            probe.similarity(&gallery[1].embedding)
        );

        match CosineMatcher.compare(&probe, &gallery, 0.0) {
            MatchResult::Matched { person_id, .. } => assert_eq!(person_id, 7),
            MatchResult::NoMatch => panic!("expected a match"),
        }
    }

    #[test]
    fn test_ana_scenario() {
        let gallery = vec![record(1, "Ana", &[1.0, 0.0, 0.0, 0.0])];

        let same = Embedding::new(vec![1.0, 0.0, 0.0, 0.0]);
        match CosineMatcher.compare(&same, &gallery, DEFAULT_SIMILARITY_THRESHOLD) {
            MatchResult::Matched { person_name, similarity, .. } => {
                assert_eq!(person_name, "Ana");
                assert!((similarity - 1.0).abs() < 1e-6);
            }
            MatchResult::NoMatch => panic!("expected Ana"),
        }

        let orthogonal = Embedding::new(vec![0.0, 1.0, 0.0, 0.0]);
        assert_eq!(
            CosineMatcher.compare(&orthogonal, &gallery, DEFAULT_SIMILARITY_THRESHOLD),
            MatchResult::NoMatch
        );
    }
}
