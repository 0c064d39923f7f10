use super::distance::Distances;
use super::MatchError;
use crate::database::models::{FingerprintRecord, HASH_SLOTS};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_AVG_DISTANCE: f64 = 6.0;

/// A candidate that passed the threshold, with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub record: FingerprintRecord,
    /// Mean of `distances`; lower is more similar.
    pub avg_distance: f64,
    pub distances: Distances,
}

/// Mean of the per-slot distances, unrounded.
pub fn average_distance(distances: &Distances) -> f64 {
    distances.iter().sum::<u32>() as f64 / HASH_SLOTS as f64
}

pub fn validate_threshold(max_avg_distance: f64) -> Result<(), MatchError> {
    if !max_avg_distance.is_finite() || max_avg_distance < 0.0 {
        return Err(MatchError::InvalidArgument(format!(
            "max average distance must be a finite value >= 0, got {}",
            max_avg_distance
        )));
    }
    Ok(())
}

/// Scores, filters and orders an evaluated candidate set.
///
/// Output is sorted by ascending average distance; equal averages fall back to
/// ascending record id so repeated requests produce identical lists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateRanker {
    max_avg_distance: f64,
}

impl AggregateRanker {
    pub fn new(max_avg_distance: f64) -> Result<Self, MatchError> {
        validate_threshold(max_avg_distance)?;
        Ok(Self { max_avg_distance })
    }

    pub fn max_avg_distance(&self) -> f64 {
        self.max_avg_distance
    }

    pub fn accepts(&self, avg_distance: f64) -> bool {
        avg_distance <= self.max_avg_distance
    }

    pub fn rank(&self, evaluated: Vec<(FingerprintRecord, Distances)>) -> Vec<MatchResult> {
        let mut kept: Vec<MatchResult> = evaluated
            .into_iter()
            .filter_map(|(record, distances)| {
                let avg_distance = average_distance(&distances);
                self.accepts(avg_distance).then_some(MatchResult {
                    record,
                    avg_distance,
                    distances,
                })
            })
            .collect();

        kept.sort_by(|a, b| {
            a.avg_distance
                .total_cmp(&b.avg_distance)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        kept
    }
}

impl Default for AggregateRanker {
    fn default() -> Self {
        Self {
            max_avg_distance: DEFAULT_MAX_AVG_DISTANCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Fingerprint, NewFingerprintRecord};
    use chrono::Utc;

    fn record(id: &str) -> FingerprintRecord {
        NewFingerprintRecord::new(id, Fingerprint::new(1000, [0; HASH_SLOTS])).into_record(Utc::now())
    }

    #[test]
    fn test_average_is_exact() {
        assert_eq!(average_distance(&[0, 2, 4, 6, 8]), 4.0);
        assert_eq!(average_distance(&[0, 0, 0, 0, 2]), 0.4);
        assert_eq!(average_distance(&[64; HASH_SLOTS]), 64.0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let ranker = AggregateRanker::new(6.0).unwrap();
        // sum 30 -> 6.0 exactly; sum 31 -> 6.2
        let ranked = ranker.rank(vec![
            (record("at"), [6, 6, 6, 6, 6]),
            (record("over"), [6, 6, 6, 6, 7]),
        ]);

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].record.id, "at");
        assert_eq!(ranked[0].avg_distance, 6.0);
    }

    #[test]
    fn test_accepts_boundary() {
        let ranker = AggregateRanker::new(6.0).unwrap();
        assert!(ranker.accepts(6.0));
        assert!(ranker.accepts(5.8));
        assert!(!ranker.accepts(6.01));
    }

    #[test]
    fn test_fractional_threshold_excludes_just_above() {
        // 6.0 passes a 6.0 threshold but not a 5.99 one.
        let candidates = vec![(record("six"), [6, 6, 6, 6, 6])];
        assert_eq!(AggregateRanker::new(6.0).unwrap().rank(candidates.clone()).len(), 1);
        assert!(AggregateRanker::new(5.99).unwrap().rank(candidates).is_empty());
    }

    #[test]
    fn test_orders_by_average_then_id() {
        let ranked = AggregateRanker::default().rank(vec![
            (record("zeta"), [1, 1, 1, 1, 1]),
            (record("beta"), [2, 2, 2, 2, 2]),
            (record("alpha"), [1, 1, 1, 1, 1]),
            (record("exact"), [0, 0, 0, 0, 0]),
        ]);

        let ids: Vec<&str> = ranked.iter().map(|m| m.record.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "alpha", "zeta", "beta"]);
    }

    #[test]
    fn test_ranking_is_independent_of_input_order() {
        let forward = vec![
            (record("b"), [3, 0, 0, 0, 0]),
            (record("a"), [0, 0, 3, 0, 0]),
            (record("c"), [1, 0, 0, 0, 0]),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let ranker = AggregateRanker::default();
        assert_eq!(ranker.rank(forward), ranker.rank(backward));
    }

    #[test]
    fn test_empty_input_yields_empty_output() {
        assert!(AggregateRanker::default().rank(Vec::new()).is_empty());
    }

    #[test]
    fn test_rejects_invalid_thresholds() {
        assert!(matches!(AggregateRanker::new(-0.1), Err(MatchError::InvalidArgument(_))));
        assert!(matches!(AggregateRanker::new(f64::NAN), Err(MatchError::InvalidArgument(_))));
        assert!(matches!(AggregateRanker::new(f64::INFINITY), Err(MatchError::InvalidArgument(_))));
        assert!(AggregateRanker::new(0.0).is_ok());
    }
}
