use super::cancel::CancellationToken;
use super::MatchError;
use crate::database::models::FingerprintRecord;
use crate::database::repositories::FingerprintStore;
use std::ops::ControlFlow;

pub const DEFAULT_DURATION_TOLERANCE_MS: i64 = 100;

/// Narrows the search to records whose duration lies within `[D - T, D + T]`,
/// both ends inclusive. The range itself is answered by the store's duration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateSelector {
    tolerance_ms: i64,
}

impl CandidateSelector {
    pub fn new(tolerance_ms: i64) -> Self {
        debug_assert!(tolerance_ms >= 0, "tolerance must be non-negative");
        Self {
            tolerance_ms: tolerance_ms.max(0),
        }
    }

    pub fn tolerance_ms(&self) -> i64 {
        self.tolerance_ms
    }

    pub fn window(&self, duration_ms: i64) -> (i64, i64) {
        (
            duration_ms.saturating_sub(self.tolerance_ms).max(0),
            duration_ms.saturating_add(self.tolerance_ms),
        )
    }

    /// Collect the candidate set, aborting as soon as `cancel` fires while the store
    /// is still streaming rows.
    pub fn select<S: FingerprintStore + ?Sized>(
        &self,
        store: &S,
        duration_ms: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<FingerprintRecord>, MatchError> {
        let (low, high) = self.window(duration_ms);
        let mut candidates = Vec::new();
        let mut aborted = false;

        store.scan_duration_range(low, high, &mut |record| {
            if cancel.is_cancelled() {
                aborted = true;
                return ControlFlow::Break(());
            }
            candidates.push(record);
            ControlFlow::Continue(())
        })?;

        if aborted || cancel.is_cancelled() {
            log::debug!(
                "Candidate scan [{}, {}] cancelled after {} rows",
                low,
                high,
                candidates.len()
            );
            return Err(MatchError::Cancelled);
        }

        log::debug!("Candidate scan [{}, {}] yielded {} rows", low, high, candidates.len());
        Ok(candidates)
    }
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_TOLERANCE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{Fingerprint, NewFingerprintRecord, HASH_SLOTS};
    use crate::database::repositories::MemoryFingerprintStore;
    use crate::database::StoreError;

    fn store_with(durations: &[(&str, i64)]) -> MemoryFingerprintStore {
        let store = MemoryFingerprintStore::new();
        for (id, duration) in durations {
            store
                .insert(NewFingerprintRecord::new(*id, Fingerprint::new(*duration, [0; HASH_SLOTS])))
                .unwrap();
        }
        store
    }

    struct UnreachableStore;

    impl FingerprintStore for UnreachableStore {
        fn insert(&self, _: NewFingerprintRecord) -> Result<FingerprintRecord, StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
        fn insert_batch(&self, _: Vec<NewFingerprintRecord>) -> Result<Vec<FingerprintRecord>, StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
        fn get_by_id(&self, _: &str) -> Result<FingerprintRecord, StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
        fn get_by_external_key(&self, _: &str) -> Result<FingerprintRecord, StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
        fn scan_duration_range(
            &self,
            _: i64,
            _: i64,
            _: &mut dyn FnMut(FingerprintRecord) -> ControlFlow<()>,
        ) -> Result<(), StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
        fn count(&self) -> Result<u64, StoreError> {
            Err(StoreError::Connectivity("offline".into()))
        }
    }

    #[test]
    fn test_window_boundaries_inclusive() {
        let store = store_with(&[("low", 900), ("edge", 1100), ("over", 1101), ("under", 899)]);
        let selector = CandidateSelector::new(100);

        let ids: Vec<String> = selector
            .select(&store, 1000, &CancellationToken::new())
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["low", "edge"]);
    }

    #[test]
    fn test_window_clamps_at_zero() {
        let selector = CandidateSelector::default();
        assert_eq!(selector.window(40), (0, 140));
        assert_eq!(selector.window(i64::MAX), (i64::MAX - 100, i64::MAX));
    }

    #[test]
    fn test_empty_window_is_not_an_error() {
        let store = store_with(&[("far", 90_000)]);
        let candidates = CandidateSelector::default()
            .select(&store, 1000, &CancellationToken::new())
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_cancelled_scan_returns_cancelled() {
        let store = store_with(&[("a", 1000), ("b", 1000)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = CandidateSelector::default()
            .select(&store, 1000, &cancel)
            .unwrap_err();
        assert_eq!(err, MatchError::Cancelled);
    }

    #[test]
    fn test_store_failure_surfaces_unchanged() {
        let err = CandidateSelector::default()
            .select(&UnreachableStore, 1000, &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err, MatchError::Store(StoreError::Connectivity("offline".into())));
    }
}
