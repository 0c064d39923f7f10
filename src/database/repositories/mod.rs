pub mod fingerprint;
pub mod memory;

pub use fingerprint::FingerprintRepository;
pub use memory::MemoryFingerprintStore;

use super::models::{FingerprintRecord, NewFingerprintRecord};
use super::StoreError;
use std::ops::ControlFlow;

/// Durable keyed storage of fingerprint records.
///
/// Records are append-only: there is no update, and deletion is owned by whoever
/// manages the backing store. Implementations must allow concurrent readers and must
/// let exactly one of several racing inserts on the same id or external key succeed.
pub trait FingerprintStore: Send + Sync {
    /// Insert a record, returning it with `created_at` filled in.
    fn insert(&self, record: NewFingerprintRecord) -> Result<FingerprintRecord, StoreError>;

    /// Insert all records or none of them.
    fn insert_batch(
        &self,
        records: Vec<NewFingerprintRecord>,
    ) -> Result<Vec<FingerprintRecord>, StoreError>;

    fn get_by_id(&self, id: &str) -> Result<FingerprintRecord, StoreError>;

    /// Exact-identity lookup; callers holding an external key should try this before
    /// falling back to fingerprint matching.
    fn get_by_external_key(&self, key: &str) -> Result<FingerprintRecord, StoreError>;

    /// Stream records with `low <= duration_ms <= high` in `(duration_ms, id)` order.
    /// The visitor can stop the stream early by returning `ControlFlow::Break`.
    fn scan_duration_range(
        &self,
        low: i64,
        high: i64,
        visit: &mut dyn FnMut(FingerprintRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError>;

    fn count(&self) -> Result<u64, StoreError>;

    fn range_by_duration(&self, low: i64, high: i64) -> Result<Vec<FingerprintRecord>, StoreError> {
        let mut records = Vec::new();
        self.scan_duration_range(low, high, &mut |record| {
            records.push(record);
            ControlFlow::Continue(())
        })?;
        Ok(records)
    }
}
