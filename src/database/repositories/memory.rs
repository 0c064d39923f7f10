use super::{FingerprintStore, StoreError};
use crate::database::models::{FingerprintRecord, NewFingerprintRecord};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Inner {
    by_id: HashMap<String, FingerprintRecord>,
    by_external_key: HashMap<String, String>,
    by_duration: BTreeMap<i64, BTreeSet<String>>,
}

impl Inner {
    fn check_conflicts(&self, record: &NewFingerprintRecord) -> Result<(), StoreError> {
        if self.by_id.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(format!("id '{}'", record.id)));
        }
        if let Some(key) = &record.external_key {
            if self.by_external_key.contains_key(key) {
                return Err(StoreError::DuplicateKey(format!("external key '{}'", key)));
            }
        }
        Ok(())
    }

    fn put(&mut self, record: FingerprintRecord) {
        if let Some(key) = &record.external_key {
            self.by_external_key.insert(key.clone(), record.id.clone());
        }
        self.by_duration
            .entry(record.duration_ms)
            .or_default()
            .insert(record.id.clone());
        self.by_id.insert(record.id.clone(), record);
    }
}

/// In-process fingerprint store. Readers share the lock; inserts take it exclusively,
/// which is what makes the uniqueness checks race-free.
#[derive(Debug, Default)]
pub struct MemoryFingerprintStore {
    inner: RwLock<Inner>,
}

impl MemoryFingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Connectivity("Poisoned lock".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Connectivity("Poisoned lock".to_string()))
    }
}

impl FingerprintStore for MemoryFingerprintStore {
    fn insert(&self, record: NewFingerprintRecord) -> Result<FingerprintRecord, StoreError> {
        record.validate()?;

        let mut inner = self.write()?;
        inner.check_conflicts(&record)?;

        let stored = record.into_record(Utc::now());
        inner.put(stored.clone());
        Ok(stored)
    }

    fn insert_batch(
        &self,
        records: Vec<NewFingerprintRecord>,
    ) -> Result<Vec<FingerprintRecord>, StoreError> {
        for record in &records {
            record.validate()?;
        }

        let mut inner = self.write()?;

        // Check the whole batch, including against itself, before touching any index.
        let mut batch_ids = HashSet::new();
        let mut batch_keys = HashSet::new();
        for record in &records {
            inner.check_conflicts(record)?;
            if !batch_ids.insert(record.id.as_str()) {
                return Err(StoreError::DuplicateKey(format!("id '{}'", record.id)));
            }
            if let Some(key) = &record.external_key {
                if !batch_keys.insert(key.as_str()) {
                    return Err(StoreError::DuplicateKey(format!("external key '{}'", key)));
                }
            }
        }

        let now = Utc::now();
        let stored: Vec<FingerprintRecord> = records.into_iter().map(|r| r.into_record(now)).collect();
        for record in &stored {
            inner.put(record.clone());
        }
        Ok(stored)
    }

    fn get_by_id(&self, id: &str) -> Result<FingerprintRecord, StoreError> {
        self.read()?
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("fingerprint with id '{}'", id)))
    }

    fn get_by_external_key(&self, key: &str) -> Result<FingerprintRecord, StoreError> {
        let inner = self.read()?;
        inner
            .by_external_key
            .get(key)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("fingerprint with external_key '{}'", key)))
    }

    fn scan_duration_range(
        &self,
        low: i64,
        high: i64,
        visit: &mut dyn FnMut(FingerprintRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        if low > high {
            return Ok(());
        }

        let inner = self.read()?;
        for ids in inner.by_duration.range(low..=high).map(|(_, ids)| ids) {
            for id in ids {
                if let Some(record) = inner.by_id.get(id) {
                    if visit(record.clone()).is_break() {
                        return Ok(());
                    }
                }
            }
        }
        Ok(())
    }

    fn count(&self) -> Result<u64, StoreError> {
        Ok(self.read()?.by_id.len() as u64)
    }
}
