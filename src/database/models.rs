use super::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of perceptual hashes in a fingerprint.
pub const HASH_SLOTS: usize = 5;

/// Relative temporal offsets each hash slot was sampled at, as a fraction of duration.
pub const SAMPLE_OFFSETS: [f64; HASH_SLOTS] = [0.10, 0.25, 0.50, 0.75, 0.90];

/// A media duration plus the ordered perceptual hashes sampled across it.
///
/// Slot `i` is only ever compared against slot `i` of another fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub duration_ms: i64,
    pub hash: [u64; HASH_SLOTS],
}

impl Fingerprint {
    pub fn new(duration_ms: i64, hash: [u64; HASH_SLOTS]) -> Self {
        Self { duration_ms, hash }
    }

    /// Build a fingerprint from an unchecked hash list, as received at an API boundary.
    pub fn from_slice(duration_ms: i64, hashes: &[u64]) -> Result<Self, StoreError> {
        let hash: [u64; HASH_SLOTS] = hashes.try_into().map_err(|_| {
            StoreError::InvalidArgument(format!(
                "expected {} hash slots, got {}",
                HASH_SLOTS,
                hashes.len()
            ))
        })?;

        let fingerprint = Self { duration_ms, hash };
        fingerprint.validate()?;
        Ok(fingerprint)
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.duration_ms < 0 {
            return Err(StoreError::InvalidArgument(format!(
                "duration must be >= 0, got {}",
                self.duration_ms
            )));
        }
        Ok(())
    }
}

/// A stored fingerprint. Never updated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub id: String,
    pub duration_ms: i64,
    pub hash: [u64; HASH_SLOTS],
    pub external_key: Option<String>,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FingerprintRecord {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.duration_ms, self.hash)
    }
}

/// Insert payload. The id is chosen by the caller; `created_at` is set by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewFingerprintRecord {
    pub id: String,
    pub duration_ms: i64,
    pub hash: [u64; HASH_SLOTS],
    pub external_key: Option<String>,
    pub label: Option<String>,
}

impl NewFingerprintRecord {
    pub fn new(id: impl Into<String>, fingerprint: Fingerprint) -> Self {
        Self {
            id: id.into(),
            duration_ms: fingerprint.duration_ms,
            hash: fingerprint.hash,
            external_key: None,
            label: None,
        }
    }

    pub fn with_external_key(mut self, key: impl Into<String>) -> Self {
        self.external_key = Some(key.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if self.id.trim().is_empty() {
            return Err(StoreError::InvalidArgument("record id must not be empty".to_string()));
        }
        if matches!(self.external_key.as_deref(), Some(key) if key.is_empty()) {
            return Err(StoreError::InvalidArgument(
                "external key must be absent or non-empty".to_string(),
            ));
        }
        Fingerprint::new(self.duration_ms, self.hash).validate()
    }

    pub fn into_record(self, created_at: DateTime<Utc>) -> FingerprintRecord {
        FingerprintRecord {
            id: self.id,
            duration_ms: self.duration_ms,
            hash: self.hash,
            external_key: self.external_key,
            label: self.label,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_rejects_wrong_slot_count() {
        let err = Fingerprint::from_slice(1000, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let err = Fingerprint::from_slice(1000, &[1, 2, 3, 4, 5, 6]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));

        let fp = Fingerprint::from_slice(1000, &[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(fp.hash, [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_negative_duration_is_invalid() {
        assert!(Fingerprint::from_slice(-1, &[0; HASH_SLOTS]).is_err());
        assert!(Fingerprint::new(0, [0; HASH_SLOTS]).validate().is_ok());
    }

    #[test]
    fn test_new_record_validation() {
        let fp = Fingerprint::new(60_000, [1; HASH_SLOTS]);

        assert!(NewFingerprintRecord::new("rec-1", fp).validate().is_ok());
        assert!(NewFingerprintRecord::new("  ", fp).validate().is_err());
        assert!(NewFingerprintRecord::new("rec-1", fp)
            .with_external_key("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_into_record_keeps_fields() {
        let fp = Fingerprint::new(42, [9, 8, 7, 6, 5]);
        let now = Utc::now();
        let record = NewFingerprintRecord::new("rec-1", fp)
            .with_external_key("yt:abc")
            .with_label("clip")
            .into_record(now);

        assert_eq!(record.fingerprint(), fp);
        assert_eq!(record.external_key.as_deref(), Some("yt:abc"));
        assert_eq!(record.label.as_deref(), Some("clip"));
        assert_eq!(record.created_at, now);
    }
}
