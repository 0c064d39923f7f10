// Fingerprint table DDL. Applied idempotently when a pool is created.

pub const CREATE_FINGERPRINTS: &str = "
CREATE TABLE IF NOT EXISTS fingerprints (
    id           TEXT PRIMARY KEY NOT NULL,
    duration_ms  INTEGER NOT NULL CHECK (duration_ms >= 0),
    hash_0       INTEGER NOT NULL,
    hash_1       INTEGER NOT NULL,
    hash_2       INTEGER NOT NULL,
    hash_3       INTEGER NOT NULL,
    hash_4       INTEGER NOT NULL,
    external_key TEXT UNIQUE,
    label        TEXT,
    created_at   TEXT NOT NULL
)";

// Candidate selection is a range scan on duration; without this index it degrades
// to a full table scan.
pub const CREATE_DURATION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_fingerprints_duration ON fingerprints(duration_ms, id)";

pub const FINGERPRINT_COLUMNS: &str =
    "id, duration_ms, hash_0, hash_1, hash_2, hash_3, hash_4, external_key, label, created_at";

pub fn statements() -> [&'static str; 2] {
    [CREATE_FINGERPRINTS, CREATE_DURATION_INDEX]
}
