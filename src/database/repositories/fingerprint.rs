use super::{FingerprintStore, StoreError};
use crate::config::StoreConfig;
use crate::database::models::{FingerprintRecord, NewFingerprintRecord, HASH_SLOTS};
use crate::database::{establish_connection, DbConnection, DbPool};
use crate::schema::FINGERPRINT_COLUMNS;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::ops::ControlFlow;

/// SQLite-backed fingerprint store over a pooled connection.
pub struct FingerprintRepository {
    pool: DbPool,
}

impl FingerprintRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::new(establish_connection(config)?))
    }

    fn get_connection(&self) -> Result<DbConnection, StoreError> {
        Ok(self.pool.get()?)
    }

    fn find_one(&self, column: &str, value: &str) -> Result<FingerprintRecord, StoreError> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {} FROM fingerprints WHERE {} = ?1",
            FINGERPRINT_COLUMNS, column
        );

        let record = conn
            .prepare_cached(&sql)?
            .query_row(params![value], record_from_row)
            .optional()?;

        record.ok_or_else(|| StoreError::NotFound(format!("fingerprint with {} '{}'", column, value)))
    }
}

impl FingerprintStore for FingerprintRepository {
    fn insert(&self, record: NewFingerprintRecord) -> Result<FingerprintRecord, StoreError> {
        record.validate()?;

        let conn = self.get_connection()?;
        let now = Utc::now();

        insert_row(&conn, &record, &now).map_err(|e| {
            let err = StoreError::from(e);
            if let StoreError::DuplicateKey(reason) = &err {
                log::warn!("Rejected fingerprint {}: {}", record.id, reason);
            }
            err
        })?;

        log::debug!("Inserted fingerprint {} ({} ms)", record.id, record.duration_ms);
        Ok(record.into_record(now))
    }

    fn insert_batch(
        &self,
        records: Vec<NewFingerprintRecord>,
    ) -> Result<Vec<FingerprintRecord>, StoreError> {
        for record in &records {
            record.validate()?;
        }

        let mut conn = self.get_connection()?;
        let now = Utc::now();

        // Dropping the transaction without commit rolls back every row.
        let tx = conn.transaction()?;
        for record in &records {
            insert_row(&tx, record, &now)?;
        }
        tx.commit()?;

        log::debug!("Inserted batch of {} fingerprints", records.len());
        Ok(records.into_iter().map(|r| r.into_record(now)).collect())
    }

    fn get_by_id(&self, id: &str) -> Result<FingerprintRecord, StoreError> {
        self.find_one("id", id)
    }

    fn get_by_external_key(&self, key: &str) -> Result<FingerprintRecord, StoreError> {
        self.find_one("external_key", key)
    }

    fn scan_duration_range(
        &self,
        low: i64,
        high: i64,
        visit: &mut dyn FnMut(FingerprintRecord) -> ControlFlow<()>,
    ) -> Result<(), StoreError> {
        let conn = self.get_connection()?;
        let sql = format!(
            "SELECT {} FROM fingerprints WHERE duration_ms BETWEEN ?1 AND ?2 ORDER BY duration_ms, id",
            FINGERPRINT_COLUMNS
        );

        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params![low, high])?;
        while let Some(row) = rows.next()? {
            if visit(record_from_row(row)?).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn count(&self) -> Result<u64, StoreError> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fingerprints", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn insert_row(
    conn: &Connection,
    record: &NewFingerprintRecord,
    created_at: &DateTime<Utc>,
) -> rusqlite::Result<usize> {
    // Hashes are stored bit-for-bit in SQLite's signed 64-bit INTEGER.
    let [h0, h1, h2, h3, h4] = record.hash.map(|h| h as i64);

    conn.prepare_cached(&format!(
        "INSERT INTO fingerprints ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        FINGERPRINT_COLUMNS
    ))?
    .execute(params![
        record.id,
        record.duration_ms,
        h0,
        h1,
        h2,
        h3,
        h4,
        record.external_key,
        record.label,
        created_at.to_rfc3339(),
    ])
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FingerprintRecord> {
    let mut hash = [0u64; HASH_SLOTS];
    for (slot, value) in hash.iter_mut().enumerate() {
        *value = row.get::<_, i64>(2 + slot)? as u64;
    }

    let created_at: String = row.get(9)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e)))?;

    Ok(FingerprintRecord {
        id: row.get(0)?,
        duration_ms: row.get(1)?,
        hash,
        external_key: row.get(7)?,
        label: row.get(8)?,
        created_at,
    })
}
