pub mod models;
pub mod repositories;

use crate::config::StoreConfig;
use crate::schema;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::ErrorCode;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Error kinds every store backend maps its native failures onto.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store unavailable: {0}")]
    Connectivity(String),
}

impl StoreError {
    /// Only connectivity failures are worth retrying; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connectivity(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        match &err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(err.to_string()),
            rusqlite::Error::SqliteFailure(code, _) if code.code == ErrorCode::ConstraintViolation => {
                match code.extended_code {
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                        StoreError::DuplicateKey(err.to_string())
                    }
                    ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                        StoreError::InvalidArgument(err.to_string())
                    }
                    _ => StoreError::Connectivity(err.to_string()),
                }
            }
            _ => StoreError::Connectivity(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Connectivity(format!("Pool connection failed: {}", err))
    }
}

/// Open (creating if needed) the database described by `config` and apply the schema.
pub fn establish_connection(config: &StoreConfig) -> Result<DbPool, StoreError> {
    let path = match &config.database_path {
        Some(path) => path.clone(),
        None => get_database_path()?,
    };
    open_pool(&path, config)
}

pub fn open_pool(path: &Path, config: &StoreConfig) -> Result<DbPool, StoreError> {
    let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

    // WAL lets readers proceed against a snapshot while a writer commits.
    let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    });

    let pool = Pool::builder().max_size(config.pool_size).build(manager)?;

    let conn = pool.get()?;
    for statement in schema::statements() {
        conn.execute(statement, [])?;
    }

    log::info!(
        "Opened fingerprint store at {} (pool size {})",
        path.display(),
        config.pool_size
    );
    Ok(pool)
}

pub fn get_database_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| StoreError::Connectivity("Could not find data directory".to_string()))?;

    let app_dir = data_dir.join("fingermatch");
    std::fs::create_dir_all(&app_dir).map_err(|e| {
        StoreError::Connectivity(format!("Could not create app directory: {}", e))
    })?;

    Ok(app_dir.join("fingerprints.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(path: PathBuf) -> StoreConfig {
        StoreConfig {
            database_path: Some(path),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_database_connection() {
        let temp_dir = tempdir().unwrap();
        let pool = establish_connection(&test_config(temp_dir.path().join("test.db"))).unwrap();
        let conn = pool.get().unwrap();

        let result: i32 = conn.query_row("SELECT 1", [], |row| row.get(0)).unwrap();
        assert_eq!(result, 1);

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_schema_creates_duration_index() {
        let temp_dir = tempdir().unwrap();
        let pool = establish_connection(&test_config(temp_dir.path().join("test.db"))).unwrap();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_fingerprints_duration'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(temp_dir.path().join("test.db"));

        establish_connection(&config).unwrap();
        assert!(establish_connection(&config).is_ok());
    }

    #[test]
    fn test_constraint_errors_map_to_kinds() {
        let temp_dir = tempdir().unwrap();
        let pool = establish_connection(&test_config(temp_dir.path().join("test.db"))).unwrap();
        let conn = pool.get().unwrap();

        let insert = "INSERT INTO fingerprints (id, duration_ms, hash_0, hash_1, hash_2, hash_3, hash_4, external_key, created_at)
                      VALUES (?1, ?2, 0, 0, 0, 0, 0, ?3, '2024-01-01T00:00:00+00:00')";

        conn.execute(insert, rusqlite::params!["a", 10, "key"]).unwrap();

        let dup_id = StoreError::from(conn.execute(insert, rusqlite::params!["a", 10, "other"]).unwrap_err());
        assert!(matches!(dup_id, StoreError::DuplicateKey(_)));

        let dup_key = StoreError::from(conn.execute(insert, rusqlite::params!["b", 10, "key"]).unwrap_err());
        assert!(matches!(dup_key, StoreError::DuplicateKey(_)));

        let negative = StoreError::from(conn.execute(insert, rusqlite::params!["c", -5, "k2"]).unwrap_err());
        assert!(matches!(negative, StoreError::InvalidArgument(_)));

        let missing = StoreError::from(
            conn.query_row("SELECT id FROM fingerprints WHERE id = 'zzz'", [], |row| {
                row.get::<_, String>(0)
            })
            .unwrap_err(),
        );
        assert!(matches!(missing, StoreError::NotFound(_)));
    }

    #[test]
    fn test_only_connectivity_is_transient() {
        assert!(StoreError::Connectivity("down".into()).is_transient());
        assert!(!StoreError::DuplicateKey("k".into()).is_transient());
        assert!(!StoreError::NotFound("k".into()).is_transient());
        assert!(!StoreError::InvalidArgument("k".into()).is_transient());
    }
}
