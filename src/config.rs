use crate::core::candidate::DEFAULT_DURATION_TOLERANCE_MS;
use crate::core::ranker::DEFAULT_MAX_AVG_DISTANCE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub store: StoreConfig,
    pub matcher: MatcherConfig,
}

impl AppConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.matcher.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Falls back to the per-user data directory when unset.
    pub database_path: Option<PathBuf>,
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("store.pool_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            pool_size: 10,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Half-width of the inclusive duration window around the query duration.
    pub duration_tolerance_ms: i64,
    /// Threshold used when a request does not carry its own.
    pub max_avg_distance: f64,
    /// Size of the distance-evaluation worker pool.
    pub worker_threads: usize,
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.duration_tolerance_ms < 0 {
            return Err(ConfigError::Invalid(format!(
                "matcher.duration_tolerance_ms must be >= 0, got {}",
                self.duration_tolerance_ms
            )));
        }
        if !self.max_avg_distance.is_finite() || self.max_avg_distance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "matcher.max_avg_distance must be a finite value >= 0, got {}",
                self.max_avg_distance
            )));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "matcher.worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_ms: DEFAULT_DURATION_TOLERANCE_MS,
            max_avg_distance: DEFAULT_MAX_AVG_DISTANCE,
            worker_threads: num_cpus::get(),
        }
    }
}
