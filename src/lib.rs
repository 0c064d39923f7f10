pub mod config;
pub mod core;
pub mod database;
pub mod schema;

pub use crate::config::{AppConfig, ConfigError, MatcherConfig, StoreConfig};
pub use crate::core::cancel::CancellationToken;
pub use crate::core::matcher::{Identification, MatchEngine, MatchQuery};
pub use crate::core::ranker::MatchResult;
pub use crate::core::MatchError;
pub use crate::database::models::{Fingerprint, FingerprintRecord, NewFingerprintRecord, HASH_SLOTS};
pub use crate::database::repositories::{FingerprintRepository, FingerprintStore, MemoryFingerprintStore};
pub use crate::database::StoreError;
