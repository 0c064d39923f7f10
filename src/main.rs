use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use fingermatch::{
    AppConfig, CancellationToken, Fingerprint, FingerprintRepository, FingerprintStore, Identification,
    MatchEngine, NewFingerprintRecord, HASH_SLOTS,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fingermatch", version, about = "Store and match media fingerprints")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides the config)
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store a fingerprint
    Insert {
        /// Record id (default: random UUID)
        #[arg(long)]
        id: Option<String>,
        #[arg(long)]
        duration_ms: i64,
        /// Five comma-separated hashes, hex (0x...) or decimal
        #[arg(long, value_name = "H1,..,H5")]
        hash: String,
        #[arg(long)]
        external_key: Option<String>,
        #[arg(long)]
        label: Option<String>,
    },

    /// Fetch a record by id
    Get {
        #[arg(long)]
        id: String,
    },

    /// Fetch a record by external key
    Lookup {
        #[arg(long)]
        external_key: String,
    },

    /// Find stored fingerprints similar to the given one
    Match {
        #[arg(long)]
        duration_ms: i64,
        /// Five comma-separated hashes, hex (0x...) or decimal
        #[arg(long, value_name = "H1,..,H5")]
        hash: String,
        /// Inclusive threshold (default from config)
        #[arg(long)]
        max_avg_distance: Option<f64>,
        #[arg(long)]
        limit: Option<usize>,
        /// Abort the request after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Try an exact external-key lookup first
        #[arg(long)]
        external_key: Option<String>,
    },

    /// Show store statistics
    Stats,
}

#[derive(Serialize)]
struct Stats<'a> {
    records: u64,
    database: PathBuf,
    config: &'a AppConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::default(),
    };
    if let Some(db) = cli.db {
        config.store.database_path = Some(db);
    }
    let database = match &config.store.database_path {
        Some(path) => path.clone(),
        None => fingermatch::database::get_database_path()?,
    };
    config.store.database_path = Some(database.clone());

    let repo = benchmark("opening store", || FingerprintRepository::open(&config.store))
        .with_context(|| format!("Failed to open store at {}", database.display()))?;

    match cli.command {
        Commands::Insert {
            id,
            duration_ms,
            hash,
            external_key,
            label,
        } => {
            let fingerprint = Fingerprint::from_slice(duration_ms, &parse_hashes(&hash)?)?;
            let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let mut record = NewFingerprintRecord::new(id, fingerprint);
            if let Some(key) = external_key {
                record = record.with_external_key(key);
            }
            if let Some(label) = label {
                record = record.with_label(label);
            }

            println!("▶ Inserting {}", record.id);
            let stored = repo.insert(record)?;
            print_json(&stored)?;
        }

        Commands::Get { id } => {
            print_json(&repo.get_by_id(&id)?)?;
        }

        Commands::Lookup { external_key } => {
            print_json(&repo.get_by_external_key(&external_key)?)?;
        }

        Commands::Match {
            duration_ms,
            hash,
            max_avg_distance,
            limit,
            timeout_ms,
            external_key,
        } => {
            let fingerprint = Fingerprint::from_slice(duration_ms, &parse_hashes(&hash)?)?;
            let engine = Arc::new(MatchEngine::new(Arc::new(repo), config.matcher.clone())?);

            let mut query = engine.query(fingerprint);
            if let Some(threshold) = max_avg_distance {
                query.max_avg_distance = threshold;
            }
            query.limit = limit;

            let cancel = match timeout_ms {
                Some(ms) => CancellationToken::with_timeout(Duration::from_millis(ms)),
                None => CancellationToken::new(),
            };

            println!(
                "▶ Matching {} ms fingerprint (tolerance ±{} ms, max avg distance {})",
                duration_ms, config.matcher.duration_tolerance_ms, query.max_avg_distance
            );

            let start = Instant::now();
            let identification = match external_key {
                Some(key) => {
                    let engine = Arc::clone(&engine);
                    let cancel = cancel.clone();
                    tokio::task::spawn_blocking(move || engine.identify(Some(key.as_str()), &query, &cancel))
                        .await
                        .context("Match task failed")??
                }
                None => Identification::ByFingerprint(engine.find_matches_async(query, cancel).await?),
            };
            println!("⏱ matching took {:.2?}", start.elapsed());

            match &identification {
                Identification::ByExternalKey(record) => {
                    println!("Resolved by external key: {}", record.id);
                }
                Identification::ByFingerprint(results) if results.is_empty() => {
                    println!("No matches found.");
                }
                Identification::ByFingerprint(results) => {
                    println!("Found {} match(es):", results.len());
                    for m in results {
                        println!("   ▶ {} (avg {:.2}, {:?})", m.record.id, m.avg_distance, m.distances);
                    }
                }
            }
            print_json(&identification)?;
        }

        Commands::Stats => {
            let records = repo.count()?;
            print_json(&Stats {
                records,
                database,
                config: &config,
            })?;
        }
    }

    Ok(())
}

/// Parse `h1,..,h5`; each hash is hex with a `0x` prefix, bare hex, or decimal.
fn parse_hashes(raw: &str) -> Result<Vec<u64>> {
    let hashes = raw
        .split(',')
        .map(|part| parse_hash(part.trim()))
        .collect::<Result<Vec<u64>>>()?;

    if hashes.len() != HASH_SLOTS {
        bail!("expected {} hashes, got {}", HASH_SLOTS, hashes.len());
    }
    Ok(hashes)
}

fn parse_hash(part: &str) -> Result<u64> {
    if let Some(hex) = part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")) {
        return u64::from_str_radix(hex, 16).with_context(|| format!("Invalid hex hash '{}'", part));
    }
    if let Ok(value) = part.parse::<u64>() {
        return Ok(value);
    }
    u64::from_str_radix(part, 16).with_context(|| format!("Invalid hash '{}'", part))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> T {
    let start = Instant::now();
    let result = f();
    log::debug!("{} took {:.2?}", label, start.elapsed());
    result
}
