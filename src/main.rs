//! cascache maintenance CLI
//!
//! Operates on the persistent (L3) directory of a cache while the
//! application is running or stopped.
//!
//! ```text
//! cascache --dir /var/cache/app inspect
//! cascache --dir /var/cache/app sweep
//! cascache --dir /var/cache/app invalidate --tag recipes
//! cascache --config cache.yaml purge
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cascache::cache::RecordHeader;
use cascache::{CacheConfig, CacheError, CacheOrchestrator, CacheTier, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Inspect and maintain a cascache disk tier
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML or JSON)
    #[arg(long, env = "CASCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// L3 directory (overrides the configuration file)
    #[arg(long, env = "CASCACHE_DIR")]
    dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored records
    Inspect {
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,

        /// Only records carrying this tag
        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete expired records
    Sweep,

    /// Delete one key or every key carrying a tag
    Invalidate {
        #[arg(long, conflicts_with = "tag", required_unless_present = "tag")]
        key: Option<String>,

        #[arg(long)]
        tag: Option<String>,
    },

    /// Delete every record
    Purge,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    let cache: CacheOrchestrator<serde_json::Value> = CacheOrchestrator::new(config).await?;

    match args.command {
        Command::Inspect { json, tag } => inspect(&cache, json, tag.as_deref()).await?,
        Command::Sweep => {
            let report = cache.sweep_expired().await;
            println!("removed {} expired record(s)", report.l3);
        }
        Command::Invalidate { key, tag } => match (key, tag) {
            (Some(key), _) => {
                let removed = cache.invalidate(&key).await;
                println!("{}", if removed { "removed 1 record" } else { "key not found" });
            }
            (None, Some(tag)) => {
                let count = cache.invalidate_tag(&tag).await;
                println!("invalidated {} key(s) tagged '{}'", count, tag);
            }
            (None, None) => {
                return Err(CacheError::Config("pass --key or --tag".into()));
            }
        },
        Command::Purge => {
            cache.clear().await;
            info!(dir = ?cache.config().l3_directory, "Purged cache directory");
            println!("purged");
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> Result<CacheConfig> {
    let base = match &args.config {
        Some(path) => CacheConfig::from_file(path)?,
        None => CacheConfig::default(),
    };

    let dir = args
        .dir
        .clone()
        .or_else(|| base.l3_directory.clone())
        .ok_or_else(|| CacheError::Config("no L3 directory: pass --dir or set l3_directory".into()))?;

    Ok(base
        .with_tiers(&[CacheTier::L3])
        .with_l3(dir)
        .with_sweep_interval(None))
}

#[derive(Serialize)]
struct RecordRow {
    key: String,
    tags: Vec<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    expired: bool,
    compression: String,
    payload_bytes: usize,
}

impl From<RecordHeader> for RecordRow {
    fn from(header: RecordHeader) -> Self {
        Self {
            expired: header.is_expired(),
            key: header.key,
            tags: header.tags.into_iter().collect(),
            created_at: header.created_at,
            expires_at: header.expires_at,
            compression: header.compression.to_string(),
            payload_bytes: header.payload_len,
        }
    }
}

async fn inspect(
    cache: &CacheOrchestrator<serde_json::Value>,
    json: bool,
    tag: Option<&str>,
) -> Result<()> {
    let Some(l3) = cache.l3() else {
        return Err(CacheError::Config("L3 is not enabled".into()));
    };
    let report = l3.scan().await?;

    let rows: Vec<RecordRow> = report
        .records
        .into_iter()
        .filter(|h| tag.map_or(true, |t| h.tags.contains(t)))
        .map(RecordRow::from)
        .collect();

    if json {
        for row in &rows {
            println!("{}", serde_json::to_string(row)?);
        }
        return Ok(());
    }

    for row in &rows {
        let expiry = match row.expires_at {
            Some(at) if row.expired => format!("expired {}", at.to_rfc3339()),
            Some(at) => format!("until {}", at.to_rfc3339()),
            None => "no expiry".to_string(),
        };
        println!(
            "{}  [{}]  {}  {} bytes ({})",
            row.key,
            row.tags.join(","),
            expiry,
            row.payload_bytes,
            row.compression
        );
    }
    println!(
        "{} record(s), {} bytes on disk, {} corrupt record(s) removed",
        rows.len(),
        report.bytes,
        report.healed
    );
    Ok(())
}

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
