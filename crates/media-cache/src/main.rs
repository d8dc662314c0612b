//! media-cache CLI
//!
//! Drives the two-tier media cache from the command line. Configuration
//! comes from environment variables (see `CacheConfig::from_env`).

use clap::{Parser, Subcommand};
use media_cache::{CacheConfig, CacheError, CacheFacade, MediaRecord, Priority, Result};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "media-cache")]
#[command(about = "Fetch, cache and thumbnail remote media", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch a blob through the cache
    Get {
        url: String,

        /// high, normal or low
        #[arg(long, default_value = "normal")]
        priority: Priority,

        /// Write the payload to this file
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Get a thumbnail, falling back to the original
    Thumb {
        url: String,

        /// Longer edge in pixels (default: MEDIA_CACHE_THUMBNAIL_SIZE)
        #[arg(long)]
        size: Option<u32>,

        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Warm the cache from a JSON array of media records
    Warm { manifest: PathBuf },
    /// Print cache statistics as JSON
    Stats,
    /// Empty every cache tier
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::from_default_env().add_directive("media_cache=info".parse()?);

    // Use JSON format for Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = CacheConfig::from_env();
    info!(
        cache_dir = ?config.cache_dir,
        ttl_secs = config.persist_ttl_secs,
        durable_max_mb = config.durable_max_bytes / (1024 * 1024),
        "Opening media cache"
    );
    let thumbnail_size = config.thumbnail_size;
    let cache = CacheFacade::new(config).await?;

    let code = match cli.command {
        Command::Get { url, priority, out } => {
            let blob = cache.get_blob(&url, priority).await;
            emit(blob.as_deref(), out.as_deref(), &url).await?
        }
        Command::Thumb { url, size, out } => {
            let size = size.unwrap_or(thumbnail_size);
            let thumb = cache.get_thumbnail(&url, size).await;
            emit(thumb.as_deref(), out.as_deref(), &url).await?
        }
        Command::Warm { manifest } => {
            let raw = tokio::fs::read(&manifest).await?;
            let mut recent: Vec<MediaRecord> = serde_json::from_slice(&raw)?;
            let frequent = recent.split_off(recent.len().div_ceil(2));

            let report = cache
                .warm_up(&recent, frequent)
                .await
                .await
                .map_err(|e| CacheError::Config(format!("warm-up task failed: {}", e)))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            ExitCode::SUCCESS
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&cache.stats().await)?);
            ExitCode::SUCCESS
        }
        Command::Clear => {
            cache.clear().await;
            println!("Cache cleared");
            ExitCode::SUCCESS
        }
    };

    cache.shutdown();
    Ok(code)
}

async fn emit(payload: Option<&[u8]>, out: Option<&Path>, url: &str) -> Result<ExitCode> {
    let Some(payload) = payload else {
        eprintln!("Failed to load {}", url);
        return Ok(ExitCode::FAILURE);
    };

    match out {
        Some(path) => {
            tokio::fs::write(path, payload).await?;
            println!("Wrote {} bytes to {}", payload.len(), path.display());
        }
        None => println!("{} bytes", payload.len()),
    }
    Ok(ExitCode::SUCCESS)
}
