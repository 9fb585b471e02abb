//! tracklog CLI: ingest Gno events into rotating JSONL logs.
//!
//! # Commands
//! ```text
//! tracklog run    --config <file>
//! tracklog status --config <file> [--track <id>]
//! tracklog info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;

use tracklog_core::checkpoint::{StateManager, DEFAULT_AUTO_SAVE_EVERY};
use tracklog_core::config::{AppConfig, StorageConfig, TrackConfig, WriterTuning, DEFAULT_TRACK_INTERVAL_SECS};
use tracklog_core::epoch::{EpochChange, EpochDetector, DEFAULT_CHECK_INTERVAL};
use tracklog_core::fs::OsStorage;
use tracklog_core::source::ChainSource;
use tracklog_core::writer::EventWriter;
use tracklog_gno::{ClientConfig, GnoClient, RetryConfig, WorkerBuilder};
use tracklog_storage::Backend;

mod logging;
mod telemetry;

#[derive(Parser)]
#[command(
    name = "tracklog",
    about = "Poll a Gno transaction indexer and append matching events to JSONL logs",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one worker per configured track until Ctrl-C
    Run {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "tracklog.toml")]
        config: PathBuf,
    },

    /// Print the saved checkpoint of each track
    Status {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "tracklog.toml")]
        config: PathBuf,
        /// Only this track
        #[arg(long)]
        track: Option<String>,
    },

    /// Show defaults and the on-disk layout
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => cmd_run(&config).await,
        Commands::Status { config, track } => cmd_status(&config, track.as_deref()),
        Commands::Info => cmd_info(),
    }
}

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading config {}", path.display()))
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_run(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    logging::init_tracing(&config.log)?;

    let provider = telemetry::init_metrics(&config.metrics)?;
    let metrics = Arc::new(telemetry::tracklog_metrics(&provider));
    let client = GnoClient::http(
        config.endpoint.clone(),
        ClientConfig {
            retry: RetryConfig {
                max_retries: config.max_retries,
                ..Default::default()
            },
            request_timeout: config.request_timeout(),
        },
    )
    .context("building query client")?
    .with_metrics(metrics.clone());
    let source: Arc<dyn ChainSource> = Arc::new(client);

    if config.storage == StorageConfig::Memory {
        tracing::warn!("memory storage selected, nothing will outlive this process");
    }
    let backend = Backend::from_config(&config.storage, config.writer);
    let cancel = CancellationToken::new();

    let mut writers = Vec::with_capacity(config.tracks.len());
    let mut tasks = Vec::with_capacity(config.tracks.len());
    for track in &config.tracks {
        let writer = Arc::new(
            backend
                .open_track(&track.id, metrics.clone())
                .with_context(|| format!("opening track {:?}", track.id))?,
        );
        let mut worker = WorkerBuilder::from_track(track)
            .metrics(metrics.clone())
            .build(source.clone(), writer.clone());
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { worker.run(token).await }));
        writers.push(writer);
    }

    let detector = if config.epoch_check_seconds > 0 {
        let detector = Arc::new(
            EpochDetector::new(source.clone())
                .with_interval(Duration::from_secs(config.epoch_check_seconds)),
        );
        detector
            .add_listener(Arc::new(|change: EpochChange| {
                tracing::warn!(
                    old_epoch = change.old,
                    new_epoch = change.new,
                    "chain reset observed, tracks restart on their next poll"
                );
            }))
            .await;
        Some(tokio::spawn(detector.run(cancel.clone())))
    } else {
        None
    };

    tracing::info!(
        endpoint = %config.endpoint,
        tracks = config.tracks.len(),
        storage = %config.storage.base_path().display(),
        otlp = config.metrics.otlp_endpoint.as_deref().unwrap_or("off"),
        "tracklog running"
    );

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    tracing::info!("shutdown requested");
    cancel.cancel();

    for joined in join_all(tasks).await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "worker stopped with error"),
            Err(e) => tracing::error!(error = %e, "worker task failed"),
        }
    }
    if let Some(handle) = detector {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "epoch detector task failed");
        }
    }
    for writer in &writers {
        if let Err(e) = writer.close().await {
            tracing::warn!(track = writer.track_id(), error = %e, "closing writer failed");
        }
    }

    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "shutting down meter provider failed");
    }
    tracing::info!("tracklog stopped");
    Ok(())
}

fn cmd_status(path: &Path, track: Option<&str>) -> Result<()> {
    let config = load_config(path)?;
    let base = match &config.storage {
        StorageConfig::Disk { path } => path.clone(),
        StorageConfig::Memory => bail!("memory storage keeps no checkpoints to inspect"),
    };

    let tracks: Vec<&TrackConfig> = match track {
        Some(id) => vec![config
            .track(id)
            .ok_or_else(|| anyhow!("no track {id:?} in {}", path.display()))?],
        None => config.tracks.iter().collect(),
    };

    for t in tracks {
        let mut state = StateManager::new(Arc::new(OsStorage), &base, &t.id);
        state
            .load()
            .with_context(|| format!("reading checkpoint of {:?}", t.id))?;
        println!("{}", serde_json::to_string_pretty(&state.state())?);
    }
    Ok(())
}

fn cmd_info() -> Result<()> {
    let writer = WriterTuning::default();
    let retry = RetryConfig::default();
    println!("tracklog v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Defaults:");
    println!("  Poll interval:          {DEFAULT_TRACK_INTERVAL_SECS}s per track");
    println!(
        "  Query retries:          {} (linear backoff, {}s step)",
        retry.max_retries,
        retry.backoff_step.as_secs()
    );
    println!("  Epoch check interval:   {}s", DEFAULT_CHECK_INTERVAL.as_secs());
    println!(
        "  Flush:                  every {} events or {}s",
        writer.flush_size, writer.flush_interval_seconds
    );
    println!("  Checkpoint auto-save:   every {DEFAULT_AUTO_SAVE_EVERY} events");
    println!();
    println!("Layout:");
    println!("  {{path}}/{{track}}/{{epoch}}/YYYY-MM-DD-HH.jsonl");
    println!("  {{path}}/{{track}}/state/state.json");
    println!();
    println!("Storage kinds: disk, memory");
    println!("Metrics: {}.* counters, OTLP export when [metrics] otlp_endpoint is set", telemetry::METER_NAME);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn status_accepts_track() {
        let cli = Cli::try_parse_from(["tracklog", "status", "-c", "x.toml", "--track", "boards"]).unwrap();
        match cli.command {
            Commands::Status { config, track } => {
                assert_eq!(config, PathBuf::from("x.toml"));
                assert_eq!(track.as_deref(), Some("boards"));
            }
            _ => panic!("expected status"),
        }
    }
}
