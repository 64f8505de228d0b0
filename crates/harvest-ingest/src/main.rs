//! Nostr relay history harvester.
//!
//! Pages backwards through every configured relay's stored events, verifies
//! and filters them, and writes them to a local RocksDB store. Progress is
//! checkpointed into the configuration file so a restart resumes where the
//! previous run stopped.
//!
//! # Usage
//!
//! ```bash
//! # Run with ./harvest.toml
//! harvest
//!
//! # Run with a specific configuration file
//! harvest /etc/harvest/relays.toml
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) and SIGTERM fire the shared cancellation signal:
//! 1. Every relay worker releases its subscription and disconnects
//! 2. The merged stream closes once all workers have exited
//! 3. The dispatcher drains what is left and the store is flushed

use anyhow::{Context, Result};
use clap::Parser;
use harvest_core::format_cursor;
use harvest_core::metrics::{init_metrics, start_metrics_server};
use harvest_ingest::{
    Aggregator, CheckpointSink, ConfigStore, DEFAULT_CONFIG_PATH, Dispatcher, NostrConnector,
    Observer, RelayWorker, RocksEventStore,
};
use metrics::gauge;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Nostr relay history harvester.
#[derive(Parser, Debug)]
#[command(name = "harvest")]
#[command(about = "Backward-paginating Nostr relay harvester")]
#[command(version)]
struct Args {
    /// Configuration file (relays, filter, store)
    #[arg(default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("harvest_ingest=debug".parse()?)
                .add_directive("nostr_relay_pool=warn".parse()?),
        )
        .init();

    let args = Args::parse();

    tracing::info!("Harvester starting...");

    let config_store = Arc::new(ConfigStore::load(&args.config).with_context(|| {
        format!("Failed to load configuration from {}", args.config.display())
    })?);
    let config = config_store.config().clone();
    tracing::info!(
        "Loaded {} relays; cursors are checkpointed to {}",
        config.relays.len(),
        config_store.path().display()
    );

    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
        gauge!("harvest_running").set(1.0);
    }

    let store = Arc::new(RocksEventStore::open(&config.store.path).with_context(|| {
        format!(
            "Failed to open event store at {}",
            config.store.path.display()
        )
    })?);

    // Set up graceful shutdown
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        shutdown.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    let filter = Arc::new(config_store.filter().clone());
    let capacity = filter.capacity();

    let (observer_handle, observer) = Observer::channel(capacity, config.display.interval());
    let observer_task = tokio::spawn(observer.run());

    let connector = Arc::new(NostrConnector::new());
    let checkpoints: Arc<dyn CheckpointSink> = config_store.clone();
    let workers = config_store
        .relays()
        .into_iter()
        .map(|descriptor| {
            RelayWorker::new(
                Arc::clone(&connector),
                descriptor,
                Arc::clone(&filter),
                Arc::clone(&checkpoints),
            )
        })
        .collect();

    let mut stream = Aggregator::spawn(workers, capacity, cancel.clone());

    let dispatcher = Dispatcher::new(filter, store.clone(), observer_handle);
    let stats = dispatcher.run(stream.events()).await;
    let reports = stream.join().await;

    // Last observer handle; the observer renders once more and exits
    drop(dispatcher);
    let harvest = observer_task.await.context("Observer task failed")?;

    store.flush().context("Failed to flush event store")?;

    for report in &reports {
        tracing::info!(
            "{}: {} after {} windows, {} events, cursor {}",
            report.relay,
            report.reason,
            report.windows,
            report.events,
            report.cursor.map(format_cursor).unwrap_or_else(|| "-".to_string())
        );
    }

    tracing::info!(
        "Harvester stopped: {} received, {} stored ({} reported), {} duplicates, ~{} events in store",
        stats.received,
        stats.stored,
        harvest.total_stored,
        stats.duplicates,
        store.approximate_count().unwrap_or(0)
    );

    gauge!("harvest_running").set(0.0);
    Ok(())
}
