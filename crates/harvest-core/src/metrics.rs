//! Prometheus metrics helpers for the harvester.
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvest_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9091, handle).await.unwrap();
//!
//!     metrics::counter!("harvest_events_stored_total").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: `harvest_`
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - No per-relay labels: relay lists are operator-defined and unbounded

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_harvest_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already installed,
/// instead of panicking.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_harvest_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Binds `0.0.0.0:{port}` before returning so a port conflict surfaces as an
/// error, then serves `/metrics` from a background task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<SocketAddr, std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port))).await?;
    let addr = listener.local_addr()?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(addr)
}

/// Register descriptions for the metrics recorded by the harvester.
fn register_harvest_metrics() {
    // =========================================================================
    // Relay Workers
    // =========================================================================

    describe_gauge!("harvest_running", "Whether the harvester is running (1=yes, 0=no)");
    describe_gauge!("harvest_workers_active", "Relay workers currently paginating");
    describe_counter!(
        "harvest_windows_total",
        "Pagination windows opened across all relays"
    );
    describe_counter!(
        "harvest_worker_exits_total",
        "Relay workers that finished (label: reason)"
    );
    describe_counter!(
        "harvest_checkpoint_failures_total",
        "Cursor checkpoints that could not be written"
    );
    describe_counter!(
        "harvest_notifications_lagged_total",
        "Relay notifications dropped because a worker fell behind"
    );

    // =========================================================================
    // Dispatcher
    // =========================================================================

    describe_counter!(
        "harvest_events_received_total",
        "Events taken from the aggregated stream"
    );
    describe_counter!(
        "harvest_events_invalid_total",
        "Events dropped for a bad ID or signature"
    );
    describe_counter!(
        "harvest_events_filtered_total",
        "Authentic events dropped because they do not match the filter"
    );
    describe_counter!("harvest_events_stored_total", "Events newly written to the store");
    describe_counter!(
        "harvest_events_duplicate_total",
        "Events already present in the store"
    );
    describe_counter!("harvest_store_errors_total", "Store writes that failed");

    // =========================================================================
    // Observer
    // =========================================================================

    describe_counter!(
        "harvest_status_dropped_total",
        "Status messages dropped because the display queue was full"
    );
}
