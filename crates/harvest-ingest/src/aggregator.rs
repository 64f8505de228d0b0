//! Fan-in of relay worker output.
//!
//! Every worker writes to its own single-slot channel; a forwarding task per
//! worker moves events into one bounded merged channel. When the dispatcher
//! falls behind, forwarders block, then their workers block and stop reading
//! from their relays. Nothing is dropped for capacity reasons.
//!
//! Events read from relays but not yet dispatched number at most the merged
//! capacity plus three per worker: one in the worker's slot, one held by its
//! forwarder, and one held by the worker's own pending send.
//!
//! The merged channel closes exactly once, after a join barrier has seen every
//! worker task finish.

use crate::peer::PeerConnector;
use crate::worker::{RelayEvent, RelayWorker, WorkerReport};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

/// The merged event stream plus the join barrier behind it.
pub struct AggregatedStream {
    events: mpsc::Receiver<RelayEvent>,
    barrier: JoinHandle<Vec<WorkerReport>>,
}

impl AggregatedStream {
    /// The merged receiver; yields `None` once every worker has exited.
    pub fn events(&mut self) -> &mut mpsc::Receiver<RelayEvent> {
        &mut self.events
    }

    pub async fn recv(&mut self) -> Option<RelayEvent> {
        self.events.recv().await
    }

    /// Wait for the join barrier and collect every worker's report.
    ///
    /// Dropping the receiver first means workers still sending observe a
    /// closed pipeline instead of blocking forever.
    pub async fn join(self) -> Vec<WorkerReport> {
        let Self { events, barrier } = self;
        drop(events);

        match barrier.await {
            Ok(reports) => reports,
            Err(e) => {
                tracing::error!("Join barrier failed: {}", e);
                Vec::new()
            }
        }
    }
}

/// Spawns relay workers and merges their output.
pub struct Aggregator;

impl Aggregator {
    /// Spawn `workers` and return the merged stream, bounded to `capacity`.
    pub fn spawn<P: PeerConnector>(
        workers: Vec<RelayWorker<P>>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> AggregatedStream {
        let (merged_tx, merged_rx) = mpsc::channel(capacity.max(1));
        let mut tasks = JoinSet::new();

        tracing::info!(
            "Starting {} relay workers (buffer {})",
            workers.len(),
            capacity.max(1)
        );

        for worker in workers {
            let merged = merged_tx.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let (tx, rx) = mpsc::channel(1);
                let (report, ()) =
                    tokio::join!(worker.run(tx, cancel.clone()), forward(rx, merged, cancel));
                report
            });
        }

        let barrier = tokio::spawn(async move {
            let mut reports = Vec::with_capacity(tasks.len());

            while let Some(result) = tasks.join_next().await {
                match result {
                    Ok(report) => reports.push(report),
                    Err(e) => tracing::error!("Relay worker task failed: {}", e),
                }
            }

            // Last sender: the merged stream closes only after every worker
            drop(merged_tx);
            tracing::info!("All {} relay workers finished", reports.len());
            reports
        });

        AggregatedStream {
            events: merged_rx,
            barrier,
        }
    }
}

/// Move one worker's events into the merged stream until either side closes.
async fn forward(
    mut rx: mpsc::Receiver<RelayEvent>,
    merged: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) {
    while let Some(event) = rx.recv().await {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = merged.send(event) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
}
