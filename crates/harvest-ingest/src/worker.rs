//! Backward-pagination state machine for one relay.
//!
//! A worker walks a relay's history from its cursor towards the past, one
//! window at a time:
//!
//! ```text
//! Connecting ─▶ Subscribing ─▶ Streaming ─┬─▶ Paginating ─▶ Subscribing ...
//!                                         └─▶ Terminated
//! ```
//!
//! Each window requests events with `created_at <= cursor`. When the window
//! ends (EOSE or CLOSED), the oldest timestamp strictly below the bound
//! becomes the next cursor. The cursor is checkpointed before the next window
//! is opened, so a crash never resumes past what was durably recorded. A
//! window with no events means the relay's history is exhausted.

use crate::config::{CheckpointSink, RelayDescriptor};
use crate::peer::{PeerConnection, PeerConnector, PeerSubscription, SubscriptionItem};
use harvest_core::{EventFilter, format_cursor};
use metrics::{counter, gauge};
use nostr::{Event, Timestamp};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// An event tagged with the relay that delivered it.
#[derive(Debug, Clone)]
pub struct RelayEvent {
    pub event: Event,
    pub relay: String,
}

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    Subscribing,
    Streaming,
    Paginating,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Paginating => "paginating",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A window returned no events.
    Exhausted,
    /// A window returned events, none older than its bound.
    Stalled,
    /// The shared cancellation signal fired.
    Cancelled,
    /// The relay could not be reached.
    ConnectFailed,
    /// The relay refused a subscription.
    SubscribeFailed,
    /// The configured seed cursor could not be parsed.
    InvalidCursor,
    /// Nothing is consuming the worker's output anymore.
    PipelineClosed,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exhausted => "exhausted",
            Self::Stalled => "stalled",
            Self::Cancelled => "cancelled",
            Self::ConnectFailed => "connect_failed",
            Self::SubscribeFailed => "subscribe_failed",
            Self::InvalidCursor => "invalid_cursor",
            Self::PipelineClosed => "pipeline_closed",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of one worker's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub relay: String,
    /// Pagination windows opened.
    pub windows: u64,
    /// Events forwarded downstream.
    pub events: u64,
    /// Cursor at exit; `None` if the seed cursor never parsed.
    pub cursor: Option<Timestamp>,
    pub reason: ExitReason,
}

/// Per-window bookkeeping for the next cursor.
#[derive(Debug, Default)]
struct WindowProgress {
    observed: bool,
    lowest: Option<Timestamp>,
}

impl WindowProgress {
    /// Record an event; delivery order within a window is not assumed.
    fn observe(&mut self, created_at: Timestamp, bound: Timestamp) {
        self.observed = true;
        if created_at < bound {
            self.lowest = Some(match self.lowest {
                Some(lowest) => lowest.min(created_at),
                None => created_at,
            });
        }
    }
}

/// How a window's stream ended.
enum WindowEnd {
    EndOfStoredEvents,
    Closed(String),
    Disconnected,
    Cancelled,
    PipelineClosed,
}

/// Paginates one relay backwards through time.
pub struct RelayWorker<P: PeerConnector> {
    connector: Arc<P>,
    descriptor: RelayDescriptor,
    filter: Arc<EventFilter>,
    checkpoints: Arc<dyn CheckpointSink>,
}

impl<P: PeerConnector> RelayWorker<P> {
    pub fn new(
        connector: Arc<P>,
        descriptor: RelayDescriptor,
        filter: Arc<EventFilter>,
        checkpoints: Arc<dyn CheckpointSink>,
    ) -> Self {
        Self {
            connector,
            descriptor,
            filter,
            checkpoints,
        }
    }

    /// Run until the relay is exhausted, fails, or `cancel` fires.
    ///
    /// Every event is sent on `output`; a full channel suspends the worker.
    pub async fn run(
        mut self,
        output: mpsc::Sender<RelayEvent>,
        cancel: CancellationToken,
    ) -> WorkerReport {
        let mut report = WorkerReport {
            relay: self.descriptor.url.clone(),
            windows: 0,
            events: 0,
            cursor: None,
            reason: ExitReason::Cancelled,
        };

        let cursor = match self.descriptor.cursor() {
            Ok(cursor) => cursor,
            Err(e) => {
                tracing::warn!(
                    "Relay {} has an unusable cursor '{}': {}",
                    self.descriptor.url,
                    self.descriptor.until,
                    e
                );
                return self.finish(report, ExitReason::InvalidCursor);
            }
        };
        report.cursor = Some(cursor);

        self.transition(WorkerState::Connecting);
        let connection = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.finish(report, ExitReason::Cancelled),
            result = self.connector.connect(&self.descriptor.url) => match result {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!("Failed to connect to {}: {}", self.descriptor.url, e);
                    return self.finish(report, ExitReason::ConnectFailed);
                }
            },
        };

        gauge!("harvest_workers_active").increment(1.0);
        let reason = self
            .paginate(&connection, cursor, &mut report, &output, &cancel)
            .await;
        gauge!("harvest_workers_active").decrement(1.0);

        connection.disconnect().await;
        self.finish(report, reason)
    }

    async fn paginate(
        &mut self,
        connection: &P::Connection,
        seed: Timestamp,
        report: &mut WorkerReport,
        output: &mpsc::Sender<RelayEvent>,
        cancel: &CancellationToken,
    ) -> ExitReason {
        let url = self.descriptor.url.clone();
        let mut bound = seed;
        self.checkpoint(bound).await;

        loop {
            self.transition(WorkerState::Subscribing);
            let request = match self.filter.to_request(bound) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!("Cannot build request for {}: {}", url, e);
                    return ExitReason::SubscribeFailed;
                }
            };

            let mut subscription = tokio::select! {
                biased;
                _ = cancel.cancelled() => return ExitReason::Cancelled,
                result = connection.subscribe(request) => match result {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        tracing::warn!("Subscription to {} failed: {}", url, e);
                        return ExitReason::SubscribeFailed;
                    }
                },
            };
            report.windows += 1;
            counter!("harvest_windows_total").increment(1);

            self.transition(WorkerState::Streaming);
            let mut progress = WindowProgress::default();
            let end = self
                .stream_window(&mut subscription, bound, &mut progress, report, output, cancel)
                .await;
            connection.unsubscribe(subscription).await;

            match end {
                WindowEnd::Cancelled => return ExitReason::Cancelled,
                WindowEnd::PipelineClosed => return ExitReason::PipelineClosed,
                WindowEnd::Closed(reason) => {
                    tracing::debug!(
                        "Relay {} closed window at {}: {}",
                        url,
                        format_cursor(bound),
                        reason
                    );
                }
                WindowEnd::Disconnected => {
                    tracing::debug!(
                        "Relay {} stream ended during window at {}",
                        url,
                        format_cursor(bound)
                    );
                }
                WindowEnd::EndOfStoredEvents => {}
            }

            if cancel.is_cancelled() {
                return ExitReason::Cancelled;
            }

            if !progress.observed {
                tracing::info!("Relay {} exhausted at {}", url, format_cursor(bound));
                return ExitReason::Exhausted;
            }

            let Some(next) = progress.lowest else {
                tracing::warn!(
                    "Relay {} returned no events older than {}, stopping",
                    url,
                    format_cursor(bound)
                );
                return ExitReason::Stalled;
            };

            self.transition(WorkerState::Paginating);
            bound = next;
            self.descriptor.set_cursor(next);
            report.cursor = Some(next);
            self.checkpoint(next).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return ExitReason::Cancelled,
                _ = tokio::time::sleep(self.descriptor.interval()) => {}
            }
        }
    }

    async fn stream_window<S: PeerSubscription>(
        &self,
        subscription: &mut S,
        bound: Timestamp,
        progress: &mut WindowProgress,
        report: &mut WorkerReport,
        output: &mpsc::Sender<RelayEvent>,
        cancel: &CancellationToken,
    ) -> WindowEnd {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return WindowEnd::Cancelled,
                item = subscription.next() => item,
            };

            match item {
                Some(SubscriptionItem::Event(event)) => {
                    progress.observe(event.created_at, bound);

                    let relay_event = RelayEvent {
                        event: *event,
                        relay: self.descriptor.url.clone(),
                    };
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return WindowEnd::Cancelled,
                        sent = output.send(relay_event) => {
                            if sent.is_err() {
                                return WindowEnd::PipelineClosed;
                            }
                        }
                    }
                    report.events += 1;
                }
                Some(SubscriptionItem::EndOfStoredEvents) => return WindowEnd::EndOfStoredEvents,
                Some(SubscriptionItem::Closed(reason)) => return WindowEnd::Closed(reason),
                None => return WindowEnd::Disconnected,
            }
        }
    }

    /// Persist `cursor` and wait until the sink has taken it.
    ///
    /// Sinks do blocking file I/O, so the call runs on the blocking pool.
    async fn checkpoint(&self, cursor: Timestamp) {
        let sink = Arc::clone(&self.checkpoints);
        let url = self.descriptor.url.clone();

        if let Err(e) = tokio::task::spawn_blocking(move || sink.checkpoint(&url, cursor)).await {
            tracing::warn!("Checkpoint task for {} failed: {}", self.descriptor.url, e);
        }
    }

    fn transition(&self, state: WorkerState) {
        tracing::trace!("Relay {} -> {}", self.descriptor.url, state);
    }

    fn finish(&self, mut report: WorkerReport, reason: ExitReason) -> WorkerReport {
        self.transition(WorkerState::Terminated);
        counter!("harvest_worker_exits_total", "reason" => reason.as_str()).increment(1);

        report.reason = reason;
        tracing::info!(
            relay = %report.relay,
            windows = report.windows,
            events = report.events,
            cursor = %report.cursor.map(format_cursor).unwrap_or_default(),
            "Relay worker finished: {}",
            reason
        );
        report
    }
}
