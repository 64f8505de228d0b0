//! Live progress display.
//!
//! The dispatcher reports what it sees through an [`ObserverHandle`]; the
//! [`Observer`] task owns every counter and is the only code that mutates
//! them. The handle never waits: when the queue is full the status message is
//! dropped, so a slow display cannot stall ingestion.

use harvest_core::format_cursor;
use metrics::counter;
use nostr::Timestamp;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{Instant, MissedTickBehavior};

/// Progress notification sent from the dispatcher to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusMessage {
    /// An authentic, filter-matching event arrived from `relay`.
    EventObserved {
        relay: String,
        kind: u16,
        created_at: Timestamp,
    },
    /// A previously unseen event was written to the store.
    EventStored,
}

/// Sending side of the observer queue.
#[derive(Debug, Clone)]
pub struct ObserverHandle {
    tx: mpsc::Sender<StatusMessage>,
}

impl ObserverHandle {
    /// Queue a status message without waiting.
    ///
    /// Returns `false` if the message was dropped because the queue is full
    /// or the observer has stopped.
    pub fn notify(&self, message: StatusMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                counter!("harvest_status_dropped_total").increment(1);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Per-relay progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayProgress {
    /// Events observed from this relay.
    pub seen: u64,
    /// Oldest `created_at` observed from this relay.
    pub oldest: Option<Timestamp>,
}

/// Counters accumulated by the observer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestStats {
    pub kinds: BTreeMap<u16, u64>,
    pub relays: BTreeMap<String, RelayProgress>,
    pub total_stored: u64,
}

impl HarvestStats {
    pub fn apply(&mut self, message: StatusMessage) {
        match message {
            StatusMessage::EventObserved {
                relay,
                kind,
                created_at,
            } => {
                *self.kinds.entry(kind).or_default() += 1;

                let progress = self.relays.entry(relay).or_default();
                progress.seen += 1;
                progress.oldest = Some(match progress.oldest {
                    Some(oldest) => oldest.min(created_at),
                    None => created_at,
                });
            }
            StatusMessage::EventStored => self.total_stored += 1,
        }
    }

    /// Render the status table, kinds and relays in sorted order.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "  {:<4}", "kinds");
        for (kind, count) in &self.kinds {
            let _ = writeln!(out, "Kind {kind:<5} {count}");
        }

        let _ = writeln!(
            out,
            "\n\n  {:<40} {:<10} {}",
            "relays", "events", "current date"
        );
        for (url, progress) in &self.relays {
            let date = progress
                .oldest
                .map(format_cursor)
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "{url:<40} {:<4} date {date}", progress.seen);
        }

        let _ = write!(out, "\ntotal inserted: {}", self.total_stored);
        out
    }
}

/// Receiving side of the observer queue.
pub struct Observer {
    rx: mpsc::Receiver<StatusMessage>,
    interval: Duration,
    stats: HarvestStats,
}

impl Observer {
    /// Create an observer whose queue holds at most `capacity` messages.
    ///
    /// The status table is logged every `interval`, and once more when every
    /// handle has been dropped. A zero interval renders only at the end.
    pub fn channel(capacity: usize, interval: Duration) -> (ObserverHandle, Observer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            ObserverHandle { tx },
            Observer {
                rx,
                interval,
                stats: HarvestStats::default(),
            },
        )
    }

    /// Consume status messages until every handle is dropped.
    pub async fn run(mut self) -> HarvestStats {
        if self.interval.is_zero() {
            while let Some(message) = self.rx.recv().await {
                self.stats.apply(message);
            }
        } else {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    message = self.rx.recv() => match message {
                        Some(message) => self.stats.apply(message),
                        None => break,
                    },
                    _ = ticker.tick() => {
                        tracing::info!("\n{}", self.stats.render());
                    }
                }
            }
        }

        tracing::info!("\n{}", self.stats.render());
        self.stats
    }
}
