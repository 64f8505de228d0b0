//! Validation, filtering, and persistence of harvested events.
//!
//! Relays are untrusted, so every event is re-verified and re-matched against
//! the shared filter before it may reach the store. Failures only ever drop
//! the single event involved; the stream keeps flowing.

use crate::observer::{ObserverHandle, StatusMessage};
use crate::store::{EventStore, SaveOutcome};
use crate::worker::RelayEvent;
use harvest_core::{EventFilter, verify_event};
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events taken from the aggregated stream.
    pub received: u64,
    /// Dropped for a bad ID or signature.
    pub invalid: u64,
    /// Authentic but outside the filter.
    pub filtered: u64,
    /// Newly written to the store.
    pub stored: u64,
    /// Already present in the store.
    pub duplicates: u64,
    /// Store writes that failed.
    pub store_errors: u64,
}

/// Consumes the aggregated stream.
pub struct Dispatcher {
    filter: Arc<EventFilter>,
    store: Arc<dyn EventStore>,
    observer: ObserverHandle,
}

impl Dispatcher {
    pub fn new(
        filter: Arc<EventFilter>,
        store: Arc<dyn EventStore>,
        observer: ObserverHandle,
    ) -> Self {
        Self {
            filter,
            store,
            observer,
        }
    }

    /// Process events until the stream closes.
    pub async fn run(&self, events: &mut mpsc::Receiver<RelayEvent>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        while let Some(relay_event) = events.recv().await {
            self.dispatch(relay_event, &mut stats);
        }

        tracing::info!(
            received = stats.received,
            stored = stats.stored,
            duplicates = stats.duplicates,
            invalid = stats.invalid,
            filtered = stats.filtered,
            store_errors = stats.store_errors,
            "Aggregated stream closed"
        );
        stats
    }

    /// Verify, filter, and persist a single event.
    pub fn dispatch(&self, relay_event: RelayEvent, stats: &mut DispatchStats) {
        let RelayEvent { event, relay } = relay_event;
        stats.received += 1;
        counter!("harvest_events_received_total").increment(1);

        if let Err(e) = verify_event(&event) {
            stats.invalid += 1;
            counter!("harvest_events_invalid_total").increment(1);
            tracing::debug!("Dropping event from {}: {}", relay, e);
            return;
        }

        if !self.filter.matches(&event) {
            stats.filtered += 1;
            counter!("harvest_events_filtered_total").increment(1);
            tracing::trace!("Event {} from {} does not match filter", event.id, relay);
            return;
        }

        self.observer.notify(StatusMessage::EventObserved {
            relay,
            kind: event.kind.as_u16(),
            created_at: event.created_at,
        });

        match self.store.save(&event) {
            Ok(SaveOutcome::Inserted) => {
                stats.stored += 1;
                counter!("harvest_events_stored_total").increment(1);
                self.observer.notify(StatusMessage::EventStored);
            }
            Ok(SaveOutcome::Duplicate) => {
                stats.duplicates += 1;
                counter!("harvest_events_duplicate_total").increment(1);
            }
            Err(e) => {
                stats.store_errors += 1;
                counter!("harvest_store_errors_total").increment(1);
                tracing::warn!("Failed to store event {}: {}", event.id, e);
            }
        }
    }
}
