//! Backward-pagination harvester for Nostr relays.
//!
//! Each configured relay gets a [`RelayWorker`] that walks its history from a
//! persisted cursor towards the past. Worker output is merged by the
//! [`Aggregator`] into one bounded stream, which the [`Dispatcher`] verifies,
//! filters, and writes to the [`EventStore`], reporting progress to the
//! [`Observer`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ConfigStore   │  relay cursors + shared filter, checkpointed in place
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ N × RelayWorker │  one pagination state machine per relay
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Aggregator    │  bounded fan-in, closes after every worker exits
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   Dispatcher    │──▶ Observer (status display)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │   EventStore    │  RocksDB, deduplicated by event ID
//! └─────────────────┘
//! ```
//!
//! The cursor in the configuration file is the only state that survives a
//! restart; storage is idempotent on event ID, so re-scanning an overlapping
//! window after a crash is harmless.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod observer;
pub mod peer;
pub mod store;
pub mod worker;

pub use error::{Error, Result};

pub use aggregator::{AggregatedStream, Aggregator};
pub use config::{
    CheckpointSink, ConfigStore, DEFAULT_CONFIG_PATH, DisplayConfig, HarvestConfig,
    RelayDescriptor, StoreConfig,
};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use observer::{HarvestStats, Observer, ObserverHandle, RelayProgress, StatusMessage};
pub use peer::{NostrConnector, PeerConnection, PeerConnector, PeerSubscription, SubscriptionItem};
pub use store::{EventStore, MemoryEventStore, RocksEventStore, SaveOutcome};
pub use worker::{ExitReason, RelayEvent, RelayWorker, WorkerReport, WorkerState};
