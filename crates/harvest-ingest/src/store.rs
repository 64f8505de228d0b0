//! Event storage.
//!
//! The dispatcher hands every authentic, filter-matching event to an
//! [`EventStore`]. The production store is [`RocksEventStore`], keyed by the
//! raw 32-byte event ID so re-delivered events are detected as duplicates.
//!
//! # Key Design
//!
//! - Keys: 32-byte event IDs (raw bytes, not hex)
//! - Values: the event's canonical JSON
//! - Bloom filters for fast "not seen" lookups

use crate::error::{Error, Result};
use nostr::{Event, EventId, JsonUtil};
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, MultiThreaded, Options};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The event was not stored before and has been written.
    Inserted,
    /// An event with the same ID was already stored; nothing was written.
    Duplicate,
}

/// Persistent destination for harvested events.
///
/// Shared by reference across the pipeline, so implementations must be
/// thread-safe.
pub trait EventStore: Send + Sync {
    /// Persist `event`, reporting whether it was new.
    fn save(&self, event: &Event) -> Result<SaveOutcome>;
}

/// RocksDB-backed event store.
///
/// Thread-safe: can be shared across multiple threads via `Arc<RocksEventStore>`.
pub struct RocksEventStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
}

impl RocksEventStore {
    /// Open or create an event store at the given path.
    ///
    /// ```no_run
    /// use harvest_ingest::RocksEventStore;
    ///
    /// let store = RocksEventStore::open("./data/events")?;
    /// # Ok::<(), harvest_ingest::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening event store at {}", path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(3);

        // 10 bits per key = ~1% false positive rate
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        opts.increase_parallelism(num_cpus::get() as i32);
        opts.set_max_background_jobs(4);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Check whether an event ID is already stored.
    pub fn contains(&self, id: &EventId) -> Result<bool> {
        Ok(self.db.get_pinned(id.as_bytes())?.is_some())
    }

    /// Load a stored event by ID.
    pub fn get(&self, id: &EventId) -> Result<Option<Event>> {
        match self.db.get_pinned(id.as_bytes())? {
            Some(raw) => {
                let event = Event::from_json(&*raw).map_err(|e| Error::Json(e.to_string()))?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Get the approximate number of stored events.
    pub fn approximate_count(&self) -> Result<u64> {
        let count = self
            .db
            .property_int_value("rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(count)
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl EventStore for RocksEventStore {
    fn save(&self, event: &Event) -> Result<SaveOutcome> {
        if self.contains(&event.id)? {
            return Ok(SaveOutcome::Duplicate);
        }

        self.db.put(event.id.as_bytes(), event.as_json())?;
        Ok(SaveOutcome::Inserted)
    }
}

/// In-memory event store, for tests and dry runs.
#[derive(Default)]
pub struct MemoryEventStore {
    events: Mutex<HashMap<EventId, Event>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.events.lock().contains_key(id)
    }
}

impl EventStore for MemoryEventStore {
    fn save(&self, event: &Event) -> Result<SaveOutcome> {
        let mut events = self.events.lock();
        if events.contains_key(&event.id) {
            return Ok(SaveOutcome::Duplicate);
        }
        events.insert(event.id, event.clone());
        Ok(SaveOutcome::Inserted)
    }
}
