//! Harvester configuration and cursor checkpoints.
//!
//! The configuration file is the only state that survives a restart: every
//! relay's `until` cursor is rewritten in place as its worker pages backwards,
//! so the next run resumes where the last one left off.
//!
//! # File format
//!
//! ```toml
//! metrics_port = 0
//!
//! [store]
//! path = "./data/events"
//!
//! [display]
//! interval_secs = 5
//!
//! [filter]
//! kinds = [1]
//! limit = 500
//!
//! [[relays]]
//! url = "wss://relay.damus.io"
//! until = "January 1, 2024 00:00:00"
//! interval = 5
//! ```
//!
//! Cursor updates go through `toml_edit`, so comments, ordering, and
//! formatting of everything except the touched `until` value are preserved.

use crate::{Error, Result};
use harvest_core::{EventFilter, format_cursor, parse_cursor};
use metrics::counter;
use nostr::{RelayUrl, Timestamp};
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::{self, File};
use std::io::Write;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toml_edit::{DocumentMut, Item, TableLike, Value};

/// Configuration file used when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "harvest.toml";

/// Parsed harvester configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HarvestConfig {
    /// Relays to paginate, in file order.
    pub relays: Vec<RelayDescriptor>,

    /// Filter shared by every relay and the dispatcher.
    #[serde(default)]
    pub filter: EventFilter,

    /// Event store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Status display settings.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Prometheus exporter port (0 disables the exporter).
    #[serde(default)]
    pub metrics_port: u16,
}

/// Event store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// RocksDB directory.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/events")
}

/// Status display settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    /// Seconds between status renders (0 renders only on exit).
    #[serde(default = "default_display_interval")]
    pub interval_secs: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_display_interval(),
        }
    }
}

fn default_display_interval() -> u64 {
    5
}

impl DisplayConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// One relay to harvest: endpoint, cursor, and poll interval.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayDescriptor {
    /// Relay websocket URL.
    pub url: String,

    /// Upper bound of the next pagination window, in calendar format.
    pub until: String,

    /// Seconds to wait between pagination windows.
    #[serde(default)]
    pub interval: u64,
}

impl RelayDescriptor {
    /// Parse the stored cursor.
    pub fn cursor(&self) -> Result<Timestamp> {
        Ok(parse_cursor(&self.until)?)
    }

    /// Replace the cursor with `cursor`, in canonical calendar format.
    pub fn set_cursor(&mut self, cursor: Timestamp) {
        self.until = format_cursor(cursor);
    }

    /// Delay between pagination windows.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl HarvestConfig {
    /// Parse and validate a configuration document.
    ///
    /// Relay URLs are normalized and must be unique afterwards, since the
    /// URL is the checkpoint key. The filter is brought into canonical form.
    /// Seed cursors are deliberately left unparsed: a bad cursor only
    /// disables that relay's worker.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: HarvestConfig = toml::from_str(raw)?;

        if config.relays.is_empty() {
            return Err(Error::Config("at least one relay is required".to_string()));
        }

        let mut seen = HashSet::with_capacity(config.relays.len());
        for (index, relay) in config.relays.iter_mut().enumerate() {
            relay.url = normalize_relay_url(&relay.url)?;
            if !seen.insert(relay.url.clone()) {
                return Err(Error::Config(format!(
                    "relays[{index}]: {} is configured more than once",
                    relay.url
                )));
            }
        }

        config.filter = config.filter.normalized()?;

        Ok(config)
    }
}

/// Validate a relay URL and strip cosmetic differences.
pub fn normalize_relay_url(url: &str) -> Result<String> {
    let url = url.trim();

    if !url.starts_with("wss://") && !url.starts_with("ws://") {
        return Err(Error::Config(format!(
            "relay URL must start with wss:// or ws://: {url}"
        )));
    }

    let parsed = RelayUrl::parse(url)
        .map_err(|e| Error::Config(format!("invalid relay URL {url}: {e}")))?;

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }

    Ok(normalized)
}

/// Destination for cursor checkpoints.
///
/// Implementations must not fail the caller: a checkpoint that cannot be
/// written is logged and skipped.
pub trait CheckpointSink: Send + Sync {
    /// Record `cursor` as the resume point for the relay at `url`.
    fn checkpoint(&self, url: &str, cursor: Timestamp);
}

/// Loaded configuration plus the write path for cursor checkpoints.
///
/// Workers share one `ConfigStore`; writes to the backing file are
/// serialized by an internal mutex.
pub struct ConfigStore {
    path: PathBuf,
    config: HarvestConfig,
    relays: Mutex<Vec<RelayDescriptor>>,
}

impl ConfigStore {
    /// Load the configuration file at `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = fs::read_to_string(&path).map_err(|_| Error::ConfigNotFound(path.clone()))?;
        let config = HarvestConfig::from_toml_str(&raw)?;

        tracing::info!(
            path = %path.display(),
            relays = config.relays.len(),
            kinds = ?config.filter.kinds,
            limit = config.filter.limit,
            "configuration loaded"
        );

        Ok(Self {
            relays: Mutex::new(config.relays.clone()),
            config,
            path,
        })
    }

    /// Path of the backing configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration as loaded at startup.
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// The shared event filter.
    pub fn filter(&self) -> &EventFilter {
        &self.config.filter
    }

    /// Current relay descriptors, including cursors advanced since startup.
    pub fn relays(&self) -> Vec<RelayDescriptor> {
        self.relays.lock().clone()
    }

    /// Update the cursor of the relay configured with `url`.
    ///
    /// The in-memory descriptor always changes. The backing file is rewritten
    /// with only that relay's `until` replaced; if the file can't be read,
    /// parsed, or written, the failure is logged and persistence is skipped
    /// for this call. Unknown URLs are ignored.
    ///
    /// This does blocking file I/O; async callers should run it on the
    /// blocking pool.
    pub fn update_cursor(&self, url: &str, cursor: Timestamp) {
        let formatted = format_cursor(cursor);
        let mut relays = self.relays.lock();

        let Some(index) = relays.iter().position(|relay| relay.url == url) else {
            tracing::warn!("Checkpoint for unknown relay {} ignored", url);
            return;
        };
        relays[index].until = formatted.clone();

        match self.persist_until(index, &formatted) {
            Ok(()) => tracing::debug!("Checkpointed {} at {}", url, formatted),
            Err(e) => {
                counter!("harvest_checkpoint_failures_total").increment(1);
                tracing::warn!("Failed to checkpoint {} at {}: {}", url, formatted, e);
            }
        }
    }

    /// Rewrite `relays[index].until` in the backing file.
    ///
    /// Symlinks are resolved first so the rename replaces the real file,
    /// not the link.
    fn persist_until(&self, index: usize, until: &str) -> Result<()> {
        let target = fs::canonicalize(&self.path)?;
        let raw = fs::read_to_string(&target)?;
        let mut doc: DocumentMut = raw.parse()?;

        let relay = relay_entry_mut(&mut doc, index).ok_or_else(|| {
            Error::Config(format!(
                "relays[{index}] not found in {}",
                self.path.display()
            ))
        })?;

        match relay.get_mut("until").and_then(Item::as_value_mut) {
            Some(existing) => {
                let decor = existing.decor().clone();
                *existing = Value::from(until);
                *existing.decor_mut() = decor;
            }
            None => {
                relay.insert("until", toml_edit::value(until));
            }
        }

        write_atomically(&target, &doc.to_string())?;
        Ok(())
    }
}

impl CheckpointSink for ConfigStore {
    fn checkpoint(&self, url: &str, cursor: Timestamp) {
        self.update_cursor(url, cursor);
    }
}

/// Locate a relay entry in either `[[relays]]` or `relays = [{ .. }]` form.
fn relay_entry_mut(doc: &mut DocumentMut, index: usize) -> Option<&mut dyn TableLike> {
    match doc.get_mut("relays")? {
        Item::ArrayOfTables(tables) => Some(tables.get_mut(index)?),
        Item::Value(Value::Array(array)) => array
            .get_mut(index)?
            .as_inline_table_mut()
            .map(|table| table as &mut dyn TableLike),
        _ => None,
    }
}

/// Write via a temp file and rename so a crash never leaves a torn config.
fn write_atomically(path: &Path, content: &str) -> std::io::Result<()> {
    let temp_path = path.with_extension("toml.tmp");

    let mut file = File::create(&temp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"# harvester configuration
metrics_port = 9091

[store]
path = "/var/lib/harvest"

[filter]
kinds = [1, 7]
limit = 250

[filter.tags]
t = ["nostr"]

# primary relay
[[relays]]
url = "wss://Relay.Example.com/"
until = "January 1, 2024 00:00:00"
interval = 5

[[relays]]
url = "wss://nos.lol"
until = "2023-06-01T12:00:00"
interval = 10
"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("harvest.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_sample() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::load(write_config(&dir, SAMPLE)).unwrap();
        let config = store.config();

        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/harvest"));
        assert_eq!(config.display.interval_secs, 5);
        assert_eq!(config.filter.kinds, vec![1, 7]);
        assert_eq!(config.filter.limit, 250);
        assert_eq!(config.relays.len(), 2);
        assert_eq!(config.relays[0].url, "wss://relay.example.com");
        assert_eq!(config.relays[0].interval(), Duration::from_secs(5));
        assert_eq!(config.relays[0].cursor().unwrap().as_secs(), 1_704_067_200);
        assert_eq!(config.relays[1].cursor().unwrap().as_secs(), 1_685_620_800);
    }

    #[test]
    fn test_missing_file_is_config_not_found() {
        let dir = TempDir::new().unwrap();
        let result = ConfigStore::load(dir.path().join("nope.toml"));
        assert!(matches!(result, Err(Error::ConfigNotFound(_))));
    }

    #[test]
    fn test_malformed_configs_are_rejected() {
        assert!(matches!(
            HarvestConfig::from_toml_str("relays = ["),
            Err(Error::Toml(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml_str("relays = []"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml_str(
                "[[relays]]\nurl = \"https://example.com\"\nuntil = \"2024-01-01T00:00:00\"\n"
            ),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            HarvestConfig::from_toml_str(
                "[filter.tags]\nhashtag = [\"x\"]\n\n[[relays]]\nurl = \"wss://a.example\"\nuntil = \"2024-01-01T00:00:00\"\n"
            ),
            Err(Error::Core(_))
        ));
    }

    #[test]
    fn test_bad_seed_cursor_loads_but_does_not_parse() {
        let config = HarvestConfig::from_toml_str(
            "[[relays]]\nurl = \"wss://a.example\"\nuntil = \"soon\"\n",
        )
        .unwrap();
        assert!(config.relays[0].cursor().is_err());
        assert_eq!(config.relays[0].interval, 0);
    }

    #[test]
    fn test_update_cursor_rewrites_only_that_field() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let store = ConfigStore::load(&path).unwrap();

        store.update_cursor("wss://relay.example.com", Timestamp::from(1_703_980_800));

        let rewritten = fs::read_to_string(&path).unwrap();
        let before: Vec<&str> = SAMPLE.lines().collect();
        let after: Vec<&str> = rewritten.lines().collect();
        assert_eq!(before.len(), after.len());

        let changed: Vec<(&str, &str)> = before
            .iter()
            .zip(after.iter())
            .filter(|(b, a)| b != a)
            .map(|(b, a)| (*b, *a))
            .collect();
        assert_eq!(
            changed,
            vec![(
                r#"until = "January 1, 2024 00:00:00""#,
                r#"until = "December 31, 2023 00:00:00""#
            )]
        );

        assert_eq!(
            store.relays()[0].until,
            "December 31, 2023 00:00:00".to_string()
        );
        assert_eq!(store.relays()[1].until, "2023-06-01T12:00:00".to_string());
    }

    #[test]
    fn test_update_cursor_inline_array() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "relays = [\n  { url = \"wss://a.example\", until = \"2024-01-01T00:00:00\", interval = 1 },\n]\n",
        );
        let store = ConfigStore::load(&path).unwrap();

        store.update_cursor("wss://a.example", Timestamp::from(1_704_067_100));

        let reloaded = ConfigStore::load(&path).unwrap();
        assert_eq!(
            reloaded.config().relays[0].cursor().unwrap().as_secs(),
            1_704_067_100
        );
        assert_eq!(reloaded.config().relays[0].interval, 1);
    }

    #[test]
    fn test_update_cursor_survives_missing_backing_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let store = ConfigStore::load(&path).unwrap();
        fs::remove_file(&path).unwrap();

        store.update_cursor("wss://nos.lol", Timestamp::from(1_600_000_000));

        assert!(!path.exists());
        assert_eq!(
            store.relays()[1].cursor().unwrap(),
            Timestamp::from(1_600_000_000)
        );
    }

    #[test]
    fn test_concurrent_checkpoints_are_all_persisted() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let store = ConfigStore::load(&path).unwrap();

        std::thread::scope(|scope| {
            let store = &store;
            for step in 0..20u64 {
                scope.spawn(move || {
                    let cursor = Timestamp::from(1_700_000_000 - step);
                    store.checkpoint("wss://relay.example.com", cursor);
                });
                scope.spawn(move || {
                    store.checkpoint("wss://nos.lol", Timestamp::from(1_600_000_000 - step));
                });
            }
        });

        let reloaded = HarvestConfig::from_toml_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let in_memory = store.relays();
        assert_eq!(reloaded.relays[0].until, in_memory[0].until);
        assert_eq!(reloaded.relays[1].until, in_memory[1].until);
        assert_eq!(reloaded.filter.limit, 250);
    }

    #[test]
    fn test_relays_colliding_after_normalization_are_rejected() {
        let raw = r#"
[[relays]]
url = "wss://a.example"
until = "2024-01-01T00:00:00"

[[relays]]
url = "wss://A.example/"
until = "2020-01-01T00:00:00"
"#;
        let err = HarvestConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("relays[1]")));
    }

    #[test]
    fn test_checkpoint_leaves_sibling_relay_untouched() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, SAMPLE);
        let store = ConfigStore::load(&path).unwrap();

        store.checkpoint("wss://relay.example.com", Timestamp::from(1_704_000_000));

        let reloaded = ConfigStore::load(&path).unwrap();
        let relays = &reloaded.config().relays;
        assert_eq!(relays[0].cursor().unwrap(), Timestamp::from(1_704_000_000));
        assert_eq!(relays[1].cursor().unwrap().as_secs(), 1_685_620_800);
        assert_eq!(store.relays()[1].until, "2023-06-01T12:00:00".to_string());
    }

    #[cfg(unix)]
    #[test]
    fn test_update_cursor_writes_through_symlink() {
        let dir = TempDir::new().unwrap();
        let real = write_config(&dir, SAMPLE);
        let link = dir.path().join("linked.toml");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let store = ConfigStore::load(&link).unwrap();
        store.update_cursor("wss://nos.lol", Timestamp::from(1_600_000_000));

        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        let reloaded = HarvestConfig::from_toml_str(&fs::read_to_string(&real).unwrap()).unwrap();
        assert_eq!(
            reloaded.relays[1].cursor().unwrap(),
            Timestamp::from(1_600_000_000)
        );
    }

    #[test]
    fn test_normalize_relay_url() {
        assert_eq!(
            normalize_relay_url(" wss://Relay.Example.COM/ ").unwrap(),
            "wss://relay.example.com"
        );
        assert_eq!(
            normalize_relay_url("ws://localhost:7777").unwrap(),
            "ws://localhost:7777"
        );
        assert!(normalize_relay_url("relay.example.com").is_err());
    }
}
