//! Error types for the harvester pipeline.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while harvesting.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration file does not exist or cannot be read.
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML document editing error.
    #[error("TOML document error: {0}")]
    TomlEdit(#[from] toml_edit::TomlError),

    /// Core validation error.
    #[error(transparent)]
    Core(#[from] harvest_core::Error),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Nostr SDK error.
    #[error("Nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Relay refused or dropped a subscription request.
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),
}
