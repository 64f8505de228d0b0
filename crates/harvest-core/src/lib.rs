//! Core types, validation, and shared utilities for the relay harvester.
//!
//! This crate provides:
//! - Event authenticity checks (ID and signature verification per NIP-01) via the nostr crate
//! - The shared [`EventFilter`] with local matching and conversion to a relay `REQ` filter
//! - Parsing and formatting of the persisted cursor timestamp
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod filter;
pub mod metrics;
mod time;

pub use error::{Error, Result};
pub use event::verify_event;
pub use filter::{DEFAULT_LIMIT, EventFilter};
pub use time::{CURSOR_FORMAT, format_cursor, parse_cursor};
