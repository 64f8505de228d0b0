//! Error types for the harvester core.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while validating events, filters, and cursors.
#[derive(Error, Debug)]
pub enum Error {
    /// Event ID does not match the hash of the event contents.
    #[error("invalid event ID: {id}")]
    InvalidEventId {
        /// The ID claimed by the event.
        id: String,
    },

    /// Event signature is invalid.
    #[error("invalid event signature: {0}")]
    InvalidSignature(String),

    /// A filter field could not be interpreted.
    #[error("invalid filter field '{field}': {reason}")]
    InvalidFilter {
        /// The name of the offending field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A cursor timestamp could not be parsed.
    #[error("invalid cursor timestamp '{0}'")]
    InvalidTimestamp(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_event_id_display() {
        let err = Error::InvalidEventId {
            id: "abc123".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("invalid event ID"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn test_invalid_filter_display() {
        let err = Error::InvalidFilter {
            field: "tags",
            reason: "tag name must be a single letter".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tags"));
        assert!(msg.contains("single letter"));
    }

    #[test]
    fn test_invalid_timestamp_display() {
        let err = Error::InvalidTimestamp("yesterday-ish".to_string());
        assert_eq!(err.to_string(), "invalid cursor timestamp 'yesterday-ish'");
    }
}
