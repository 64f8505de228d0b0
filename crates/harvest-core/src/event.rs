//! Event authenticity checks using the nostr crate.
//!
//! Relays are untrusted: anything they deliver is re-verified before it may
//! reach storage.
//! - Event ID verification (SHA-256 of canonical JSON)
//! - Signature verification (Schnorr over secp256k1)

use crate::error::{Error, Result};
use nostr::Event;

/// Verifies both the event ID and signature of a Nostr event.
///
/// # Errors
///
/// Returns an error if:
/// - The event ID doesn't match `sha256([0, pubkey, created_at, kind, tags, content])`
/// - The signature is not a valid Schnorr signature over the event ID
pub fn verify_event(event: &Event) -> Result<()> {
    if !event.verify_id() {
        return Err(Error::InvalidEventId {
            id: event.id.to_hex(),
        });
    }
    if !event.verify_signature() {
        return Err(Error::InvalidSignature(format!(
            "signature verification failed for {}",
            event.id.to_hex()
        )));
    }
    Ok(())
}
