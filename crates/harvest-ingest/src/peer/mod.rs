//! Relay protocol client abstraction.
//!
//! Relay workers drive a peer through three traits: a [`PeerConnector`] opens
//! a [`PeerConnection`] to one relay, which opens [`PeerSubscription`]s for
//! individual pagination windows. The production implementation lives in
//! [`sdk`] and wraps nostr-sdk; tests use scripted in-memory peers.

use crate::Result;
use nostr::{Event, Filter};
use std::future::Future;

pub mod sdk;

#[cfg(test)]
pub(crate) mod testing;

pub use sdk::{NostrConnection, NostrConnector, NostrSubscription};

/// One item delivered on a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionItem {
    /// A stored event matching the subscription filter.
    Event(Box<Event>),
    /// The relay has sent every stored event it holds for this filter (EOSE).
    EndOfStoredEvents,
    /// The relay closed the subscription, with its reason.
    Closed(String),
}

/// Opens connections to relays.
pub trait PeerConnector: Send + Sync + 'static {
    type Connection: PeerConnection;

    /// Connect to the relay at `url`.
    fn connect(&self, url: &str) -> impl Future<Output = Result<Self::Connection>> + Send;
}

/// An open connection to a single relay.
pub trait PeerConnection: Send + Sync + 'static {
    type Subscription: PeerSubscription;

    /// Send a subscription request for `filter`.
    fn subscribe(&self, filter: Filter)
    -> impl Future<Output = Result<Self::Subscription>> + Send;

    /// Close a subscription on the relay.
    fn unsubscribe(&self, subscription: Self::Subscription) -> impl Future<Output = ()> + Send;

    /// Close the connection.
    fn disconnect(self) -> impl Future<Output = ()> + Send;
}

/// The stream of items for one subscription.
pub trait PeerSubscription: Send + 'static {
    /// Wait for the next item; `None` once the underlying connection is gone.
    fn next(&mut self) -> impl Future<Output = Option<SubscriptionItem>> + Send;
}
