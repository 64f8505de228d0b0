//! nostr-sdk backed peer client.
//!
//! Each relay worker gets its own `Client` holding exactly one relay, so pool
//! notifications only ever come from that relay. Subscriptions still filter
//! on their subscription ID, since a late event from a previous window may
//! arrive after the window was released.

use super::{PeerConnection, PeerConnector, PeerSubscription, SubscriptionItem};
use crate::{Error, Result};
use metrics::counter;
use nostr_sdk::prelude::*;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};

/// Timeout for the initial relay connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool notification buffer per connection.
pub const NOTIFICATION_CHANNEL_SIZE: usize = 4096;

/// Connects to relays with nostr-sdk.
#[derive(Debug, Clone, Default)]
pub struct NostrConnector;

impl NostrConnector {
    pub fn new() -> Self {
        Self
    }
}

impl PeerConnector for NostrConnector {
    type Connection = NostrConnection;

    async fn connect(&self, url: &str) -> Result<NostrConnection> {
        // Ephemeral keys, used only to answer NIP-42 AUTH challenges
        let keys = Keys::generate();

        let pool_opts =
            RelayPoolOptions::default().notification_channel_size(NOTIFICATION_CHANNEL_SIZE);

        let client = Client::builder()
            .signer(keys)
            .opts(ClientOptions::new().pool(pool_opts))
            .build();
        client.automatic_authentication(true);

        client.add_relay(url).await?;
        client.try_connect_relay(url, CONNECT_TIMEOUT).await?;

        tracing::debug!("Connected to {}", url);

        Ok(NostrConnection {
            client,
            url: url.to_string(),
        })
    }
}

/// A connected nostr-sdk client for one relay.
pub struct NostrConnection {
    client: Client,
    url: String,
}

impl PeerConnection for NostrConnection {
    type Subscription = NostrSubscription;

    async fn subscribe(&self, filter: Filter) -> Result<NostrSubscription> {
        // Listen before sending the REQ so no early event is missed
        let notifications = self.client.notifications();

        let output = self.client.subscribe(filter, None).await?;
        if output.success.is_empty() {
            let reason = output
                .failed
                .into_values()
                .next()
                .unwrap_or_else(|| "no relay accepted the subscription".to_string());
            return Err(Error::Subscription(format!("{}: {}", self.url, reason)));
        }

        tracing::trace!("Subscribed to {} with ID {}", self.url, output.val);

        Ok(NostrSubscription {
            id: output.val,
            url: self.url.clone(),
            notifications,
        })
    }

    async fn unsubscribe(&self, subscription: NostrSubscription) {
        self.client.unsubscribe(&subscription.id).await;
    }

    async fn disconnect(self) {
        self.client.disconnect().await;
        tracing::debug!("Disconnected from {}", self.url);
    }
}

/// Notifications for one subscription ID.
pub struct NostrSubscription {
    id: SubscriptionId,
    url: String,
    notifications: broadcast::Receiver<RelayPoolNotification>,
}

impl PeerSubscription for NostrSubscription {
    async fn next(&mut self) -> Option<SubscriptionItem> {
        loop {
            let notification = match self.notifications.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(count)) => {
                    counter!("harvest_notifications_lagged_total").increment(count);
                    tracing::warn!(
                        "Notification receiver for {} lagged, dropped {} messages",
                        self.url,
                        count
                    );
                    continue;
                }
                Err(RecvError::Closed) => return None,
            };

            match notification {
                RelayPoolNotification::Event {
                    subscription_id,
                    event,
                    ..
                } => {
                    if subscription_id == self.id {
                        return Some(SubscriptionItem::Event(event));
                    }
                }
                RelayPoolNotification::Message { message, .. } => match message {
                    RelayMessage::EndOfStoredEvents(subscription_id)
                        if *subscription_id == self.id =>
                    {
                        return Some(SubscriptionItem::EndOfStoredEvents);
                    }
                    RelayMessage::Closed {
                        subscription_id,
                        message,
                    } if *subscription_id == self.id => {
                        return Some(SubscriptionItem::Closed(message.into_owned()));
                    }
                    RelayMessage::Notice(notice) => {
                        tracing::debug!("Relay {} notice: {}", self.url, notice);
                    }
                    _ => {}
                },
                RelayPoolNotification::Shutdown => return None,
            }
        }
    }
}
