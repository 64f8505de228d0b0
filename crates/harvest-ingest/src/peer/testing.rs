//! Scripted in-memory peers for exercising relay workers.

use super::{PeerConnection, PeerConnector, PeerSubscription, SubscriptionItem};
use crate::{Error, Result};
use nostr::{Event, EventBuilder, Filter, Keys, Kind, Timestamp};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Sign a text event at `created_at`.
pub(crate) fn signed_event(keys: &Keys, kind: u16, created_at: u64) -> Event {
    EventBuilder::new(Kind::from(kind), format!("note at {created_at}"))
        .custom_created_at(Timestamp::from(created_at))
        .sign_with_keys(keys)
        .unwrap()
}

/// An externally visible side effect, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Checkpoint(Timestamp),
    Subscribe(Timestamp),
}

/// Ordered log shared between a peer and a checkpoint sink.
pub(crate) type Journal = Arc<Mutex<Vec<Op>>>;

/// One scripted step of a subscription.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Event(Event),
    Eose,
    Closed(&'static str),
    /// Never yields again.
    Hang,
}

#[derive(Default)]
struct Script {
    windows: VecDeque<Vec<Step>>,
    untils: Vec<Timestamp>,
    journal: Option<Journal>,
    connects: usize,
    delivered: usize,
    unsubscribes: usize,
    disconnects: usize,
    fail_connect: bool,
    fail_subscribe: bool,
}

/// A peer that answers each subscription with the next scripted window.
///
/// Once the script runs out every further window is empty.
#[derive(Clone, Default)]
pub(crate) struct ScriptedPeer {
    script: Arc<Mutex<Script>>,
}

impl ScriptedPeer {
    pub(crate) fn new(windows: Vec<Vec<Step>>) -> Self {
        let peer = Self::default();
        peer.script.lock().windows = windows.into();
        peer
    }

    pub(crate) fn failing_connect() -> Self {
        let peer = Self::default();
        peer.script.lock().fail_connect = true;
        peer
    }

    pub(crate) fn failing_subscribe() -> Self {
        let peer = Self::default();
        peer.script.lock().fail_subscribe = true;
        peer
    }

    /// Also log every subscription request into `journal`.
    pub(crate) fn with_journal(self, journal: Journal) -> Self {
        self.script.lock().journal = Some(journal);
        self
    }

    /// `until` bound of every subscription request, in order.
    pub(crate) fn untils(&self) -> Vec<Timestamp> {
        self.script.lock().untils.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.script.lock().connects
    }

    /// Events handed out across all subscriptions.
    pub(crate) fn delivered(&self) -> usize {
        self.script.lock().delivered
    }

    pub(crate) fn unsubscribes(&self) -> usize {
        self.script.lock().unsubscribes
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.script.lock().disconnects
    }
}

impl PeerConnector for ScriptedPeer {
    type Connection = ScriptedPeer;

    async fn connect(&self, _url: &str) -> Result<ScriptedPeer> {
        let mut script = self.script.lock();
        script.connects += 1;
        if script.fail_connect {
            return Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(self.clone())
    }
}

impl PeerConnection for ScriptedPeer {
    type Subscription = ScriptedSubscription;

    async fn subscribe(&self, filter: Filter) -> Result<ScriptedSubscription> {
        let mut script = self.script.lock();
        if script.fail_subscribe {
            return Err(Error::Subscription("blocked: not allowed".to_string()));
        }
        if let Some(until) = filter.until {
            script.untils.push(until);
            if let Some(journal) = &script.journal {
                journal.lock().push(Op::Subscribe(until));
            }
        }
        let steps = script.windows.pop_front().unwrap_or_else(|| vec![Step::Eose]);
        Ok(ScriptedSubscription {
            steps: steps.into(),
            script: Arc::clone(&self.script),
        })
    }

    async fn unsubscribe(&self, _subscription: ScriptedSubscription) {
        self.script.lock().unsubscribes += 1;
    }

    async fn disconnect(self) {
        self.script.lock().disconnects += 1;
    }
}

pub(crate) struct ScriptedSubscription {
    steps: VecDeque<Step>,
    script: Arc<Mutex<Script>>,
}

impl PeerSubscription for ScriptedSubscription {
    async fn next(&mut self) -> Option<SubscriptionItem> {
        match self.steps.pop_front()? {
            Step::Event(event) => {
                self.script.lock().delivered += 1;
                Some(SubscriptionItem::Event(Box::new(event)))
            }
            Step::Eose => Some(SubscriptionItem::EndOfStoredEvents),
            Step::Closed(reason) => Some(SubscriptionItem::Closed(reason.to_string())),
            Step::Hang => std::future::pending().await,
        }
    }
}
