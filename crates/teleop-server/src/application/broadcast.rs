//! Fan-out of server events to connected operators.
//!
//! Every operator session subscribes once and receives a bounded channel.
//! [`BroadcastSink::emit`] pushes an event into every subscriber's channel;
//! [`BroadcastSink::emit_to`] targets a single subscriber.
//!
//! # Slow subscribers
//!
//! Delivery never blocks the emitter.  If a subscriber's channel is full the
//! event is dropped for that subscriber only.  Video frames are the bulk of
//! the traffic, and a stale frame is worthless anyway.
//!
//! # Pipeline lifecycle
//!
//! The set of subscribers is the [`ClientSet`].  Its transitions are reported
//! atomically: [`Subscription::first`] is `true` for exactly the subscriber
//! that took the set from empty to non-empty, and
//! [`BroadcastSink::unsubscribe`] returns the number left after removal.  The
//! control service starts and stops the frame pipeline on those transitions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;
use uuid::Uuid;

use crate::domain::messages::ServerEvent;

/// Opaque identity of one operator session.
pub type SubscriberId = Uuid;

/// Capacity of each subscriber's event queue.
pub const SUBSCRIBER_QUEUE: usize = 64;

/// The set of currently interested subscribers and their queues.
#[derive(Debug, Default)]
pub struct ClientSet {
    members: HashMap<SubscriberId, mpsc::Sender<Arc<ServerEvent>>>,
}

impl ClientSet {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A new subscriber's identity and event queue.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub events: mpsc::Receiver<Arc<ServerEvent>>,
    /// `true` if this subscriber made the set non-empty.
    pub first: bool,
}

#[derive(Debug, Default)]
pub struct BroadcastSink {
    clients: Mutex<ClientSet>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, ClientSet> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = Uuid::new_v4();
        let mut clients = self.clients();
        let first = clients.is_empty();
        clients.members.insert(id, tx);
        debug!(%id, total = clients.len(), "subscriber added");
        Subscription {
            id,
            events: rx,
            first,
        }
    }

    /// Removes `id` and returns how many subscribers remain.
    ///
    /// Removing an unknown id is a no-op.
    pub fn unsubscribe(&self, id: SubscriberId) -> usize {
        let mut clients = self.clients();
        if clients.members.remove(&id).is_some() {
            debug!(%id, total = clients.len(), "subscriber removed");
        }
        clients.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    /// Delivers `event` to every subscriber.
    pub fn emit(&self, event: ServerEvent) {
        let event = Arc::new(event);
        let mut clients = self.clients();
        clients.members.retain(|id, tx| deliver(id, tx, &event));
    }

    /// Delivers `event` to one subscriber.  Returns `false` if it is not subscribed
    /// or its queue is full.
    pub fn emit_to(&self, id: SubscriberId, event: ServerEvent) -> bool {
        let event = Arc::new(event);
        let mut clients = self.clients();
        let Some(tx) = clients.members.get(&id) else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(%id, event = event.name(), "subscriber queue full; event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                clients.members.remove(&id);
                false
            }
        }
    }
}

/// Sends to one subscriber; returns `false` if its receiver is gone.
fn deliver(id: &SubscriberId, tx: &mpsc::Sender<Arc<ServerEvent>>, event: &Arc<ServerEvent>) -> bool {
    match tx.try_send(Arc::clone(event)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(%id, event = event.name(), "subscriber queue full; event dropped");
            true
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%id, "subscriber receiver dropped; removing");
            false
        }
    }
}
