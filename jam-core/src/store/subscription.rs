use std::{
    fmt,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
};

use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use futures_util::Stream;
use log::debug;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{Id, RecordEvent, RecordId};

pub type SubscriptionId = Id<Subscription>;

/// Keeps track of who listens to which record, and fans out events to them.
/// Stores share this to implement [crate::RecordStore::subscribe].
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: DashMap<RecordId, Vec<Subscriber>>,
}

struct Subscriber {
    id: SubscriptionId,
    sender: UnboundedSender<RecordEvent>,
}

/// A live stream of changes to a single record.
///
/// Dropping the subscription unsubscribes it.
pub struct Subscription {
    record_id: RecordId,
    receiver: UnboundedReceiver<RecordEvent>,
    handle: SubscriptionHandle,
}

/// A cloneable handle used to cancel a [Subscription] from anywhere
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    record_id: RecordId,
    cancelled: Arc<AtomicCell<bool>>,
    registry: Weak<SubscriberRegistry>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new subscriber to the given record
    pub fn register(self: &Arc<Self>, record_id: &str) -> Subscription {
        let (sender, receiver) = unbounded_channel();
        let id = SubscriptionId::new();

        self.subscribers
            .entry(record_id.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        Subscription {
            record_id: record_id.to_string(),
            receiver,
            handle: SubscriptionHandle {
                id,
                record_id: record_id.to_string(),
                cancelled: Default::default(),
                registry: Arc::downgrade(self),
            },
        }
    }

    /// Sends an event to every subscriber of the event's record.
    /// Subscribers whose receiving end is gone are removed.
    pub fn publish(&self, event: &RecordEvent) {
        if let Some(mut subscribers) = self.subscribers.get_mut(&event.record.id) {
            subscribers.retain(|s| s.sender.send(event.clone()).is_ok());
        }
    }

    /// Drops every subscriber of a record, which ends their streams
    pub fn close(&self, record_id: &str) {
        self.subscribers.remove(record_id);
    }

    /// Returns how many subscribers are registered across all records
    pub fn count(&self) -> usize {
        self.subscribers.iter().map(|s| s.len()).sum()
    }

    fn remove(&self, record_id: &str, id: SubscriptionId) {
        let now_empty = match self.subscribers.get_mut(record_id) {
            Some(mut subscribers) => {
                subscribers.retain(|s| s.id != id);
                subscribers.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.subscribers.remove_if(record_id, |_, s| s.is_empty());
        }
    }
}

impl Subscription {
    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Waits for the next event. Returns [None] once unsubscribed and drained.
    pub async fn recv(&mut self) -> Option<RecordEvent> {
        self.receiver.recv().await
    }

    /// Returns an already delivered event, if any
    pub fn try_recv(&mut self) -> Option<RecordEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn unsubscribe(&self) {
        self.handle.unsubscribe()
    }
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Stops delivery of further events. Calling this more than once does nothing.
    pub fn unsubscribe(&self) {
        if self.cancelled.swap(true) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.record_id, self.id);
            debug!("Subscription {} to {} cancelled", self.id, self.record_id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.handle.unsubscribe()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.handle.id)
            .field("record_id", &self.record_id)
            .field("cancelled", &self.handle.is_cancelled())
            .finish()
    }
}

impl Stream for Subscription {
    type Item = RecordEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
