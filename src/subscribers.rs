//! Real-time subscribers and best-effort fan-out of state updates
//!
//! The registry only tracks which listeners are eligible for broadcast; the
//! I/O layer owns the connections themselves. A listener is dropped from the
//! registry the first time a delivery to it fails.

use crate::error::DeliveryError;
use crate::state::ServiceState;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

pub type SubscriberId = Uuid;

/// A connected listener that accepts serialized state updates
pub trait Subscriber: Send + Sync {
    fn id(&self) -> SubscriberId;

    /// Hand one message to the listener. Must not block indefinitely.
    fn send(&self, message: Arc<str>) -> Result<(), DeliveryError>;
}

/// Set of currently connected subscribers
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a subscriber. Adding the same subscriber twice is a no-op.
    pub fn add(&self, subscriber: Arc<dyn Subscriber>) {
        let id = subscriber.id();
        self.subscribers.lock().entry(id).or_insert(subscriber);
        debug!(subscriber = %id, "Subscriber registered");
    }

    /// Deregister a subscriber, returning whether it was registered
    pub fn remove(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber removed");
        }
        removed
    }

    pub fn contains(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }

    /// Send a state update to every subscriber.
    ///
    /// The state is serialized once. Deliveries happen outside the lock so
    /// `add`/`remove` never wait on a slow listener; every subscriber whose
    /// delivery failed is pruned afterwards. Returns the number of successful
    /// deliveries.
    pub fn broadcast(&self, state: &ServiceState) -> usize {
        let message: Arc<str> = match serde_json::to_string(state) {
            Ok(json) => json.into(),
            Err(e) => {
                error!(service_id = state.service_id, error = %e, "Failed to serialize service state");
                return 0;
            }
        };
        self.broadcast_message(message)
    }

    fn broadcast_message(&self, message: Arc<str>) -> usize {
        let targets: Vec<Arc<dyn Subscriber>> = self.subscribers.lock().values().cloned().collect();

        let mut delivered = 0;
        let mut failed = Vec::new();
        for subscriber in targets {
            match subscriber.send(Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    debug!(subscriber = %subscriber.id(), error = %e, "Dropping subscriber after failed delivery");
                    failed.push(subscriber.id());
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock();
            for id in failed {
                subscribers.remove(&id);
            }
        }

        delivered
    }
}

/// Subscriber backed by a bounded queue drained by a connection writer.
///
/// A full queue means the consumer is too slow and counts as a failed
/// delivery, as does a queue whose receiver has been dropped.
pub struct ChannelSubscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
        });
        (subscriber, rx)
    }
}

impl Subscriber for ChannelSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, message: Arc<str>) -> Result<(), DeliveryError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}
