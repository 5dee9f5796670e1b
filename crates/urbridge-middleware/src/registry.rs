//! Subscriber registry and broadcaster.
//!
//! Every registered subscriber owns the receiving half of a bounded
//! [`tokio::sync::mpsc`] queue; the registry keeps the sending halves.
//! [`SubscriberRegistry::broadcast`] never blocks: it `try_send`s a clone of
//! the message into each queue and evicts any subscriber whose queue is
//! closed (the connection went away) or full (the connection stalled).
//!
//! Queues are FIFO and nothing is ever dropped from the middle of one, so a
//! subscriber that stays registered sees every broadcast message in order.
//! A subscriber that falls behind by more than the queue capacity is cut off
//! instead of silently skipping states.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Outcome of one [`SubscriberRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the message was queued for.
    pub delivered: usize,
    /// Subscribers evicted because their queue was closed or full.
    pub removed: usize,
}

/// Tracks live push connections and fans messages out to them.
pub struct SubscriberRegistry<M> {
    subscribers: Mutex<HashMap<Uuid, mpsc::Sender<M>>>,
    capacity: usize,
}

impl<M: Clone> SubscriberRegistry<M> {
    /// Create a registry whose subscribers each buffer up to `capacity`
    /// undelivered messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<M>>> {
        // The map is always left consistent, so a poisoned lock is still
        // safe to use.
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a new subscriber and return its receiving end.
    pub fn register(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        let mut subs = self.lock();
        subs.insert(id, tx);
        debug!(subscriber = %id, total = subs.len(), "subscriber registered");
        Subscription { id, receiver: rx }
    }

    /// Remove a subscriber.  Returns `false` when it was already gone.
    pub fn unregister(&self, id: Uuid) -> bool {
        let mut subs = self.lock();
        let removed = subs.remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, total = subs.len(), "subscriber unregistered");
        }
        removed
    }

    /// Queue `message` for every subscriber.
    ///
    /// A failure on one subscriber evicts it and delivery continues to the
    /// rest.
    pub fn broadcast(&self, message: &M) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut subs = self.lock();
        subs.retain(|id, tx| match tx.try_send(message.clone()) {
            Ok(()) => {
                report.delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "subscriber closed; removing");
                report.removed += 1;
                false
            }
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %id, capacity = self.capacity, "subscriber stalled; removing");
                report.removed += 1;
                false
            }
        });
        report
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<M: Clone> Default for SubscriberRegistry<M> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// The receiving side of one registered subscriber.
pub struct Subscription<M> {
    id: Uuid,
    receiver: mpsc::Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next message.  Returns `None` once the registry has
    /// evicted this subscriber and its queue is drained.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take the next queued message without waiting.
    pub fn try_recv(&mut self) -> Option<M> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let registry = SubscriberRegistry::<String>::default();
        let mut a = registry.register();
        let mut b = registry.register();
        let mut c = registry.register();

        let report = registry.broadcast(&"state".to_string());
        assert_eq!(report, BroadcastReport { delivered: 3, removed: 0 });

        assert_eq!(a.recv().await.as_deref(), Some("state"));
        assert_eq!(b.recv().await.as_deref(), Some("state"));
        assert_eq!(c.recv().await.as_deref(), Some("state"));
    }

    #[tokio::test]
    async fn failed_subscriber_is_removed_and_others_still_receive() {
        let registry = SubscriberRegistry::<u32>::default();
        let mut a = registry.register();
        let failed = registry.register();
        let mut c = registry.register();
        let failed_id = failed.id();
        drop(failed);

        let report = registry.broadcast(&7);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.removed, 1);
        assert!(!registry.contains(failed_id));
        assert_eq!(registry.len(), 2);

        assert_eq!(a.recv().await, Some(7));
        assert_eq!(c.recv().await, Some(7));
    }

    #[tokio::test]
    async fn stalled_subscriber_is_evicted_without_blocking() {
        let registry = SubscriberRegistry::<u32>::new(2);
        let stalled = registry.register();
        let mut healthy = registry.register();

        for n in 0..3 {
            registry.broadcast(&n);
            // The healthy subscriber keeps up.
            assert_eq!(healthy.recv().await, Some(n));
        }

        assert!(!registry.contains(stalled.id()));
        assert!(registry.contains(healthy.id()));
    }

    #[tokio::test]
    async fn messages_arrive_in_broadcast_order() {
        let registry = SubscriberRegistry::<u32>::default();
        let mut sub = registry.register();
        for n in 0..10 {
            registry.broadcast(&n);
        }
        for n in 0..10 {
            assert_eq!(sub.recv().await, Some(n));
        }
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SubscriberRegistry::<u32>::default();
        let sub = registry.register();
        assert!(registry.unregister(sub.id()));
        assert!(!registry.unregister(sub.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let registry = SubscriberRegistry::<u32>::default();
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn broadcast_with_no_subscribers_is_a_no_op() {
        let registry = SubscriberRegistry::<u32>::default();
        assert_eq!(registry.broadcast(&1), BroadcastReport::default());
    }

    #[tokio::test]
    async fn evicted_subscriber_drains_then_ends() {
        let registry = SubscriberRegistry::<u32>::new(1);
        let mut sub = registry.register();
        registry.broadcast(&1);
        registry.broadcast(&2); // full → evicted
        assert_eq!(sub.recv().await, Some(1));
        assert_eq!(sub.recv().await, None);
    }
}
