//! Subscriber fan-out.
//!
//! Each subscriber owns a bounded queue. Publishing never waits: a full
//! queue loses that one notification for that one subscriber, and a closed
//! queue is unregistered on the spot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::notification::Notification;
use crate::error::Error;

/// Identifier of a registered subscriber.
pub type SubscriberId = u64;

/// Registry of subscriber queues.
#[derive(Debug)]
pub struct Hub {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Notification>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl Hub {
    /// Create a hub whose subscriber queues hold `queue_capacity` entries.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register a subscriber whose queue starts with `initial`.
    ///
    /// The initial notifications are queued before the subscriber becomes
    /// visible to [`Hub::publish`], so they always come first.
    pub fn register(self: &Arc<Self>, initial: Vec<Notification>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.queue_capacity + initial.len());
        for notification in initial {
            // capacity covers the whole backlog
            let _ = tx.try_send(notification);
        }
        self.lock().insert(id, tx);
        debug!(subscriber = id, "Subscriber registered");

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        if self.lock().remove(&id).is_some() {
            debug!(subscriber = id, "Subscriber unregistered");
        }
    }

    /// Queue a notification for every subscriber.
    ///
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, notification: &Notification) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(notification.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscriber = id,
                        event = notification.event_name(),
                        "Subscriber queue full, dropping notification"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
            debug!(subscriber = id, "{}", Error::transport("subscriber queue closed"));
        }

        delivered
    }

    /// Queue a notification for one subscriber.
    ///
    /// Returns `false` if the subscriber is gone or its queue is full.
    pub fn send_to(&self, id: SubscriberId, notification: Notification) -> bool {
        let subscribers = self.lock();
        subscribers
            .get(&id)
            .is_some_and(|tx| tx.try_send(notification).is_ok())
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::Sender<Notification>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A subscriber's end of the fan-out.
///
/// Dropping it unregisters the subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Notification>,
    hub: Weak<Hub>,
}

impl Subscription {
    /// This subscriber's id.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next notification.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.rx.recv().await
    }

    /// Take the next notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.rx.try_recv().ok()
    }

    /// Turn the subscription into a stream of notifications.
    pub fn into_stream(self) -> impl Stream<Item = Notification> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let next = subscription.recv().await?;
            Some((next, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unregister(self.id);
        }
    }
}
