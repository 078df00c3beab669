use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

pub type SubscriptionId = u64;

/// Fan-out of "the snapshot changed" wake-ups.
///
/// Each listener owns a single-slot channel. A broadcast never waits on a
/// listener: when the slot is still full the wake-up is dropped, which is
/// harmless because a woken listener always re-reads the current snapshot.
#[derive(Clone, Default)]
pub struct EventFeed {
    inner: Arc<FeedInner>,
}

#[derive(Default)]
struct FeedInner {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<SubscriptionId, Listener>>,
}

struct Listener {
    wake: mpsc::Sender<()>,
    active: Arc<AtomicBool>,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (wake, receiver) = mpsc::channel(1);
        let active = Arc::new(AtomicBool::new(true));

        self.inner.listeners().insert(
            id,
            Listener {
                wake,
                active: Arc::clone(&active),
            },
        );
        tracing::debug!(subscription = id, "feed subscriber registered");

        Subscription {
            id,
            receiver,
            active,
            feed: self.clone(),
        }
    }

    /// Removes a listener. Unknown or already removed ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        // Cleared under the lock so a concurrent broadcast either finished
        // before this point or no longer sees the listener.
        let removed = self.inner.listeners().remove(&id);
        if let Some(listener) = removed {
            listener.active.store(false, Ordering::Release);
            tracing::debug!(subscription = id, "feed subscriber removed");
        }
    }

    /// Wakes every registered listener and returns how many were signalled.
    pub fn broadcast(&self) -> usize {
        let listeners = self.inner.listeners();
        let mut delivered = 0usize;
        for (id, listener) in listeners.iter() {
            match listener.wake.try_send(()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(())) => {
                    tracing::trace!(subscription = id, "wake-up already pending");
                }
                Err(mpsc::error::TrySendError::Closed(())) => {
                    tracing::trace!(subscription = id, "listener receiver dropped");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

impl FeedInner {
    fn listeners(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A registered feed listener. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    receiver: mpsc::Receiver<()>,
    active: Arc<AtomicBool>,
    feed: EventFeed,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Waits for the next wake-up. Returns `None` once unsubscribed, including
    /// when a wake-up was still buffered at the time of removal.
    pub async fn recv(&mut self) -> Option<()> {
        if !self.is_active() {
            return None;
        }
        self.receiver.recv().await?;
        self.is_active().then_some(())
    }

    pub fn unsubscribe(&self) {
        self.feed.unsubscribe(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feed.unsubscribe(self.id);
    }
}
