//! Subscriber registry and frame fan-out.

use std::sync::{Arc, RwLock};

use tracing::trace;

/// Callback receiving every raw inbound frame.
pub type Subscriber = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Set of subscribers keyed by `Arc` identity.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    subscribers: RwLock<Vec<Subscriber>>,
}

impl SubscriberRegistry {
    /// Adds `subscriber` unless the same `Arc` is already registered.
    pub(crate) fn add(&self, subscriber: Subscriber) -> bool {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if subs.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subs.push(subscriber);
        true
    }

    pub(crate) fn clear(&self) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Delivers `frame` to every subscriber in registration order.
    ///
    /// Callbacks run outside the lock so they may add or clear subscribers.
    pub(crate) fn publish(&self, frame: &[u8]) {
        let snapshot: Vec<Subscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        trace!(subscribers = snapshot.len(), bytes = frame.len(), "fan-out");
        for subscriber in snapshot {
            subscriber(frame);
        }
    }
}

/// Compares data pointers only; vtable pointers of the same closure may
/// differ between codegen units.
fn same_subscriber(a: &Subscriber, b: &Subscriber) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
