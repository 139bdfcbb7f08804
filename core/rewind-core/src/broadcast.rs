//! Best-effort fan-out to live listeners.
//!
//! One generic broadcaster backs every cross-component signal in the core:
//! capture process output, data-changed ticks, per-record delivery, and alert
//! notifications. Delivery is lossy by design — a listener that detaches
//! misses everything after detachment, and a panicking listener is isolated
//! from the publisher and from the other listeners.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Registry<T> {
    next_id: u64,
    listeners: HashMap<u64, Listener<T>>,
}

/// Publish/subscribe fan-out for a single event payload type.
///
/// Cloning shares the listener registry. Subscribing and unsubscribing are
/// safe at any time, including from inside a listener callback: `publish`
/// snapshots the listener set before invoking anyone.
pub struct Broadcaster<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                listeners: HashMap::new(),
            })),
        }
    }

    /// Attaches a listener. Dropping the returned subscription detaches it
    /// without affecting other listeners.
    pub fn subscribe<F>(&self, listener: F) -> Subscription<T>
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock().expect("broadcaster lock poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(id, Arc::new(listener));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every listener attached right now. A listener
    /// panic is caught and logged; remaining listeners still run.
    pub fn publish(&self, event: &T) {
        let snapshot: Vec<Listener<T>> = {
            let registry = self.inner.lock().expect("broadcaster lock poisoned");
            registry.listeners.values().cloned().collect()
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!("Broadcast listener panicked; continuing with remaining listeners");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .expect("broadcaster lock poisoned")
            .listeners
            .len()
    }
}

/// RAII handle for one attached listener.
pub struct Subscription<T> {
    id: u64,
    registry: Weak<Mutex<Registry<T>>>,
}

impl<T> Subscription<T> {
    /// Explicit detach; equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.listeners.remove(&self.id);
            }
        }
    }
}
