//! Subscriber registry.
//!
//! Listeners register a callback and are invoked with `(id, version)` after
//! every cache mutation.
//!
//! # Panic Safety
//!
//! Each callback runs inside [`std::panic::catch_unwind`]. A panicking
//! callback is logged and skipped; the remaining callbacks still run and the
//! mutation that triggered the notification is unaffected.
//!
//! # Lifecycle
//!
//! [`SubscriberRegistry::subscribe`] returns a [`SubscriberHandle`]. Dropping
//! the handle, or calling [`SubscriberHandle::unsubscribe`], removes the
//! callback.

use orchard_core::{new_subscription_id, EntityId, SubscriptionId};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Callback invoked on every cache mutation.
pub type SubscriberFn = dyn Fn(&EntityId, u64) + Send + Sync + 'static;

type Subscribers = Mutex<HashMap<SubscriptionId, Arc<SubscriberFn>>>;

/// Set of listeners interested in cache mutations.
#[derive(Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<Subscribers>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback`; it stays registered until the handle goes away.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberHandle
    where
        F: Fn(&EntityId, u64) + Send + Sync + 'static,
    {
        let id = new_subscription_id();
        lock(&self.subscribers).insert(id, Arc::new(callback));
        tracing::debug!(subscriber_id = %id, "Cache subscriber registered");
        SubscriberHandle {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
            active: true,
        }
    }

    /// Invoke every registered callback with `(id, version)`.
    ///
    /// Returns how many callbacks panicked.
    pub fn notify(&self, id: &EntityId, version: u64) -> usize {
        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking.
        let callbacks: Vec<(SubscriptionId, Arc<SubscriberFn>)> = lock(&self.subscribers)
            .iter()
            .map(|(sub_id, cb)| (*sub_id, Arc::clone(cb)))
            .collect();

        let mut faults = 0;
        for (sub_id, callback) in callbacks {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| callback(id, version)));
            if let Err(panic) = result {
                faults += 1;
                tracing::warn!(
                    subscriber_id = %sub_id,
                    entity_id = %id,
                    version,
                    panic = %panic_message(panic.as_ref()),
                    "Cache subscriber panicked"
                );
            }
        }
        faults
    }

    pub fn len(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}

/// Registration of one subscriber.
///
/// The callback is removed when the handle is dropped.
#[must_use = "dropping the handle unsubscribes immediately"]
pub struct SubscriberHandle {
    id: SubscriptionId,
    subscribers: Weak<Subscribers>,
    active: bool,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove the callback. Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(subscribers) = self.subscribers.upgrade() {
            lock(&subscribers).remove(&self.id);
            tracing::debug!(subscriber_id = %self.id, "Cache subscriber removed");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

fn lock(subscribers: &Subscribers) -> MutexGuard<'_, HashMap<SubscriptionId, Arc<SubscriberFn>>> {
    subscribers.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    #[test]
    fn test_notify_reaches_every_subscriber() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        let _h1 = registry.subscribe(move |_, _| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&calls);
        let _h2 = registry.subscribe(move |_, _| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.notify(&EntityId::from("A"), 1), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_others() {
        let registry = SubscriberRegistry::new();
        let seen_version = Arc::new(AtomicU64::new(0));

        let _bad = registry.subscribe(|_, _| panic!("listener exploded"));
        let seen = Arc::clone(&seen_version);
        let _good = registry.subscribe(move |_, version| {
            seen.store(version, Ordering::SeqCst);
        });

        let faults = registry.notify(&EntityId::from("A"), 7);
        assert_eq!(faults, 1);
        assert_eq!(seen_version.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let registry = SubscriberRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let mut handle = registry.subscribe(move |_, _| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&EntityId::from("A"), 1);
        handle.unsubscribe();
        handle.unsubscribe();
        registry.notify(&EntityId::from("A"), 2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!handle.is_active());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_dropping_handle_unsubscribes() {
        let registry = SubscriberRegistry::new();
        {
            let _handle = registry.subscribe(|_, _| {});
            assert_eq!(registry.len(), 1);
        }
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_handle_outliving_registry_is_harmless() {
        let registry = SubscriberRegistry::new();
        let mut handle = registry.subscribe(|_, _| {});
        drop(registry);
        handle.unsubscribe();
        assert!(!handle.is_active());
    }
}
