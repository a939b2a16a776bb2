//! Typed observer lists.
//!
//! A [`SubscriberRegistry`] maps subscription ids to callbacks for one event
//! type. The service keeps three independent registries (save status, project
//! updates, conversion events); they share this implementation but never
//! share state.
//!
//! ## Rules
//! - **Isolation**: a panicking callback is caught and logged; the remaining
//!   callbacks still run and the notifier never sees the panic.
//! - **Snapshot delivery**: `notify` works on a copy of the callback list, so
//!   callbacks may subscribe or unsubscribe while being notified.
//! - **Explicit removal**: dropping a [`Subscription`] does not unsubscribe.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<E> {
    name: &'static str,
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E> Inner<E> {
    fn callbacks(&self) -> MutexGuard<'_, Vec<(u64, Callback<E>)>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fan-out list of callbacks receiving `&E`.
///
/// Cloning yields another handle to the same list.
pub struct SubscriberRegistry<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for SubscriberRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> SubscriberRegistry<E> {
    /// Create an empty registry. `name` only appears in log lines.
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                next_id: AtomicU64::new(0),
                callbacks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a callback. Keep the returned [`Subscription`] to remove it later.
    pub fn on(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.callbacks().push((id, Arc::new(callback)));

        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Some(Box::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    inner.callbacks().retain(|(cb_id, _)| *cb_id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every registered callback.
    pub fn notify(&self, event: &E) {
        let snapshot: Vec<Callback<E>> = self
            .inner
            .callbacks()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for cb in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| cb(event))) {
                tracing::error!(
                    registry = self.inner.name,
                    "Subscriber callback panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    /// Remove every callback.
    pub fn clear(&self) {
        self.inner.callbacks().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.callbacks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by [`SubscriberRegistry::on`].
///
/// Owns nothing but the identity of its callback.
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl Subscription {
    /// Remove exactly the callback this handle was created for.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_reaches_all_callbacks() {
        let registry = SubscriberRegistry::<u32>::new("test");
        let sum = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let sum = sum.clone();
            registry.on(move |v| {
                sum.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }
        registry.notify(&2);
        assert_eq!(sum.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn panicking_callback_does_not_block_siblings() {
        let registry = SubscriberRegistry::<&'static str>::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        registry.on(|_| panic!("boom"));
        let h = hits.clone();
        registry.on(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&"event");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_removes_only_that_callback() {
        let registry = SubscriberRegistry::<()>::new("test");
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        let a2 = a.clone();
        let sub_a = registry.on(move |_| {
            a2.fetch_add(1, Ordering::SeqCst);
        });
        let b2 = b.clone();
        let _sub_b = registry.on(move |_| {
            b2.fetch_add(1, Ordering::SeqCst);
        });

        sub_a.unsubscribe();
        registry.notify(&());
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn dropping_subscription_keeps_callback() {
        let registry = SubscriberRegistry::<()>::new("test");
        drop(registry.on(|_| {}));
        assert_eq!(registry.len(), 1);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn unsubscribe_after_registry_dropped_is_noop() {
        let registry = SubscriberRegistry::<()>::new("test");
        let sub = registry.on(|_| {});
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn callback_may_unsubscribe_during_notify() {
        let registry = SubscriberRegistry::<()>::new("test");
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let s = slot.clone();
        let sub = registry.on(move |_| {
            if let Some(sub) = s.lock().unwrap().take() {
                sub.unsubscribe();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        registry.notify(&());
        assert!(registry.is_empty());
    }
}
