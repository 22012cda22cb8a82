//! Publish/subscribe registry keyed by event name.
//!
//! Dispatch is synchronous and in registration order. The registry lock is
//! released before any callback runs, so callbacks may subscribe,
//! unsubscribe or call back into the manager; such changes apply from the
//! next emission on.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::events::ClientEvent;

type Callback = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Identity of one registration. Registering the same closure twice yields
/// two ids and two invocations per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry {
    id: SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: HashMap<String, Vec<Entry>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.lock();
        let mut map = f.debug_map();
        for (name, entries) in &registry.entries {
            map.entry(name, &entries.len());
        }
        map.finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `callback` for `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> Subscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry
            .entries
            .entry(event.to_string())
            .or_default()
            .push(Entry {
                id,
                callback: Arc::new(callback),
            });
        Subscription {
            event: event.to_string(),
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove one registration (`Some(id)`) or every registration for
    /// `event` (`None`). Returns how many were removed.
    ///
    /// `None` also removes other consumers' subscriptions to the same
    /// name; prefer [`Subscription::cancel`] when the bus is shared.
    pub fn off(&self, event: &str, id: Option<SubscriptionId>) -> usize {
        remove(&mut self.lock(), event, id)
    }

    /// Invoke every subscriber of `event.name()`. A panicking subscriber is
    /// logged and skipped. Returns how many subscribers ran to completion.
    pub(crate) fn emit(&self, event: &ClientEvent) -> usize {
        let callbacks: Vec<Callback> = {
            let registry = self.lock();
            match registry.entries.get(event.name()) {
                Some(entries) => entries.iter().map(|e| Arc::clone(&e.callback)).collect(),
                None => return 0,
            }
        };

        let mut completed = 0;
        for callback in callbacks {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic".to_string());
                    tracing::warn!(event = event.name(), panic = %msg, "Subscriber panicked");
                },
            }
        }
        completed
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.lock().entries.get(event).map_or(0, Vec::len)
    }
}

fn remove(registry: &mut Registry, event: &str, id: Option<SubscriptionId>) -> usize {
    match id {
        None => registry.entries.remove(event).map_or(0, |v| v.len()),
        Some(id) => {
            let Some(entries) = registry.entries.get_mut(event) else {
                return 0;
            };
            let before = entries.len();
            entries.retain(|e| e.id != id);
            let removed = before - entries.len();
            if entries.is_empty() {
                registry.entries.remove(event);
            }
            removed
        },
    }
}

/// Handle to one registration. Dropping it leaves the registration in
/// place; call [`cancel`](Self::cancel) to remove it.
#[derive(Debug)]
pub struct Subscription {
    event: String,
    id: SubscriptionId,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Remove exactly this registration. Returns false if it was already
    /// gone (removed via `off(event, None)`, or the bus was dropped).
    pub fn cancel(self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);
        remove(&mut registry, &self.event, Some(self.id)) > 0
    }
}
