//! Change notifications: the only channel through which the UI observes the
//! local mirror.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::key::Key;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeCause {
    Put,
    Delete,
    Clear,
    Optimistic,
    Confirmed,
    RolledBack,
    Imported,
}

/// Fired synchronously after every committed store mutation. `value` is
/// `None` when the record was removed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub store: String,
    pub key: Key,
    pub value: Option<Value>,
    pub version: u64,
    pub pending: bool,
    pub cause: ChangeCause,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

struct Entry {
    id: SubscriptionId,
    store: Option<String>,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: Vec<Entry>,
}

/// Synchronous listener registry keyed by store name.
///
/// Clone-friendly; clones share listeners. Listeners run on the notifying
/// task, after the registry lock is released, so a listener may subscribe or
/// unsubscribe from inside its callback.
#[derive(Clone, Default)]
pub struct Subscribers {
    registry: Arc<RwLock<Registry>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to changes of one store.
    pub fn on<F>(&self, store: &str, listener: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add(Some(store.to_string()), Arc::new(listener))
    }

    /// Listen to changes of every store.
    pub fn on_any<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.add(None, Arc::new(listener))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let before = registry.entries.len();
        registry.entries.retain(|entry| entry.id != id);
        registry.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify(&self, event: &ChangeEvent) {
        let listeners: Vec<Listener> = {
            let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
            registry
                .entries
                .iter()
                .filter(|entry| entry.store.as_deref().map_or(true, |s| s == event.store))
                .map(|entry| Arc::clone(&entry.listener))
                .collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    fn add(&self, store: Option<String>, listener: Listener) -> SubscriptionId {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        registry.next_id += 1;
        let id = SubscriptionId(registry.next_id);
        registry.entries.push(Entry {
            id,
            store,
            listener,
        });
        id
    }
}

#[cfg(feature = "emitter")]
pub use bridge::EmitterBridge;

#[cfg(feature = "emitter")]
mod bridge {
    use std::sync::{Arc, Mutex};

    use event_emitter_rs::EventEmitter;

    use super::{SubscriptionId, Subscribers};

    /// Forwards change events to an `EventEmitter` for in-process UI code
    /// that already listens there. Events are emitted under the store name
    /// with the change serialized as JSON.
    pub struct EmitterBridge;

    impl EmitterBridge {
        pub fn forward(subscribers: &Subscribers, emitter: Arc<Mutex<EventEmitter>>) -> SubscriptionId {
            subscribers.on_any(move |event| {
                let payload = match serde_json::to_string(event) {
                    Ok(payload) => payload,
                    Err(err) => {
                        tracing::warn!(store = %event.store, error = %err, "change event not serializable");
                        return;
                    }
                };
                match emitter.lock() {
                    Ok(mut emitter) => {
                        emitter.emit(&event.store, payload);
                    }
                    Err(_) => tracing::warn!(store = %event.store, "event emitter lock poisoned"),
                }
            })
        }
    }
}
