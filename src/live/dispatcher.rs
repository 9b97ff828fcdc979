//! Listener registry and inbound event dispatch.
//!
//! Listeners are registered per event category and invoked in registration
//! order. Dispatch snapshots the handler list before invoking, so callbacks
//! may register or remove listeners (including themselves) without
//! deadlocking, and a panicking listener cannot suppress delivery to the
//! listeners after it.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use super::protocol::{EventCategory, LiveEvent};

/// Callback invoked with each dispatched event.
pub type EventHandler = dyn Fn(&LiveEvent) + Send + Sync;

/// Opaque handle identifying one registration, used to remove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    listeners: HashMap<EventCategory, Vec<(ListenerId, Arc<EventHandler>)>>,
}

/// Category-keyed listener table shared between the caller and the reader
/// task.
#[derive(Default)]
pub struct ListenerRegistry {
    inner: Mutex<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a category; insertion order is invocation
    /// order.
    pub fn on<F>(&self, category: EventCategory, handler: F) -> ListenerId
    where
        F: Fn(&LiveEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner
            .listeners
            .entry(category)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a registration; returns whether it was present.
    pub fn off(&self, category: EventCategory, id: ListenerId) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.listeners.get_mut(&category) {
            Some(handlers) => {
                let before = handlers.len();
                handlers.retain(|(handler_id, _)| *handler_id != id);
                handlers.len() != before
            }
            None => false,
        }
    }

    /// Delivers one event to its category listeners, then to `All`
    /// listeners, in registration order.
    ///
    /// The handler list is snapshotted before invocation; the registry lock
    /// is not held while callbacks run.
    pub fn dispatch(&self, event: &LiveEvent) {
        let category = event.category();
        let snapshot: Vec<Arc<EventHandler>> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let mut snapshot = Vec::new();
            if let Some(handlers) = inner.listeners.get(&category) {
                snapshot.extend(handlers.iter().map(|(_, h)| h.clone()));
            }
            if let Some(handlers) = inner.listeners.get(&EventCategory::All) {
                snapshot.extend(handlers.iter().map(|(_, h)| h.clone()));
            }
            snapshot
        };

        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                log::warn!(
                    "listener for {:?} panicked; continuing with remaining listeners",
                    category
                );
            }
        }
    }

    /// Number of registrations for a category (test and diagnostics aid).
    pub fn listener_count(&self, category: EventCategory) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.listeners.get(&category).map_or(0, Vec::len)
    }
}
