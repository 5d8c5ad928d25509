use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::event::Event;

/// Handle to a subscribed callback. Keep it to unsubscribe later; identity
/// is the allocation, so clones of the same handle compare equal.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

/// Publish/subscribe registry keyed by event name.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<String, Vec<Listener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, name: impl Into<String>, listener: Listener) {
        self.subscribers
            .lock()
            .entry(name.into())
            .or_default()
            .push(listener);
    }

    /// Removes the first occurrence of `listener` under `name`.
    pub fn unsubscribe(&self, name: &str, listener: &Listener) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(listeners) = subscribers.get_mut(name) else {
            return false;
        };
        let Some(position) = listeners.iter().position(|l| same_listener(l, listener)) else {
            return false;
        };
        listeners.remove(position);
        if listeners.is_empty() {
            subscribers.remove(name);
        }
        true
    }

    pub fn unsubscribe_event(&self, name: &str) {
        self.subscribers.lock().remove(name);
    }

    pub fn clear(&self) {
        self.subscribers.lock().clear();
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.subscribers.lock().get(name).map_or(0, Vec::len)
    }

    /// Calls every listener registered for the event, in subscription order.
    ///
    /// Listeners run against a snapshot taken before the first call, so
    /// subscribing or unsubscribing from inside a listener only affects later
    /// dispatches.
    pub fn dispatch(&self, event: &Event) -> usize {
        let snapshot = match self.subscribers.lock().get(event.name()) {
            Some(listeners) => listeners.clone(),
            None => return 0,
        };
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

fn same_listener(a: &Listener, b: &Listener) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
