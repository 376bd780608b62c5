//! Window-level `message` listener registry.
//!
//! [`HostWindow`] stands in for the browser window the host page runs in:
//! listeners are added and removed by id, and [`HostWindow::dispatch_message`]
//! delivers a [`MessageEvent`] to every listener registered at that moment.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A cross-document `message` event.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    /// Serialized origin of the sending document, as reported by the browser.
    pub origin: String,

    /// The structured-clone payload.
    pub data: Value,
}

impl MessageEvent {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// Handle returned by [`HostWindow::add_message_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, MessageListener)>,
}

/// Cloneable handle to a window's listener registry.
#[derive(Clone, Default)]
pub struct HostWindow {
    registry: Arc<Mutex<Registry>>,
}

impl HostWindow {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener for `message` events.
    pub fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        let mut registry = self.registry();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, listener));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry();
        let before = registry.listeners.len();
        registry.listeners.retain(|(existing, _)| *existing != id);
        registry.listeners.len() != before
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry().listeners.len()
    }

    /// Deliver `event` to every currently registered listener.
    ///
    /// Listeners run outside the registry lock, so a listener may add or
    /// remove listeners (including itself) while handling the event.
    pub fn dispatch_message(&self, event: &MessageEvent) {
        let listeners: Vec<MessageListener> = self
            .registry()
            .listeners
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(event);
        }
    }
}
