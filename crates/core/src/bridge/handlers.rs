//! Message handler registry used for fan-out of accepted envelopes.

use pb_protocol::envelope::{Envelope, MessageType};
use pb_protocol::messages::Message;
use std::sync::Arc;

/// Callback for an accepted inbound message.
pub type MessageHandler = Arc<dyn Fn(&Envelope, &Message) + Send + Sync>;

/// Which inbound messages a handler wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFilter {
    Any,
    Only(MessageType),
}

impl MessageFilter {
    pub fn matches(self, kind: MessageType) -> bool {
        match self {
            MessageFilter::Any => true,
            MessageFilter::Only(wanted) => wanted == kind,
        }
    }
}

impl From<MessageType> for MessageFilter {
    fn from(kind: MessageType) -> Self {
        MessageFilter::Only(kind)
    }
}

/// Handle returned by `BridgeController::on_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub(crate) struct HandlerRegistry {
    next_id: u64,
    entries: Vec<(HandlerId, MessageFilter, MessageHandler)>,
}

impl HandlerRegistry {
    pub(crate) fn register(&mut self, filter: MessageFilter, handler: MessageHandler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.entries.push((id, filter, handler));
        id
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _, _)| *existing != id);
        self.entries.len() != before
    }

    /// Every handler interested in `kind`, in registration order.
    pub(crate) fn matching(&self, kind: MessageType) -> Vec<MessageHandler> {
        self.entries
            .iter()
            .filter(|(_, filter, _)| filter.matches(kind))
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
