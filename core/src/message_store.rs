/// Message history of the active conversation, kept in arrival order.
/// Frugal: one peer at a time, nothing persisted.
use crate::chat_types::Message;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageHistory {
    peer_id: Option<String>,
    messages: Vec<Message>,
}

impl MessageHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peer whose history is held, if any
    pub fn peer_id(&self) -> Option<&str> {
        self.peer_id.as_deref()
    }

    /// Switch to another peer. The old history is dropped from memory only.
    pub fn switch_to(&mut self, peer_id: Option<&str>) {
        if self.peer_id.as_deref() == peer_id {
            return;
        }
        self.peer_id = peer_id.map(str::to_string);
        self.messages.clear();
    }

    /// Replace with a full history load
    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    /// Append a live message. Repeated ids are kept; the service owns identity.
    pub fn push(&mut self, message: Message) {
        if self.messages.iter().any(|m| m.id == message.id) {
            debug!("Message {} already in history, appending anyway", message.id);
        }
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
