//! Local conversation state: the ordered message log that feeds requests
//! and is mutated as stream deltas arrive.
//!
//! Committed history is append-only. At most one trailing assistant
//! message may be "open" (accumulating); everything else is frozen.
//! Mutation is confined to the consumer's read loop, one task per active
//! stream session.

use crate::types::{ChatMessage, Message, MessageId, Role};

#[derive(Debug, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    open: Option<MessageId>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            open: None,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Appends a user message. Its content is frozen from this point on.
    pub fn push_user(&mut self, message: Message) -> MessageId {
        debug_assert_eq!(message.role, Role::User);
        let id = message.id.clone();
        self.messages.push(message);
        id
    }

    /// Opens an empty assistant placeholder as the streaming target.
    /// Only one message may be open at a time.
    pub fn open_assistant(&mut self) -> MessageId {
        debug_assert!(self.open.is_none(), "a stream target is already open");
        let message = Message::assistant_placeholder();
        let id = message.id.clone();
        self.messages.push(message);
        self.open = Some(id.clone());
        id
    }

    /// Grows the open message's content in place. The message identity
    /// never changes, only its content. Ignores deltas addressed to
    /// anything but the open target.
    pub fn append_delta(&mut self, id: &MessageId, delta: &str) {
        if self.open.as_ref() != Some(id) {
            tracing::warn!("Dropping delta for non-open message {}", id);
            return;
        }
        if let Some(msg) = self.messages.iter_mut().find(|m| &m.id == id) {
            msg.content.push_str(delta);
        }
    }

    /// Closes the open message; its content is immutable afterwards.
    /// Used for both natural completion and cancellation, which keeps
    /// whatever partial content accumulated.
    pub fn finalize(&mut self, id: &MessageId) {
        if self.open.as_ref() == Some(id) {
            self.open = None;
        }
    }

    /// Removes the message entirely; used only on true transport
    /// failure, never on cancellation. User messages are never removed.
    pub fn remove(&mut self, id: &MessageId) {
        if self.open.as_ref() == Some(id) {
            self.open = None;
        }
        self.messages
            .retain(|m| &m.id != id || m.role == Role::User);
    }

    pub fn content_of(&self, id: &MessageId) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| &m.id == id)
            .map(|m| m.content.as_str())
    }

    /// The role/content pairs sent to the relay. The open placeholder is
    /// excluded; it is the response, not part of the request.
    pub fn wire_history(&self) -> Vec<ChatMessage> {
        self.messages
            .iter()
            .filter(|m| self.open.as_ref() != Some(&m.id))
            .map(|m| ChatMessage::new(m.role, m.content.clone()))
            .collect()
    }
}
