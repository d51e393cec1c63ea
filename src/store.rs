//! The conversation transcript.
//!
//! [`ConversationStore`] owns the ordered list of messages and is the only
//! code that mutates them.  Every transition addresses a message by id and is
//! applied only if that message is the one currently streaming; anything else
//! is logged and ignored.

use tracing::warn;

use crate::observability::STORE_NOOPS;
use crate::types::{ContextMessage, Message, MessageId, MessageRole, MessageStatus, MessageView};

/// The ordered, append-only transcript of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    messages: Vec<Message>,
    next_id: u64,
}

impl ConversationStore {
    /// Creates an empty transcript.
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = MessageId::new(self.next_id);
        self.next_id += 1;
        id
    }

    fn push(&mut self, role: MessageRole, text: String, status: MessageStatus) -> MessageId {
        let id = self.allocate_id();
        self.messages.push(Message::new(id, role, text, status));
        id
    }

    /// Appends a complete assistant message, such as an opening greeting.
    pub fn append_greeting(&mut self, text: impl Into<String>) -> MessageId {
        self.push(MessageRole::Assistant, text.into(), MessageStatus::Complete)
    }

    /// Appends a user message.  User messages are complete from the start.
    pub fn append_user(&mut self, text: impl Into<String>) -> MessageId {
        self.push(MessageRole::User, text.into(), MessageStatus::Complete)
    }

    /// Appends an empty streaming assistant message.
    ///
    /// Any message still streaming is interrupted first, so at most one
    /// message streams at a time.
    pub fn append_assistant_placeholder(&mut self) -> MessageId {
        if let Some(previous) = self.streaming_id() {
            warn!(id = %previous, "interrupting streaming message to open a new reply");
            self.apply_stop(previous);
        }
        self.push(MessageRole::Assistant, String::new(), MessageStatus::Streaming)
    }

    fn streaming_mut(&mut self, id: MessageId, operation: &str) -> Option<&mut Message> {
        let found = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.id == id)
            .filter(|m| m.status == MessageStatus::Streaming);
        if found.is_none() {
            STORE_NOOPS.click();
            warn!(%id, operation, "ignoring transition for a message that is not streaming");
        }
        found
    }

    /// Appends token text to the streaming message `id`.
    ///
    /// When `finished` is set the message also becomes complete.  Returns
    /// false, changing nothing, if `id` is not the streaming message.
    pub fn apply_append(&mut self, id: MessageId, text: &str, finished: bool) -> bool {
        let Some(message) = self.streaming_mut(id, "append") else {
            return false;
        };
        message.text.push_str(text);
        if finished {
            message.status = MessageStatus::Complete;
        }
        true
    }

    /// Marks the streaming message `id` complete.
    pub fn apply_complete(&mut self, id: MessageId) -> bool {
        self.set_status(id, MessageStatus::Complete, "complete")
    }

    /// Marks the streaming message `id` failed, keeping its text.
    pub fn apply_fail(&mut self, id: MessageId) -> bool {
        self.set_status(id, MessageStatus::Failed, "fail")
    }

    /// Marks the streaming message `id` interrupted, keeping its text.
    pub fn apply_stop(&mut self, id: MessageId) -> bool {
        self.set_status(id, MessageStatus::Interrupted, "stop")
    }

    fn set_status(&mut self, id: MessageId, status: MessageStatus, operation: &str) -> bool {
        let Some(message) = self.streaming_mut(id, operation) else {
            return false;
        };
        message.status = status;
        true
    }

    /// All messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up a message by id.
    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The id of the message currently streaming, if any.
    pub fn streaming_id(&self) -> Option<MessageId> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_streaming())
            .map(Message::id)
    }

    /// Number of messages in the transcript.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if the transcript has no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// A read-only snapshot for presentation.
    pub fn snapshot(&self) -> Vec<MessageView> {
        self.messages.iter().map(MessageView::from).collect()
    }

    /// Prior turns to send with a new prompt: every message not streaming.
    pub fn context(&self) -> Vec<ContextMessage> {
        self.messages
            .iter()
            .filter(|m| !m.is_streaming())
            .map(ContextMessage::from)
            .collect()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
