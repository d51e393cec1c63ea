use serde::{Deserialize, Serialize};

use crate::types::{Message, MessageRole};

/// A prior turn sent along with a new prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    /// The role of the message.
    pub role: MessageRole,

    /// The text of the message.
    pub content: String,
}

impl ContextMessage {
    /// Create a new `ContextMessage`.
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ContextMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role(), message.text())
    }
}

/// Body of the outbound chat request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,

    /// The new user turn.
    pub prompt: String,

    /// Prior turns, oldest first.
    pub context: Vec<ContextMessage>,
}

impl ChatRequest {
    /// Create a new `ChatRequest`.
    pub fn new(
        model: impl Into<String>,
        prompt: impl Into<String>,
        context: Vec<ContextMessage>,
    ) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            context,
        }
    }
}
