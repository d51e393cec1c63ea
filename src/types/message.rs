use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a message in a transcript.
///
/// Identifiers are assigned monotonically by the store that owns the
/// transcript and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value of this identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User role.
    User,

    /// Assistant role.
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Lifecycle status of a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// The assistant reply currently receiving tokens.
    Streaming,

    /// Finished normally.
    Complete,

    /// The stream failed; partial text is kept.
    Failed,

    /// The stream was stopped before it finished; partial text is kept.
    Interrupted,
}

/// A message in the conversation transcript.
///
/// Fields are read-only outside the crate; only [`ConversationStore`](crate::ConversationStore)
/// mutates messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub(crate) id: MessageId,
    pub(crate) role: MessageRole,
    pub(crate) text: String,
    pub(crate) status: MessageStatus,
}

impl Message {
    pub(crate) fn new(id: MessageId, role: MessageRole, text: String, status: MessageStatus) -> Self {
        Self {
            id,
            role,
            text,
            status,
        }
    }

    /// The message identifier.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// The message author.
    pub fn role(&self) -> MessageRole {
        self.role
    }

    /// The accumulated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The current status.
    pub fn status(&self) -> MessageStatus {
        self.status
    }

    /// Returns true while the message is receiving tokens.
    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }
}

/// Read-only snapshot of a message handed to presentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageView {
    /// The message identifier.
    pub id: MessageId,
    /// The message author.
    pub role: MessageRole,
    /// The accumulated text.
    pub text: String,
    /// Whether the message is still receiving tokens.
    pub streaming: bool,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            text: message.text.clone(),
            streaming: message.is_streaming(),
        }
    }
}
