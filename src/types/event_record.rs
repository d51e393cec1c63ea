use serde::{Deserialize, Serialize};

/// A decoded unit of a streamed reply.
///
/// Records are produced by the [`EventFrameParser`](crate::EventFrameParser) and consumed
/// immediately by a [`StreamSession`](crate::StreamSession); they are never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRecord {
    /// Incremental token text.
    ///
    /// `done` is set when the same wire record also carried the finality sentinel.
    Token {
        /// The token text to append.
        text: String,
        /// Whether this token is the last one.
        done: bool,
    },

    /// The reply is complete.
    Done,

    /// The endpoint reported a failure.
    Error {
        /// Error message.
        message: String,
        /// Optional elaboration.
        detail: Option<String>,
    },
}

impl EventRecord {
    /// Creates a non-final token record.
    pub fn token(text: impl Into<String>) -> Self {
        EventRecord::Token {
            text: text.into(),
            done: false,
        }
    }

    /// Returns true for records that end a session.
    pub fn is_terminal(&self) -> bool {
        match self {
            EventRecord::Token { done, .. } => *done,
            EventRecord::Done | EventRecord::Error { .. } => true,
        }
    }
}

/// The structured payload carried by a `data: ` line.
///
/// Unknown fields are ignored so endpoints that forward extra metadata
/// (timings, model name, context vectors) still parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPayload {
    /// Incremental token text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Finality sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,

    /// Presence indicates failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Optional elaboration of `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl StreamPayload {
    /// Interprets the payload as at most one record.
    ///
    /// An error wins over everything else.  A payload with neither text, a
    /// finality flag nor an error yields nothing.
    pub fn into_record(self) -> Option<EventRecord> {
        if let Some(message) = self.error.filter(|e| !e.is_empty()) {
            return Some(EventRecord::Error {
                message,
                detail: self.details.filter(|d| !d.is_empty()),
            });
        }
        let done = self.done.unwrap_or(false);
        match self.response.filter(|r| !r.is_empty()) {
            Some(text) => Some(EventRecord::Token { text, done }),
            None if done => Some(EventRecord::Done),
            None => None,
        }
    }
}
