mod chat_request;
mod event_record;
mod message;

pub use chat_request::{ChatRequest, ContextMessage};
pub use event_record::{EventRecord, StreamPayload};
pub use message::{Message, MessageId, MessageRole, MessageStatus, MessageView};
