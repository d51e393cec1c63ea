//! A streaming chat client.
//!
//! A [`ConversationController`] keeps the transcript in a
//! [`ConversationStore`] and streams each reply through a [`StreamSession`],
//! which parses the `data: `-framed response body with an
//! [`EventFrameParser`].  [`ChatClient`] is the HTTP [`Transport`].

// Public modules
pub mod chat;
pub mod client;
pub mod controller;
pub mod error;
pub mod session;
pub mod sse;
pub mod store;
pub mod types;

mod observability;

// Re-exports
pub use client::{ByteStream, ChatClient, Transport};
pub use controller::{ConversationController, ConversationStats, ConversationUpdate, Turn};
pub use error::{Error, Result};
pub use observability::register_biometrics;
pub use session::{SessionState, StreamSession, Transition};
pub use sse::{EventFrameParser, process_sse};
pub use store::ConversationStore;
pub use types::*;
