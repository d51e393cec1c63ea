//! Pieces of the interactive chat application.
//!
//! The `chatstream-chat` binary is a thin loop over these:
//!
//! - [`config`]: CLI arguments, config file and environment, resolved into a [`ChatConfig`]
//! - [`commands`]: slash command parsing
//! - [`render`]: printing streamed replies to the terminal

pub mod commands;
pub mod config;
pub mod render;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig, ConfigFile};
pub use render::{PlainTextRenderer, Renderer};
