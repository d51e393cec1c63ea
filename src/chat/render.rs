//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction so the REPL can
//! print streamed replies with or without ANSI styling.

use std::io::{self, Stdout, Write};

use crate::types::{MessageRole, MessageView};

/// ANSI escape code for dim text (used for info lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for the user label).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for yellow text (used for interruptions).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a chunk of reply text.
    ///
    /// This is called incrementally as tokens are streamed.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Print a whole transcript message with its role label.
    fn print_message(&mut self, message: &MessageView);

    /// Called when a reply is complete or failed.
    ///
    /// Used to ensure proper newlines after streaming.
    fn finish_response(&mut self);

    /// Called when a reply is stopped by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
///
/// Output goes to stdout by default; errors are written inline to the same
/// stream so they stay in order with the reply text.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    mid_line: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            mid_line: false,
        }
    }

    /// Consumes the renderer, returning its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    // Write errors are ignored.
    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn styled(&mut self, style: &str, text: &str) {
        if self.use_color {
            let line = format!("{style}{text}{ANSI_RESET}");
            self.write(&line);
        } else {
            self.write(text);
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            self.write("\n");
            self.mid_line = false;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.write(text);
        self.mid_line = !text.ends_with('\n');
    }

    fn print_error(&mut self, error: &str) {
        self.end_line();
        self.styled(ANSI_RED, &format!("Error: {error}"));
        self.write("\n");
    }

    fn print_info(&mut self, info: &str) {
        self.end_line();
        self.styled(ANSI_DIM, info);
        self.write("\n");
    }

    fn print_message(&mut self, message: &MessageView) {
        self.end_line();
        let (label, style) = match message.role {
            MessageRole::User => ("You", ANSI_GREEN),
            MessageRole::Assistant => ("Assistant", ANSI_CYAN),
        };
        self.styled(style, &format!("{label}:"));
        self.write(" ");
        self.write(&message.text);
        if message.streaming {
            self.styled(ANSI_DIM, " ...");
        }
        self.write("\n");
    }

    fn finish_response(&mut self) {
        self.end_line();
    }

    fn print_interrupted(&mut self) {
        self.end_line();
        self.styled(ANSI_YELLOW, "[interrupted]");
        self.write("\n");
    }
}
