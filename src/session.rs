//! One request/response lifecycle of a streamed reply.
//!
//! A [`StreamSession`] sends a [`ChatRequest`] through a [`Transport`], feeds
//! the response body to the record parser and turns every record into a
//! [`Transition`] for the conversation.  Transitions are pulled one at a time
//! with [`StreamSession::next_transition`]; reading the body is the only
//! point at which the session waits, and cancellation is observed there.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::Stream;
use futures::future::BoxFuture;
use futures::stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{ByteStream, Transport};
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_CANCELLED, SESSION_COMPLETED, SESSION_DURATION, SESSION_FAILED, SESSION_STARTED,
    SESSION_TTFR,
};
use crate::sse::process_sse;
use crate::types::{ChatRequest, EventRecord};

/// Lifecycle of a [`StreamSession`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no request sent.
    Idle,
    /// Request sent; awaiting or consuming the body.
    Active,
    /// A finality record arrived.
    Completed,
    /// The request was rejected, an error record arrived, or the transport failed.
    Failed,
    /// Cancelled by the caller or aborted by the transport.
    Cancelled,
}

impl SessionState {
    /// Returns true for the three end states.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Active => "active",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A state change a session asks the conversation to apply.
#[derive(Debug, Clone)]
pub enum Transition {
    /// Append token text to the in-flight message.
    Append {
        /// The token text.
        text: String,
        /// The token was the last one; the message is complete.
        finished: bool,
    },
    /// The message is complete.
    Complete,
    /// The reply failed; the message keeps its partial text.
    Fail {
        /// What went wrong, for display.
        error: Error,
    },
    /// The reply was stopped before finishing; the message keeps its partial text.
    Stop,
}

type RecordStream = Pin<Box<dyn Stream<Item = Result<EventRecord>> + Send>>;

enum Phase {
    Idle,
    Opening(BoxFuture<'static, Result<ByteStream>>),
    Reading(RecordStream),
    Closed,
}

/// Drives a single streamed reply.
pub struct StreamSession {
    state: SessionState,
    phase: Phase,
    cancel: CancellationToken,
    started_at: Option<Instant>,
    saw_record: bool,
}

impl StreamSession {
    /// Creates an idle session with its own cancellation token.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Creates an idle session observing `cancel`.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            state: SessionState::Idle,
            phase: Phase::Idle,
            cancel,
            started_at: None,
            saw_record: false,
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true between `start` and the first terminal transition.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Returns a token that cancels this session when triggered.
    ///
    /// The session notices at its next read and yields [`Transition::Stop`].
    pub fn canceller(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Moves the session from idle to active.
    ///
    /// The request goes out when the session is first polled.  Starting a
    /// session twice is a validation error.
    pub fn start(&mut self, transport: Arc<dyn Transport>, request: ChatRequest) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::validation(
                format!("session already {}", self.state),
                None,
            ));
        }
        SESSION_STARTED.click();
        debug!(model = %request.model, context = request.context.len(), "starting stream session");
        self.state = SessionState::Active;
        self.started_at = Some(Instant::now());
        self.phase = Phase::Opening(Box::pin(async move {
            transport.open_stream(&request).await
        }));
        Ok(())
    }

    /// Waits for the next transition.
    ///
    /// Returns `None` once the session is terminal (or was never started).
    /// Every terminal transition is returned exactly once.
    pub async fn next_transition(&mut self) -> Option<Transition> {
        let cancel = self.cancel.clone();
        loop {
            if self.state != SessionState::Active {
                return None;
            }
            match &mut self.phase {
                Phase::Opening(opening) => {
                    let opened = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        opened = opening => Some(opened),
                    };
                    match opened {
                        None => return Some(self.on_cancelled()),
                        Some(Ok(body)) => {
                            self.phase = Phase::Reading(Box::pin(process_sse(body)));
                        }
                        Some(Err(err)) => return Some(self.on_error(err)),
                    }
                }
                Phase::Reading(records) => {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        next = records.next() => Some(next),
                    };
                    return Some(match next {
                        None => self.on_cancelled(),
                        Some(Some(Ok(record))) => self.on_record(record),
                        Some(Some(Err(err))) => self.on_error(err),
                        Some(None) => self.on_closed(),
                    });
                }
                Phase::Idle | Phase::Closed => return None,
            }
        }
    }

    /// Cancels the session.
    ///
    /// Returns [`Transition::Stop`] if the session was active and `None`
    /// otherwise, so repeated calls have no further effect.
    pub fn cancel(&mut self) -> Option<Transition> {
        if self.state != SessionState::Active {
            return None;
        }
        Some(self.on_cancelled())
    }

    fn on_record(&mut self, record: EventRecord) -> Transition {
        if !self.saw_record {
            self.saw_record = true;
            if let Some(started_at) = self.started_at {
                SESSION_TTFR.add(started_at.elapsed().as_secs_f64());
            }
        }
        match record {
            EventRecord::Token { text, done } => {
                if done {
                    self.finish(SessionState::Completed);
                }
                Transition::Append {
                    text,
                    finished: done,
                }
            }
            EventRecord::Done => {
                self.finish(SessionState::Completed);
                Transition::Complete
            }
            EventRecord::Error { message, detail } => {
                let error = Error::stream(message, detail.as_deref());
                warn!(error = %error, "error record in stream");
                self.finish(SessionState::Failed);
                Transition::Fail { error }
            }
        }
    }

    fn on_error(&mut self, error: Error) -> Transition {
        if error.is_abort() || self.cancel.is_cancelled() {
            debug!(error = %error, "transport aborted");
            return self.on_cancelled();
        }
        warn!(error = %error, "stream session failed");
        self.finish(SessionState::Failed);
        Transition::Fail { error }
    }

    fn on_closed(&mut self) -> Transition {
        debug!("stream closed without a terminal record");
        self.finish(SessionState::Completed);
        Transition::Complete
    }

    fn on_cancelled(&mut self) -> Transition {
        self.finish(SessionState::Cancelled);
        Transition::Stop
    }

    fn finish(&mut self, state: SessionState) {
        match state {
            SessionState::Completed => SESSION_COMPLETED.click(),
            SessionState::Failed => SESSION_FAILED.click(),
            SessionState::Cancelled => SESSION_CANCELLED.click(),
            SessionState::Idle | SessionState::Active => {}
        }
        if let Some(started_at) = self.started_at {
            SESSION_DURATION.add(started_at.elapsed().as_secs_f64());
        }
        debug!(%state, "stream session finished");
        self.state = state;
        // Dropping the body aborts the request.
        self.phase = Phase::Closed;
        self.cancel.cancel();
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &self.state)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
