//! Turn-taking over a conversation.
//!
//! [`ConversationController`] ties the pieces together: a submission appends
//! the user message and an assistant placeholder to the [`ConversationStore`]
//! and opens a [`StreamSession`] for the reply.  The caller then pulls
//! [`ConversationUpdate`]s with [`ConversationController::next_update`]; each
//! one is a session transition that has already been applied to the store.
//!
//! At most one session is held at a time, so tokens from two replies can
//! never interleave.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::Transport;
use crate::session::{StreamSession, Transition};
use crate::store::ConversationStore;
use crate::types::{ChatRequest, MessageId, MessageView};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "llava:13b";

/// A change to the transcript produced by the active reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationUpdate {
    /// Token text was appended to the reply.
    Token {
        /// The reply being streamed.
        id: MessageId,
        /// The appended text.
        text: String,
        /// The token was the last one and the reply is complete.
        finished: bool,
    },
    /// The reply completed.
    Completed {
        /// The completed reply.
        id: MessageId,
    },
    /// The reply failed; `error` is also available from [`ConversationController::error`].
    Failed {
        /// The failed reply.
        id: MessageId,
        /// The message surfaced to the user.
        error: String,
    },
    /// The reply was stopped before it finished.
    Stopped {
        /// The interrupted reply.
        id: MessageId,
    },
}

impl ConversationUpdate {
    /// The reply this update applies to.
    pub fn id(&self) -> MessageId {
        match self {
            ConversationUpdate::Token { id, .. }
            | ConversationUpdate::Completed { id }
            | ConversationUpdate::Failed { id, .. }
            | ConversationUpdate::Stopped { id } => *id,
        }
    }

    /// Returns true if the reply has reached an end state.
    pub fn is_terminal(&self) -> bool {
        match self {
            ConversationUpdate::Token { finished, .. } => *finished,
            _ => true,
        }
    }
}

/// The ids created by a submission.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Turn {
    /// The user's message.
    pub user: MessageId,
    /// The assistant reply being streamed.
    pub reply: MessageId,
}

/// Outcome tallies for a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationStats {
    /// Number of accepted submissions.
    pub turns: u64,
    /// Replies that completed.
    pub completed: u64,
    /// Replies that failed.
    pub failed: u64,
    /// Replies that were stopped.
    pub stopped: u64,
    /// Token records appended across all replies.
    pub tokens: u64,
}

struct ActiveTurn {
    session: StreamSession,
    reply: MessageId,
}

/// Orchestrates submissions, streamed replies and cancellation.
pub struct ConversationController {
    transport: Arc<dyn Transport>,
    model: String,
    store: ConversationStore,
    active: Option<ActiveTurn>,
    error: Option<String>,
    stats: ConversationStats,
}

impl ConversationController {
    /// Creates a controller with an empty transcript.
    pub fn new(transport: Arc<dyn Transport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
            store: ConversationStore::new(),
            active: None,
            error: None,
            stats: ConversationStats::default(),
        }
    }

    /// Seeds the transcript with an assistant greeting.
    pub fn with_greeting(mut self, greeting: impl Into<String>) -> Self {
        self.store.append_greeting(greeting);
        self
    }

    /// Submits a user prompt and opens a streamed reply.
    ///
    /// Blank input is ignored and returns `None`.  A reply still streaming is
    /// stopped first.  The transcript holds the user message and an empty
    /// streaming reply as soon as this returns; nothing is sent until
    /// [`next_update`](Self::next_update) is polled.
    pub fn submit(&mut self, text: &str) -> Option<Turn> {
        if text.trim().is_empty() {
            return None;
        }
        if self.stop() {
            debug!("stopped the previous reply for a new submission");
        }
        self.error = None;

        let context = self.store.context();
        let user = self.store.append_user(text);
        let reply = self.store.append_assistant_placeholder();
        self.stats.turns += 1;

        let request = ChatRequest::new(self.model.clone(), text, context);
        let mut session = StreamSession::new();
        match session.start(Arc::clone(&self.transport), request) {
            Ok(()) => {
                debug!(%user, %reply, model = %self.model, "submitted turn");
                self.active = Some(ActiveTurn { session, reply });
            }
            Err(err) => {
                self.apply(reply, Transition::Fail { error: err });
            }
        }
        Some(Turn { user, reply })
    }

    /// Waits for the active reply's next transition and applies it.
    ///
    /// Returns `None` when no reply is streaming.
    pub async fn next_update(&mut self) -> Option<ConversationUpdate> {
        let turn = self.active.as_mut()?;
        let reply = turn.reply;
        let transition = turn.session.next_transition().await;
        let finished = !turn.session.is_active();
        if finished {
            self.active = None;
        }
        transition.map(|transition| self.apply(reply, transition))
    }

    /// Drives the active reply to its end and returns every update applied.
    pub async fn run_to_end(&mut self) -> Vec<ConversationUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.next_update().await {
            updates.push(update);
        }
        updates
    }

    /// Stops the active reply, keeping its partial text.
    ///
    /// Returns false if nothing was streaming.
    pub fn stop(&mut self) -> bool {
        let Some(mut turn) = self.active.take() else {
            return false;
        };
        match turn.session.cancel() {
            Some(transition) => {
                self.apply(turn.reply, transition);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, reply: MessageId, transition: Transition) -> ConversationUpdate {
        match transition {
            Transition::Append { text, finished } => {
                self.store.apply_append(reply, &text, finished);
                self.stats.tokens += 1;
                if finished {
                    self.stats.completed += 1;
                }
                ConversationUpdate::Token {
                    id: reply,
                    text,
                    finished,
                }
            }
            Transition::Complete => {
                self.store.apply_complete(reply);
                self.stats.completed += 1;
                ConversationUpdate::Completed { id: reply }
            }
            Transition::Fail { error } => {
                self.store.apply_fail(reply);
                self.stats.failed += 1;
                let error = error.to_string();
                self.error = Some(error.clone());
                ConversationUpdate::Failed { id: reply, error }
            }
            Transition::Stop => {
                self.store.apply_stop(reply);
                self.stats.stopped += 1;
                ConversationUpdate::Stopped { id: reply }
            }
        }
    }

    /// A read-only snapshot of the transcript.
    pub fn transcript(&self) -> Vec<MessageView> {
        self.store.snapshot()
    }

    /// The underlying transcript.
    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The error from the most recent failed reply, cleared on the next submission.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns true while a reply is streaming.
    pub fn is_generating(&self) -> bool {
        self.active.is_some()
    }

    /// A token that stops the active reply from another task.
    ///
    /// The stop takes effect at the reply's next read; the caller still
    /// polls [`next_update`](Self::next_update) to observe it.
    pub fn interrupt_handle(&self) -> Option<CancellationToken> {
        self.active.as_ref().map(|turn| turn.session.canceller())
    }

    /// The model requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Changes the model for subsequent submissions.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
    }

    /// Outcome tallies since the controller was created.
    pub fn stats(&self) -> &ConversationStats {
        &self.stats
    }
}

impl std::fmt::Debug for ConversationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationController")
            .field("model", &self.model)
            .field("messages", &self.store.len())
            .field("generating", &self.is_generating())
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures::stream::{self, StreamExt};

    use super::*;
    use crate::client::ByteStream;
    use crate::error::{Error, Result};
    use crate::types::{ContextMessage, MessageRole, MessageStatus};

    /// Replays one scripted body per request, in order.
    struct ReplayTransport {
        bodies: Mutex<Vec<Body>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    enum Body {
        Chunks(Vec<&'static str>, bool),
        Reject(Error),
    }

    impl ReplayTransport {
        fn new(bodies: Vec<Body>) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(bodies.into_iter().rev().collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    fn complete(chunks: &[&'static str]) -> Body {
        Body::Chunks(chunks.to_vec(), false)
    }

    fn hanging(chunks: &[&'static str]) -> Body {
        Body::Chunks(chunks.to_vec(), true)
    }

    #[async_trait::async_trait]
    impl Transport for ReplayTransport {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            let body = self.bodies.lock().unwrap().pop();
            match body {
                Some(Body::Chunks(chunks, hang)) => {
                    let chunks = stream::iter(
                        chunks
                            .into_iter()
                            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                            .collect::<Vec<_>>(),
                    );
                    if hang {
                        Ok(Box::pin(chunks.chain(stream::pending())))
                    } else {
                        Ok(Box::pin(chunks))
                    }
                }
                Some(Body::Reject(err)) => Err(err),
                None => Ok(Box::pin(stream::pending())),
            }
        }
    }

    fn controller(transport: Arc<ReplayTransport>) -> ConversationController {
        ConversationController::new(transport, DEFAULT_MODEL)
    }

    #[tokio::test]
    async fn submit_appends_user_and_placeholder_immediately() {
        let transport = ReplayTransport::new(vec![]);
        let mut controller = controller(transport.clone());
        let turn = controller.submit("Hello").unwrap();

        let transcript = controller.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].id, turn.user);
        assert_eq!(transcript[0].role, MessageRole::User);
        assert_eq!(transcript[0].text, "Hello");
        assert!(!transcript[0].streaming);
        assert_eq!(transcript[1].id, turn.reply);
        assert_eq!(transcript[1].role, MessageRole::Assistant);
        assert_eq!(transcript[1].text, "");
        assert!(transcript[1].streaming);
        assert!(controller.is_generating());
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_submission_is_ignored() {
        let mut controller = controller(ReplayTransport::new(vec![]));
        assert!(controller.submit("").is_none());
        assert!(controller.submit("  \n\t").is_none());
        assert!(controller.transcript().is_empty());
        assert!(!controller.is_generating());
        assert_eq!(controller.stats().turns, 0);
    }

    #[tokio::test]
    async fn streamed_tokens_complete_reply() {
        let transport = ReplayTransport::new(vec![complete(&[
            "data: {\"response\":\"Hi\",\"done\":false}\n\n",
            "data: {\"response\":\" there\",\"done\":true}\n\n",
        ])]);
        let mut controller = controller(transport);
        let turn = controller.submit("Hello").unwrap();

        let updates = controller.run_to_end().await;
        assert_eq!(
            updates,
            vec![
                ConversationUpdate::Token {
                    id: turn.reply,
                    text: "Hi".to_string(),
                    finished: false,
                },
                ConversationUpdate::Token {
                    id: turn.reply,
                    text: " there".to_string(),
                    finished: true,
                },
            ]
        );
        let reply = controller.store().get(turn.reply).unwrap();
        assert_eq!(reply.text(), "Hi there");
        assert_eq!(reply.status(), MessageStatus::Complete);
        assert!(!controller.is_generating());
        assert!(controller.next_update().await.is_none());
        assert_eq!(controller.stats().completed, 1);
        assert_eq!(controller.stats().tokens, 2);
    }

    #[tokio::test]
    async fn error_record_fails_reply_and_surfaces_error() {
        let transport = ReplayTransport::new(vec![complete(&[
            "data: {\"response\":\"Sure\"}\n",
            "data: {\"error\":\"model not found\",\"details\":\"llava:13b\"}\n",
        ])]);
        let mut controller = controller(transport);
        let turn = controller.submit("Hello").unwrap();

        let updates = controller.run_to_end().await;
        assert_eq!(
            updates.last(),
            Some(&ConversationUpdate::Failed {
                id: turn.reply,
                error: "model not found: llava:13b".to_string(),
            })
        );
        let reply = controller.store().get(turn.reply).unwrap();
        assert_eq!(reply.status(), MessageStatus::Failed);
        assert_eq!(reply.text(), "Sure");
        assert_eq!(controller.error(), Some("model not found: llava:13b"));
    }

    #[tokio::test]
    async fn rejected_request_surfaces_detail() {
        let transport = ReplayTransport::new(vec![
            Body::Reject(Error::request_rejected(500, "HTTP error! status: 500")),
            complete(&["data: {\"response\":\"ok\",\"done\":true}\n"]),
        ]);
        let mut controller = controller(transport);
        let first = controller.submit("Hello").unwrap();
        controller.run_to_end().await;

        assert_eq!(controller.error(), Some("HTTP error! status: 500"));
        let reply = controller.store().get(first.reply).unwrap();
        assert_eq!(reply.status(), MessageStatus::Failed);
        assert_eq!(reply.text(), "");

        controller.submit("Again").unwrap();
        assert_eq!(controller.error(), None);
        controller.run_to_end().await;
        assert_eq!(controller.stats().failed, 1);
        assert_eq!(controller.stats().completed, 1);
    }

    #[tokio::test]
    async fn stop_interrupts_without_error() {
        let transport = ReplayTransport::new(vec![hanging(&[
            "data: {\"response\":\"Once\"}\n",
            "data: {\"response\":\" upon a\"}\n",
        ])]);
        let mut controller = controller(transport);
        let turn = controller.submit("Tell me a story").unwrap();
        controller.next_update().await.unwrap();
        controller.next_update().await.unwrap();

        assert!(controller.stop());
        let reply = controller.store().get(turn.reply).unwrap();
        assert_eq!(reply.text(), "Once upon a");
        assert_eq!(reply.status(), MessageStatus::Interrupted);
        assert_eq!(controller.error(), None);
        assert!(!controller.is_generating());

        assert!(!controller.stop());
        assert!(controller.next_update().await.is_none());
        assert_eq!(controller.stats().stopped, 1);
    }

    #[tokio::test]
    async fn interrupt_handle_stops_at_next_read() {
        let transport = ReplayTransport::new(vec![hanging(&["data: {\"response\":\"Once\"}\n"])]);
        let mut controller = controller(transport);
        let turn = controller.submit("Tell me a story").unwrap();
        controller.next_update().await.unwrap();

        controller.interrupt_handle().unwrap().cancel();
        assert_eq!(
            controller.next_update().await,
            Some(ConversationUpdate::Stopped { id: turn.reply })
        );
        assert!(controller.interrupt_handle().is_none());
        assert_eq!(
            controller.store().get(turn.reply).unwrap().status(),
            MessageStatus::Interrupted
        );
    }

    #[tokio::test]
    async fn new_submission_stops_active_reply() {
        let transport = ReplayTransport::new(vec![
            hanging(&["data: {\"response\":\"first\"}\n"]),
            complete(&["data: {\"response\":\"second\",\"done\":true}\n"]),
        ]);
        let mut controller = controller(transport.clone());
        let first = controller.submit("one").unwrap();
        controller.next_update().await.unwrap();

        let second = controller.submit("two").unwrap();
        let old = controller.store().get(first.reply).unwrap();
        assert_eq!(old.status(), MessageStatus::Interrupted);
        assert_eq!(old.text(), "first");
        assert_eq!(controller.store().streaming_id(), Some(second.reply));

        controller.run_to_end().await;
        assert_eq!(controller.store().get(second.reply).unwrap().text(), "second");
        assert_eq!(controller.store().get(first.reply).unwrap().text(), "first");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(
            requests[1].context,
            vec![
                ContextMessage::new(MessageRole::User, "one"),
                ContextMessage::new(MessageRole::Assistant, "first"),
            ]
        );
    }

    #[tokio::test]
    async fn request_carries_prior_turns_and_model() {
        let transport = ReplayTransport::new(vec![complete(&[
            "data: {\"response\":\"4\",\"done\":true}\n",
        ])]);
        let mut controller = ConversationController::new(transport.clone(), "llama3")
            .with_greeting("Hello! How can I help you today?");
        controller.submit("2+2?").unwrap();
        controller.run_to_end().await;

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, "llama3");
        assert_eq!(requests[0].prompt, "2+2?");
        assert_eq!(
            requests[0].context,
            vec![ContextMessage::new(
                MessageRole::Assistant,
                "Hello! How can I help you today?"
            )]
        );
    }

    #[tokio::test]
    async fn set_model_applies_to_next_submission() {
        let transport = ReplayTransport::new(vec![complete(&["data: {\"done\":true}\n"])]);
        let mut controller = controller(transport.clone());
        assert_eq!(controller.model(), DEFAULT_MODEL);
        controller.set_model("mistral");
        controller.submit("hi").unwrap();
        assert_eq!(
            controller.run_to_end().await,
            vec![ConversationUpdate::Completed {
                id: controller.store().messages()[1].id()
            }]
        );
        assert_eq!(transport.requests.lock().unwrap()[0].model, "mistral");
    }

    #[test]
    fn update_accessors() {
        let id = MessageId::new(7);
        let token = ConversationUpdate::Token {
            id,
            text: "x".to_string(),
            finished: false,
        };
        assert_eq!(token.id(), id);
        assert!(!token.is_terminal());
        assert!(ConversationUpdate::Stopped { id }.is_terminal());
    }
}
