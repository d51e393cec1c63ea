//! End-to-end tests for a conversation over an in-memory transport.
//! The live test at the bottom requires CHATSTREAM_URL to point at a running endpoint.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use futures::stream::{self, StreamExt};

    use chatstream::{
        ByteStream, ChatClient, ChatRequest, ConversationController, ConversationUpdate, Error,
        EventFrameParser, EventRecord, MessageRole, MessageStatus, Result, Transport,
        process_sse,
    };

    const STORY: &str = concat!(
        "data: {\"model\":\"llava:13b\",\"response\":\"Once\",\"done\":false}\n\n",
        "data: {\"model\":\"llava:13b\",\"response\":\" upon\",\"done\":false}\n\n",
        "data: {\"model\":\"llava:13b\",\"response\":\" a time\",\"done\":false}\n\n",
        "data: {\"model\":\"llava:13b\",\"response\":\"\",\"done\":true}\n\n",
    );

    /// Serves `body` split into `chunk_size`-byte chunks for every request.
    struct ChunkedTransport {
        body: &'static str,
        chunk_size: usize,
        prompts: Mutex<Vec<String>>,
    }

    impl ChunkedTransport {
        fn new(body: &'static str, chunk_size: usize) -> Arc<Self> {
            Arc::new(Self {
                body,
                chunk_size,
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for ChunkedTransport {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            let chunks: Vec<Result<Bytes>> = self
                .body
                .as_bytes()
                .chunks(self.chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(Box::pin(stream::iter(chunks)))
        }
    }

    struct RejectingTransport;

    #[async_trait::async_trait]
    impl Transport for RejectingTransport {
        async fn open_stream(&self, _: &ChatRequest) -> Result<ByteStream> {
            Err(Error::request_rejected(404, "model 'llava:13b' not found"))
        }
    }

    #[tokio::test]
    async fn reply_is_identical_for_every_chunk_size() {
        for chunk_size in 1..=STORY.len() {
            let transport = ChunkedTransport::new(STORY, chunk_size);
            let mut controller = ConversationController::new(transport, "llava:13b");
            let turn = controller.submit("Tell me a story").unwrap();
            controller.run_to_end().await;

            let reply = controller.store().get(turn.reply).unwrap();
            assert_eq!(reply.text(), "Once upon a time", "chunk size {chunk_size}");
            assert_eq!(reply.status(), MessageStatus::Complete);
        }
    }

    #[tokio::test]
    async fn conversation_over_several_turns() {
        let transport = ChunkedTransport::new(STORY, 7);
        let mut controller = ConversationController::new(transport.clone(), "llava:13b")
            .with_greeting("Hello! How can I help you today?");

        controller.submit("Tell me a story").unwrap();
        controller.run_to_end().await;
        controller.submit("Another one").unwrap();
        let updates = controller.run_to_end().await;
        assert!(matches!(
            updates.last(),
            Some(ConversationUpdate::Completed { .. })
        ));

        let transcript = controller.transcript();
        let roles: Vec<MessageRole> = transcript.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User,
                MessageRole::Assistant,
            ]
        );
        assert!(transcript.iter().all(|m| !m.streaming));
        assert!(transcript.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(
            *transport.prompts.lock().unwrap(),
            vec!["Tell me a story".to_string(), "Another one".to_string()]
        );
        assert_eq!(controller.stats().turns, 2);
        assert_eq!(controller.stats().completed, 2);
    }

    #[tokio::test]
    async fn rejected_request_leaves_failed_reply() {
        let mut controller = ConversationController::new(Arc::new(RejectingTransport), "llava:13b");
        let turn = controller.submit("Hello").unwrap();
        let updates = controller.run_to_end().await;

        assert_eq!(updates.len(), 1);
        assert_eq!(controller.error(), Some("model 'llava:13b' not found"));
        let reply = controller.store().get(turn.reply).unwrap();
        assert_eq!(reply.status(), MessageStatus::Failed);
        assert!(!controller.is_generating());
    }

    #[tokio::test]
    async fn parser_and_process_agree() {
        let mut parser = EventFrameParser::new();
        let mut from_parser = Vec::new();
        for chunk in STORY.as_bytes().chunks(3) {
            from_parser.extend(parser.push(chunk));
        }
        parser.finish();

        let chunks: Vec<Result<Bytes>> = STORY
            .as_bytes()
            .chunks(11)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let from_stream: Vec<EventRecord> = process_sse(stream::iter(chunks))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(from_parser, from_stream);
        assert_eq!(from_parser.len(), 4);
        assert_eq!(from_parser[3], EventRecord::Done);
    }

    #[tokio::test]
    async fn live_endpoint_streams_a_reply() {
        let Ok(url) = std::env::var("CHATSTREAM_URL") else {
            eprintln!("Skipping test: CHATSTREAM_URL not set");
            return;
        };

        let client = ChatClient::new(Some(url)).expect("Failed to create client");
        let mut controller = ConversationController::new(Arc::new(client), "llava:13b");
        let turn = controller.submit("Say 'test passed'").unwrap();
        controller.run_to_end().await;

        let reply = controller.store().get(turn.reply).unwrap();
        assert_ne!(reply.status(), MessageStatus::Streaming);
    }
}
