use crate::api::{CompletionGateway, GatewayError};
use crate::models::{ChatMessage, ConversationTurn, SessionCredentials};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};

// Stored when a send is attempted with no API key configured.
const NO_API_KEY_MESSAGE: &str = "No API key provided. Please enter one in your user settings.";

// Running state of one in-flight completion call: the fragments received so
// far and their concatenation.
#[derive(Debug, Default)]
struct StreamAccumulator {
    fragments: Vec<String>,
    text: String,
}

impl StreamAccumulator {
    fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments.push(fragment.to_string());
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    fn into_text(self) -> String {
        self.text
    }
}

/// One user's conversation, relayed through a completion gateway.
///
/// Every call to [`send`](ChatSession::send) appends exactly one turn to the
/// history, whatever happens: failures are absorbed and recorded as the
/// turn's response instead of being raised to the caller.
pub struct ChatSession {
    gateway: Arc<dyn CompletionGateway>,
    credentials: SessionCredentials,
    history: RwLock<Vec<ConversationTurn>>,
    live: watch::Sender<Option<String>>,
    send_guard: Mutex<()>,
}

impl ChatSession {
    pub fn new(gateway: Arc<dyn CompletionGateway>, credentials: SessionCredentials) -> Self {
        let (live, _) = watch::channel(None);
        ChatSession {
            gateway,
            credentials,
            history: RwLock::new(Vec::new()),
            live,
            send_guard: Mutex::new(()),
        }
    }

    pub fn model(&self) -> &str {
        &self.credentials.model
    }

    /// Relays `prompt` and appends the resulting turn.
    pub async fn send(&self, prompt: &str) {
        // One send runs to its terminal state before the next may begin.
        let _active = self.send_guard.lock().await;

        let Some(api_key) = self.credentials.effective_api_key() else {
            log::warn!("Send attempted without an API key, recording error turn");
            self.commit(ConversationTurn::error(prompt, NO_API_KEY_MESSAGE))
                .await;
            return;
        };

        let turn = match self.stream_reply(api_key, prompt).await {
            Ok(reply) => ConversationTurn::reply(prompt, reply),
            Err(failure) => {
                log::warn!("Completion failed ({}): {}", failure.kind(), failure);
                ConversationTurn::error(prompt, failure)
            }
        };
        self.commit(turn).await;
    }

    async fn stream_reply(&self, api_key: &str, prompt: &str) -> Result<String, GatewayError> {
        let messages = [ChatMessage::user(prompt)];
        let mut fragments = self
            .gateway
            .complete(api_key, &self.credentials.model, &messages)
            .await?;

        let mut accumulator = StreamAccumulator::default();
        self.live.send_replace(Some(String::new()));
        while let Some(fragment) = fragments.next().await {
            // A failed fragment ends the call; the partial is discarded.
            let fragment = fragment?;
            accumulator.push(&fragment);
            self.live.send_replace(Some(accumulator.text().to_string()));
        }
        log::debug!(
            "Stream completed after {} fragments",
            accumulator.fragment_count()
        );
        Ok(accumulator.into_text())
    }

    // Single append point. The turn lands before the live view clears, so a
    // watcher that sees the reset can already read the committed turn.
    async fn commit(&self, turn: ConversationTurn) {
        self.history.write().await.push(turn);
        self.live.send_replace(None);
    }

    /// Snapshot of the committed history, oldest first.
    pub async fn history(&self) -> Vec<ConversationTurn> {
        self.history.read().await.clone()
    }

    /// The partial response of the send in flight, if one is streaming.
    pub fn live_partial(&self) -> Option<String> {
        self.live.borrow().clone()
    }

    /// Watch the live partial. The value becomes `None` again when the
    /// in-flight turn commits.
    pub fn subscribe_live(&self) -> watch::Receiver<Option<String>> {
        self.live.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::TokenStream;
    use crate::models::TurnOutcome;
    use async_trait::async_trait;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    enum ScriptedCall {
        Fragments(Vec<Result<String, GatewayError>>),
        Refused(GatewayError),
    }

    #[derive(Default)]
    struct ScriptedGateway {
        script: StdMutex<VecDeque<ScriptedCall>>,
        calls: AtomicUsize,
        seen_messages: StdMutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGateway {
        fn with_script(calls: Vec<ScriptedCall>) -> Arc<Self> {
            Arc::new(ScriptedGateway {
                script: StdMutex::new(calls.into()),
                ..Default::default()
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionGateway for ScriptedGateway {
        async fn complete(
            &self,
            _api_key: &str,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<TokenStream, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_messages.lock().unwrap().push(messages.to_vec());
            match self.script.lock().unwrap().pop_front() {
                Some(ScriptedCall::Fragments(fragments)) => Ok(Box::pin(stream::iter(fragments))),
                Some(ScriptedCall::Refused(err)) => Err(err),
                None => panic!("gateway called with no scripted response"),
            }
        }
    }

    fn ok_fragments(parts: &[&str]) -> ScriptedCall {
        ScriptedCall::Fragments(parts.iter().map(|p| Ok(p.to_string())).collect())
    }

    fn credentials() -> SessionCredentials {
        SessionCredentials {
            api_key: Some("sk-test".to_string()),
            model: "demo-model".to_string(),
        }
    }

    fn session_with(gateway: Arc<ScriptedGateway>) -> ChatSession {
        ChatSession::new(gateway, credentials())
    }

    #[tokio::test]
    async fn successful_send_appends_one_reply_turn() {
        let gateway = ScriptedGateway::with_script(vec![ok_fragments(&["Hi", " there", "!"])]);
        let session = session_with(gateway.clone());

        session.send("hello").await;

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prompt, "hello");
        assert_eq!(history[0].response, "Hi there!");
        assert_eq!(history[0].outcome, TurnOutcome::Success);
        assert_eq!(session.live_partial(), None);
        assert_eq!(gateway.call_count(), 1);
    }

    #[tokio::test]
    async fn missing_key_records_fixed_message_without_calling_gateway() {
        let gateway = ScriptedGateway::with_script(vec![]);
        let session = ChatSession::new(
            gateway.clone(),
            SessionCredentials {
                api_key: None,
                model: "demo-model".to_string(),
            },
        );

        session.send("hello").await;

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prompt, "hello");
        assert_eq!(
            history[0].response,
            "❌ Error: No API key provided. Please enter one in your user settings."
        );
        assert!(history[0].is_error());
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn blank_key_counts_as_absent() {
        let gateway = ScriptedGateway::with_script(vec![]);
        let session = ChatSession::new(
            gateway.clone(),
            SessionCredentials {
                api_key: Some("   ".to_string()),
                model: "demo-model".to_string(),
            },
        );

        session.send("hello").await;

        assert_eq!(gateway.call_count(), 0);
        assert!(session.history().await[0].is_error());
    }

    #[tokio::test]
    async fn mid_stream_failure_discards_partial_and_records_error() {
        let gateway = ScriptedGateway::with_script(vec![ScriptedCall::Fragments(vec![
            Ok("Partial".to_string()),
            Err(GatewayError::Transport("connection reset".to_string())),
        ])]);
        let session = session_with(gateway);

        session.send("tell me things").await;

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response, "❌ Error: connection reset");
        assert_eq!(history[0].outcome, TurnOutcome::Error);
        assert_eq!(session.live_partial(), None);
    }

    #[tokio::test]
    async fn gateway_refusal_records_classified_message() {
        let gateway = ScriptedGateway::with_script(vec![ScriptedCall::Refused(
            GatewayError::Authentication("Incorrect API key provided".to_string()),
        )]);
        let session = session_with(gateway);

        session.send("hello").await;

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response, "❌ Error: Incorrect API key provided");
        assert!(history[0].is_error());
    }

    #[tokio::test]
    async fn turns_keep_send_order() {
        let gateway = ScriptedGateway::with_script(vec![
            ok_fragments(&["one"]),
            ScriptedCall::Refused(GatewayError::Upstream("rate limited".to_string())),
            ok_fragments(&["three"]),
        ]);
        let session = session_with(gateway);

        session.send("first").await;
        session.send("second").await;
        session.send("third").await;

        let history = session.history().await;
        let prompts: Vec<&str> = history.iter().map(|t| t.prompt.as_str()).collect();
        assert_eq!(prompts, ["first", "second", "third"]);

        // Newest-first rendering is a plain reverse walk.
        let newest_first: Vec<&str> = history.iter().rev().map(|t| t.prompt.as_str()).collect();
        assert_eq!(newest_first, ["third", "second", "first"]);
    }

    #[tokio::test]
    async fn failed_send_leaves_earlier_turns_untouched() {
        let gateway = ScriptedGateway::with_script(vec![
            ok_fragments(&["Hi", " there"]),
            ScriptedCall::Refused(GatewayError::Authentication("bad key".to_string())),
        ]);
        let session = session_with(gateway);

        session.send("hello").await;
        session.send("again").await;

        let history = session.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prompt, "hello");
        assert_eq!(history[0].response, "Hi there");
        assert_eq!(history[0].outcome, TurnOutcome::Success);
        assert_eq!(history[1].prompt, "again");
        assert_eq!(history[1].response, "❌ Error: bad key");
        assert_eq!(history[1].outcome, TurnOutcome::Error);
        assert_eq!(session.live_partial(), None);
    }

    #[tokio::test]
    async fn empty_prompt_is_relayed_like_any_other() {
        let gateway = ScriptedGateway::with_script(vec![ok_fragments(&["Ask me anything."])]);
        let session = session_with(gateway.clone());

        session.send("").await;

        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].prompt, "");
        assert_eq!(history[0].response, "Ask me anything.");
        let seen = gateway.seen_messages.lock().unwrap();
        assert_eq!(seen[0], vec![ChatMessage::user("")]);
    }

    // Feeds fragments one at a time so the test can observe the live view
    // between them. Each call to the gateway consumes the next queued feed.
    struct ChannelGateway {
        feeds: StdMutex<VecDeque<mpsc::UnboundedReceiver<Result<String, GatewayError>>>>,
        calls: AtomicUsize,
    }

    impl ChannelGateway {
        fn with_feeds(
            feeds: Vec<mpsc::UnboundedReceiver<Result<String, GatewayError>>>,
        ) -> Arc<Self> {
            Arc::new(ChannelGateway {
                feeds: StdMutex::new(feeds.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionGateway for ChannelGateway {
        async fn complete(
            &self,
            _api_key: &str,
            _model: &str,
            _messages: &[ChatMessage],
        ) -> Result<TokenStream, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let receiver = self
                .feeds
                .lock()
                .unwrap()
                .pop_front()
                .expect("no feed queued for this call");
            Ok(Box::pin(stream::unfold(receiver, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })))
        }
    }

    #[tokio::test]
    async fn live_partial_grows_with_each_fragment() {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = ChannelGateway::with_feeds(vec![rx]);
        let session = Arc::new(ChatSession::new(gateway, credentials()));

        let mut live = session.subscribe_live();
        let sender = {
            let session = session.clone();
            tokio::spawn(async move { session.send("stream it").await })
        };

        // The stream opens with an empty partial.
        live.changed().await.unwrap();
        assert_eq!(*live.borrow_and_update(), Some(String::new()));

        let mut expected = String::new();
        for fragment in ["The", " answer", " is 42"] {
            tx.send(Ok(fragment.to_string())).unwrap();
            live.changed().await.unwrap();
            expected.push_str(fragment);
            assert_eq!(*live.borrow_and_update(), Some(expected.clone()));
        }

        // Closing the feed commits the turn and clears the live view.
        drop(tx);
        live.changed().await.unwrap();
        assert_eq!(*live.borrow_and_update(), None);

        sender.await.unwrap();
        let history = session.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].response, "The answer is 42");
        assert_eq!(session.live_partial(), None);
    }

    #[tokio::test]
    async fn overlapping_sends_run_one_at_a_time() {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        let gateway = ChannelGateway::with_feeds(vec![rx_a, rx_b]);
        let session = Arc::new(ChatSession::new(gateway.clone(), credentials()));

        let mut live = session.subscribe_live();
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.send("first").await })
        };
        live.changed().await.unwrap();
        tx_a.send(Ok("alpha".to_string())).unwrap();
        live.changed().await.unwrap();

        // A second send arrives while the first is still streaming. It must
        // not reach the gateway or disturb the live view until the first
        // turn commits.
        let second = {
            let session = session.clone();
            tokio::spawn(async move { session.send("second").await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(gateway.call_count(), 1);
        assert_eq!(*live.borrow_and_update(), Some("alpha".to_string()));
        assert!(session.history().await.is_empty());

        // Finishing the first stream lets the queued send begin.
        drop(tx_a);
        tx_b.send(Ok("beta".to_string())).unwrap();
        drop(tx_b);
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(gateway.call_count(), 2);
        let history = session.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].prompt, "first");
        assert_eq!(history[0].response, "alpha");
        assert_eq!(history[1].prompt, "second");
        assert_eq!(history[1].response, "beta");
        assert_eq!(session.live_partial(), None);
    }
}
