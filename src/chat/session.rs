//! Core chat session management.
//!
//! A [`ChatSession`] owns the message list of one conversation and runs at
//! most one turn at a time.  A turn moves through
//! `Idle -> Sending -> Streaming` and settles as [`TurnOutcome::Done`],
//! [`TurnOutcome::Errored`], or [`TurnOutcome::Cancelled`], after which the
//! session is idle again.
//!
//! The turn logic is exposed in steps (`begin_turn`, `apply_frame`,
//! `fail_turn`, `cancel_turn`, `finish_stream`) so it can be driven by canned
//! frames.  [`ChatSession::send`] strings the steps together against a live
//! client.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::chat::config::ChatConfig;
use crate::client::ZeroX;
use crate::client_logger::ClientLogger;
use crate::error::{Error, Result};
use crate::observability::{
    TURNS_CANCELLED, TURNS_DONE, TURNS_ERRORED, TURNS_REJECTED, TURNS_STARTED,
};
use crate::render::Renderer;
use crate::types::{
    ChatMessage, ChatRequest, ConversationDetail, ConversationId, MessageRole, StreamFrame,
};

/// Where the session is in its turn lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No turn is running; a new one may start.
    Idle,
    /// The turn's call has been issued and no frame has arrived yet.
    Sending,
    /// Frames are being applied to the assistant message.
    Streaming,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Sending => write!(f, "sending"),
            SessionPhase::Streaming => write!(f, "streaming"),
        }
    }
}

/// How a turn settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The reply completed.  Carries the identifier from the completion frame,
    /// if one was sent.
    Done {
        /// Identifier reported by the backend.
        conversation_id: Option<ConversationId>,
    },
    /// The backend or the transport failed; the message shows the error.
    Errored(String),
    /// The user stopped the reply; the message keeps what had arrived.
    Cancelled,
}

/// A handle that cancels the session's current turn from elsewhere, such as
/// a Ctrl-C handler.
#[derive(Debug, Clone, Default)]
pub struct TurnCanceller {
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl TurnCanceller {
    /// Cancels the running turn.  Returns false if no turn was running.
    pub fn cancel(&self) -> bool {
        match self.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a turn is running.
    pub fn is_active(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self) {
        *self.lock() = Some(CancellationToken::new());
    }

    fn current(&self) -> Option<CancellationToken> {
        self.lock().clone()
    }

    fn disarm(&self) {
        *self.lock() = None;
    }
}

/// Aggregated stats for a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    /// The model used for new turns.
    pub model: String,
    /// The sampling temperature.
    pub temperature: f32,
    /// The maximum tokens per response.
    pub max_tokens: u32,
    /// The conversation being continued, if the backend has assigned one.
    pub conversation_id: Option<ConversationId>,
    /// The number of messages in the conversation.
    pub message_count: usize,
    /// The current phase.
    pub phase: SessionPhase,
    /// Turns that completed.
    pub turns_done: u64,
    /// Turns that settled with an error.
    pub turns_errored: u64,
    /// Turns the user cancelled.
    pub turns_cancelled: u64,
}

enum Step {
    Cancelled,
    Next(Option<Result<StreamFrame>>),
}

/// A chat session that manages conversation state and API interactions.
///
/// ```
/// use std::sync::Arc;
/// use zerox::chat::{ChatConfig, ChatSession, TurnOutcome};
/// use zerox::{ConversationId, MemoryCredentialStore, StreamFrame, ZeroX};
///
/// let client = ZeroX::with_options(
///     Arc::new(MemoryCredentialStore::new()),
///     Some("http://localhost:8000/api/v1/".to_string()),
///     None,
/// )
/// .unwrap();
/// let mut session = ChatSession::new(client, ChatConfig::new());
///
/// session.begin_turn("Hi").unwrap();
/// session.apply_frame(StreamFrame::Content("Hel".to_string()));
/// session.apply_frame(StreamFrame::Content("lo".to_string()));
/// let outcome = session.apply_frame(StreamFrame::Done {
///     conversation_id: Some(ConversationId(7)),
/// });
///
/// assert_eq!(outcome, Some(TurnOutcome::Done { conversation_id: Some(ConversationId(7)) }));
/// assert_eq!(session.messages()[1].content, "Hello");
/// assert_eq!(session.conversation_id(), Some(ConversationId(7)));
/// ```
pub struct ChatSession {
    client: ZeroX,
    config: ChatConfig,
    messages: Vec<ChatMessage>,
    conversation_id: Option<ConversationId>,
    phase: SessionPhase,
    canceller: TurnCanceller,
    logger: Option<Arc<dyn ClientLogger>>,
    next_local_id: u64,
    turns_done: u64,
    turns_errored: u64,
    turns_cancelled: u64,
}

impl ChatSession {
    /// Creates a new chat session with the given client and configuration.
    pub fn new(client: ZeroX, config: ChatConfig) -> Self {
        Self {
            client,
            config,
            messages: Vec::new(),
            conversation_id: None,
            phase: SessionPhase::Idle,
            canceller: TurnCanceller::default(),
            logger: None,
            next_local_id: 0,
            turns_done: 0,
            turns_errored: 0,
            turns_cancelled: 0,
        }
    }

    /// Attaches a logger that sees every applied frame and settled turn.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The client turns are sent through.
    pub fn client(&self) -> &ZeroX {
        &self.client
    }

    /// A handle for cancelling turns of this session from another task.
    pub fn canceller(&self) -> TurnCanceller {
        self.canceller.clone()
    }

    /// The current configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Changes the model used for new turns.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Sets the sampling temperature for new turns.
    pub fn set_temperature(&mut self, temperature: f32) {
        self.config = self.config.clone().with_temperature(temperature);
    }

    /// Sets the maximum tokens per response for new turns.
    pub fn set_max_tokens(&mut self, max_tokens: u32) {
        self.config = self.config.clone().with_max_tokens(max_tokens);
    }

    /// The messages of the conversation, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Returns the number of messages in the conversation.
    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// The backend's identifier for this conversation, once assigned.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    /// The current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Whether a turn is sending or streaming.
    pub fn is_busy(&self) -> bool {
        self.phase != SessionPhase::Idle
    }

    /// Returns statistics about the current session.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            conversation_id: self.conversation_id,
            message_count: self.messages.len(),
            phase: self.phase,
            turns_done: self.turns_done,
            turns_errored: self.turns_errored,
            turns_cancelled: self.turns_cancelled,
        }
    }

    /// Starts a fresh conversation, cancelling any running turn first.
    pub fn new_chat(&mut self) {
        self.cancel_turn();
        self.messages.clear();
        self.conversation_id = None;
    }

    /// Replaces the session with a stored conversation, cancelling any
    /// running turn first.  Later turns continue that conversation.
    pub fn open_conversation(&mut self, detail: ConversationDetail) {
        self.cancel_turn();
        self.conversation_id = Some(detail.conversation.id);
        self.messages = detail.messages;
    }

    /// Fetches a stored conversation and opens it.
    pub async fn load_conversation(&mut self, id: ConversationId) -> Result<()> {
        let detail = self.client.get_conversation(id).await?;
        self.open_conversation(detail);
        Ok(())
    }

    fn local_id(&mut self) -> String {
        self.next_local_id += 1;
        format!("local-{}", self.next_local_id)
    }

    /// Starts a turn: appends the user message and an empty assistant
    /// placeholder and returns the request to issue.
    ///
    /// Fails with [`Error::TurnInProgress`] and changes nothing if a turn is
    /// already sending or streaming.
    pub fn begin_turn(&mut self, text: &str) -> Result<ChatRequest> {
        if self.is_busy() {
            TURNS_REJECTED.click();
            debug!(phase = %self.phase, "rejecting turn while another is in progress");
            return Err(Error::TurnInProgress);
        }

        let user_id = self.local_id();
        let assistant_id = self.local_id();
        self.messages.push(ChatMessage::user(user_id, text));
        self.messages
            .push(ChatMessage::assistant_placeholder(assistant_id, &self.config.model));
        self.phase = SessionPhase::Sending;
        self.canceller.arm();
        TURNS_STARTED.click();

        Ok(ChatRequest::new(text, self.config.model.clone())
            .with_conversation(self.conversation_id)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens))
    }

    /// Marks the turn's reply as streaming.
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::Sending {
            self.phase = SessionPhase::Streaming;
        }
    }

    fn reply_mut(&mut self) -> Option<&mut ChatMessage> {
        self.messages
            .last_mut()
            .filter(|message| message.role == MessageRole::Assistant)
    }

    /// Applies one frame to the running turn.
    ///
    /// Content is appended to the assistant message.  A completion or error
    /// frame settles the turn and its outcome is returned.  Frames arriving
    /// while no turn is running are ignored.
    pub fn apply_frame(&mut self, frame: StreamFrame) -> Option<TurnOutcome> {
        if !self.is_busy() {
            debug!("ignoring frame outside of a turn");
            return None;
        }
        self.start_streaming();
        if let Some(logger) = &self.logger {
            logger.log_frame(&frame);
        }

        match frame {
            StreamFrame::Content(text) => {
                if let Some(reply) = self.reply_mut() {
                    reply.content.push_str(&text);
                }
                None
            }
            StreamFrame::Done { conversation_id } => {
                if self.conversation_id.is_none() {
                    self.conversation_id = conversation_id;
                }
                Some(self.settle(TurnOutcome::Done { conversation_id }))
            }
            StreamFrame::Error(message) => Some(self.error_out(message)),
        }
    }

    /// Settles the running turn as failed because of `err`.
    pub fn fail_turn(&mut self, err: &Error) -> Option<TurnOutcome> {
        if !self.is_busy() {
            return None;
        }
        Some(self.error_out(err.to_string()))
    }

    /// Settles the running turn as cancelled, keeping whatever content had
    /// arrived.
    pub fn cancel_turn(&mut self) -> Option<TurnOutcome> {
        if !self.is_busy() {
            return None;
        }
        if let Some(token) = self.canceller.current() {
            token.cancel();
        }
        Some(self.settle(TurnOutcome::Cancelled))
    }

    /// Settles a turn whose stream ended without a completion frame.
    pub fn finish_stream(&mut self) -> Option<TurnOutcome> {
        if !self.is_busy() {
            return None;
        }
        debug!("stream ended without a completion frame");
        Some(self.settle(TurnOutcome::Done {
            conversation_id: None,
        }))
    }

    fn error_out(&mut self, message: String) -> TurnOutcome {
        if let Some(reply) = self.reply_mut() {
            reply.content = format!("Error: {message}");
        }
        self.settle(TurnOutcome::Errored(message))
    }

    fn settle(&mut self, outcome: TurnOutcome) -> TurnOutcome {
        self.phase = SessionPhase::Idle;
        self.canceller.disarm();
        match &outcome {
            TurnOutcome::Done { .. } => {
                TURNS_DONE.click();
                self.turns_done += 1;
            }
            TurnOutcome::Errored(_) => {
                TURNS_ERRORED.click();
                self.turns_errored += 1;
            }
            TurnOutcome::Cancelled => {
                TURNS_CANCELLED.click();
                self.turns_cancelled += 1;
            }
        }
        info!(outcome = ?outcome, conversation_id = ?self.conversation_id, "turn settled");
        if let Some(logger) = &self.logger
            && let Some(reply) = self.messages.last()
        {
            logger.log_turn(reply, &outcome);
        }
        outcome
    }

    /// Applies frames to the running turn until it settles.
    ///
    /// Frames are applied strictly in arrival order.  If the turn is
    /// cancelled, the stream is dropped before another frame is read.
    /// Fails with a validation error if no turn is running.
    pub async fn consume<S>(
        &mut self,
        frames: S,
        renderer: &mut dyn Renderer,
    ) -> Result<TurnOutcome>
    where
        S: Stream<Item = Result<StreamFrame>> + Unpin,
    {
        let Some(token) = self.canceller.current() else {
            return Err(Error::validation("no turn is in progress", None));
        };
        let mut frames = frames;
        self.start_streaming();

        loop {
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                item = frames.next() => Step::Next(item),
            };

            match step {
                Step::Cancelled => {
                    drop(frames);
                    renderer.print_interrupted();
                    return Ok(self.cancel_turn().unwrap_or(TurnOutcome::Cancelled));
                }
                Step::Next(Some(Ok(frame))) => {
                    match &frame {
                        StreamFrame::Content(text) => renderer.print_text(text),
                        StreamFrame::Error(message) => renderer.print_error(message),
                        StreamFrame::Done { .. } => renderer.finish_response(),
                    }
                    if let Some(outcome) = self.apply_frame(frame) {
                        return Ok(outcome);
                    }
                }
                Step::Next(Some(Err(err))) => {
                    renderer.print_error(&err.to_string());
                    return Ok(self.error_out(err.to_string()));
                }
                Step::Next(None) => {
                    renderer.finish_response();
                    return Ok(self
                        .finish_stream()
                        .unwrap_or(TurnOutcome::Done {
                            conversation_id: None,
                        }));
                }
            }
        }
    }

    /// Sends a user message and streams the reply into the session.
    ///
    /// Failures of the call or the stream settle the turn as
    /// [`TurnOutcome::Errored`] rather than failing this method; the only
    /// error returned is [`Error::TurnInProgress`].
    pub async fn send(&mut self, text: &str, renderer: &mut dyn Renderer) -> Result<TurnOutcome> {
        let request = self.begin_turn(text)?;
        let Some(token) = self.canceller.current() else {
            return Err(Error::TurnInProgress);
        };

        let client = self.client.clone();
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            opened = client.stream_chat(request) => Some(opened),
        };

        match opened {
            None => {
                renderer.print_interrupted();
                Ok(self.cancel_turn().unwrap_or(TurnOutcome::Cancelled))
            }
            Some(Err(err)) => {
                renderer.print_error(&err.to_string());
                Ok(self.error_out(err.to_string()))
            }
            Some(Ok(frames)) => {
                renderer.start_response(&self.config.model);
                self.consume(frames, renderer).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use futures::stream;
    use serde_json::json;

    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use crate::transport::testing::{Reply, ScriptedTransport};
    use crate::types::{CredentialPair, MessageId};

    #[derive(Default)]
    struct RecordingRenderer {
        text: String,
        errors: Vec<String>,
        interrupted: bool,
        finished: bool,
    }

    impl Renderer for RecordingRenderer {
        fn print_text(&mut self, text: &str) {
            self.text.push_str(text);
        }

        fn print_error(&mut self, error: &str) {
            self.errors.push(error.to_string());
        }

        fn print_info(&mut self, _: &str) {}

        fn finish_response(&mut self) {
            self.finished = true;
        }

        fn print_interrupted(&mut self) {
            self.interrupted = true;
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        frames: Mutex<Vec<StreamFrame>>,
        turns: Mutex<Vec<(String, TurnOutcome)>>,
    }

    impl ClientLogger for RecordingLogger {
        fn log_frame(&self, frame: &StreamFrame) {
            self.frames.lock().unwrap().push(frame.clone());
        }

        fn log_turn(&self, message: &ChatMessage, outcome: &TurnOutcome) {
            self.turns
                .lock()
                .unwrap()
                .push((message.content.clone(), outcome.clone()));
        }
    }

    fn session_over(transport: ScriptedTransport) -> (Arc<ScriptedTransport>, ChatSession) {
        let transport = Arc::new(transport);
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new("a0", "r0")));
        let client = ZeroX::with_transport(transport.clone(), store);
        (transport, ChatSession::new(client, ChatConfig::new()))
    }

    fn session() -> ChatSession {
        session_over(ScriptedTransport::new()).1
    }

    fn content(text: &str) -> Result<StreamFrame> {
        Ok(StreamFrame::Content(text.to_string()))
    }

    fn done(id: i64) -> Result<StreamFrame> {
        Ok(StreamFrame::Done {
            conversation_id: Some(ConversationId(id)),
        })
    }

    #[test]
    fn begin_turn_appends_user_and_placeholder() {
        let mut session = session();
        let request = session.begin_turn("Hi there").unwrap();

        assert_eq!(request.message, "Hi there");
        assert_eq!(request.model, "llama-3.1-70b-versatile");
        assert_eq!(request.conversation_id, None);
        assert_eq!(session.phase(), SessionPhase::Sending);

        let messages = session.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[0].content, "Hi there");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert!(messages[1].content.is_empty());
        assert_ne!(messages[0].id, messages[1].id);
        assert!(matches!(messages[1].id, MessageId::Local(_)));
    }

    #[test]
    fn second_turn_is_rejected_while_streaming() {
        let mut session = session();
        session.begin_turn("first").unwrap();
        session.apply_frame(StreamFrame::Content("partial".to_string()));
        assert_eq!(session.phase(), SessionPhase::Streaming);

        let err = session.begin_turn("second").unwrap_err();
        assert!(err.is_turn_in_progress());
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.messages()[1].content, "partial");
    }

    #[test]
    fn settling_reenables_turns() {
        let mut session = session();
        session.begin_turn("first").unwrap();
        session.apply_frame(StreamFrame::Error("model overloaded".to_string()));
        assert_eq!(session.phase(), SessionPhase::Idle);
        session.begin_turn("second").unwrap();
        assert_eq!(session.message_count(), 4);
    }

    #[tokio::test]
    async fn frames_accumulate_and_adopt_conversation() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();

        let frames = stream::iter(vec![content("A"), content("B"), done(7)]);
        let outcome = session.consume(frames, &mut renderer).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Done {
                conversation_id: Some(ConversationId(7))
            }
        );
        assert_eq!(session.messages()[1].content, "AB");
        assert_eq!(session.conversation_id(), Some(ConversationId(7)));
        assert_eq!(renderer.text, "AB");
        assert!(renderer.finished);
        assert_eq!(session.phase(), SessionPhase::Idle);

        let request = session.begin_turn("again").unwrap();
        assert_eq!(request.conversation_id, Some(ConversationId(7)));
    }

    #[tokio::test]
    async fn established_conversation_is_kept() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();

        session.begin_turn("one").unwrap();
        session
            .consume(stream::iter(vec![done(7)]), &mut renderer)
            .await
            .unwrap();
        session.begin_turn("two").unwrap();
        session
            .consume(stream::iter(vec![done(9)]), &mut renderer)
            .await
            .unwrap();

        assert_eq!(session.conversation_id(), Some(ConversationId(7)));
    }

    #[tokio::test]
    async fn error_frame_replaces_content() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();

        let frames = stream::iter(vec![
            content("partial"),
            Ok(StreamFrame::Error("AI Error: rate limited".to_string())),
            content("ignored"),
        ]);
        let outcome = session.consume(frames, &mut renderer).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Errored("AI Error: rate limited".to_string())
        );
        assert_eq!(session.messages()[1].content, "Error: AI Error: rate limited");
        assert_eq!(renderer.errors, vec!["AI Error: rate limited".to_string()]);
        assert_eq!(session.conversation_id(), None);
    }

    #[tokio::test]
    async fn transport_error_settles_errored() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();

        let frames = stream::iter(vec![
            content("A"),
            Err(Error::streaming("connection reset", None)),
        ]);
        let outcome = session.consume(frames, &mut renderer).await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Errored(msg) if msg.contains("connection reset")));
        assert!(session.messages()[1].content.starts_with("Error: "));
        assert_eq!(session.stats().turns_errored, 1);
    }

    #[tokio::test]
    async fn stream_ending_without_done_completes() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();

        let outcome = session
            .consume(stream::iter(vec![content("A")]), &mut renderer)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            TurnOutcome::Done {
                conversation_id: None
            }
        );
        assert_eq!(session.messages()[1].content, "A");
        assert_eq!(session.conversation_id(), None);
    }

    #[tokio::test]
    async fn cancellation_stops_further_frames() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();
        let canceller = session.canceller();
        assert!(canceller.is_active());

        // After "A" the source cancels the turn and stalls; "B" is never read.
        let frames = stream::iter(vec![content("A")])
            .chain(stream::once(async move {
                canceller.cancel();
                futures::future::pending::<Result<StreamFrame>>().await
            }))
            .chain(stream::iter(vec![content("B")]));
        let frames = Box::pin(frames);

        let outcome = session.consume(frames, &mut renderer).await.unwrap();

        assert_eq!(outcome, TurnOutcome::Cancelled);
        assert_eq!(session.messages()[1].content, "A");
        assert!(renderer.interrupted);
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(!session.canceller().is_active());
    }

    #[test]
    fn frames_after_cancel_are_ignored() {
        let mut session = session();
        session.begin_turn("hello").unwrap();
        session.apply_frame(StreamFrame::Content("A".to_string()));
        assert_eq!(session.cancel_turn(), Some(TurnOutcome::Cancelled));

        assert_eq!(
            session.apply_frame(StreamFrame::Content("B".to_string())),
            None
        );
        assert_eq!(session.messages()[1].content, "A");
        assert_eq!(session.cancel_turn(), None);
    }

    #[test]
    fn canceller_without_turn_reports_false() {
        let session = session();
        assert!(!session.canceller().cancel());
    }

    #[test]
    fn new_chat_cancels_running_turn() {
        let mut session = session();
        session.begin_turn("hello").unwrap();
        let canceller = session.canceller();

        session.new_chat();

        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.message_count(), 0);
        assert_eq!(session.conversation_id(), None);
        assert!(!canceller.is_active());
        assert_eq!(session.stats().turns_cancelled, 1);
    }

    #[test]
    fn open_conversation_replaces_state() {
        let mut session = session();
        session.begin_turn("draft").unwrap();

        let detail: ConversationDetail = serde_json::from_value(json!({
            "id": 4,
            "title": "Earlier",
            "model": "llama-3.1-70b-versatile",
            "created_at": "2024-05-01T12:00:00",
            "updated_at": "2024-05-01T12:05:00",
            "messages": [
                {"id": 1, "role": "user", "content": "q", "created_at": "2024-05-01T12:00:00"},
                {"id": 2, "role": "assistant", "content": "a", "created_at": "2024-05-01T12:00:02"}
            ]
        }))
        .unwrap();
        session.open_conversation(detail);

        assert_eq!(session.phase(), SessionPhase::Idle);
        assert_eq!(session.conversation_id(), Some(ConversationId(4)));
        assert_eq!(session.messages()[0].id, MessageId::Server(1));
        let request = session.begin_turn("follow-up").unwrap();
        assert_eq!(request.conversation_id, Some(ConversationId(4)));
    }

    #[tokio::test]
    async fn logger_sees_frames_and_turns() {
        let logger = Arc::new(RecordingLogger::default());
        let mut session = session().with_logger(logger.clone());
        let mut renderer = RecordingRenderer::default();
        session.begin_turn("hello").unwrap();
        session
            .consume(stream::iter(vec![content("A"), done(3)]), &mut renderer)
            .await
            .unwrap();

        assert_eq!(logger.frames.lock().unwrap().len(), 2);
        assert_eq!(
            logger.turns.lock().unwrap().as_slice(),
            &[(
                "A".to_string(),
                TurnOutcome::Done {
                    conversation_id: Some(ConversationId(3))
                }
            )]
        );
    }

    #[tokio::test]
    async fn consume_requires_a_turn() {
        let mut session = session();
        let mut renderer = RecordingRenderer::default();
        let err = session
            .consume(stream::iter(vec![content("A")]), &mut renderer)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(session.message_count(), 0);
    }

    #[tokio::test]
    async fn send_streams_reply_end_to_end() {
        let (transport, mut session) = session_over(ScriptedTransport::new().on(
            "POST /chat/send",
            Reply::chunks(
                200,
                &[
                    "data: {\"content\":\"Hel\"}\n\n",
                    "data: {\"content\":\"lo\"}\n\ndata: {\"done\":true,\"conversation_id\":11}\n\n",
                ],
            ),
        ));
        session.set_temperature(1.1);
        let mut renderer = RecordingRenderer::default();

        let outcome = session.send("hi", &mut renderer).await.unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Done {
                conversation_id: Some(ConversationId(11))
            }
        );
        assert_eq!(session.messages()[1].content, "Hello");
        let body = transport.calls()[0].body.clone().unwrap();
        assert_eq!(body["message"], json!("hi"));
        assert_eq!(body["stream"], json!(true));
        assert_eq!(body["max_tokens"], json!(4096));
        assert!((body["temperature"].as_f64().unwrap() - 1.1).abs() < 1e-6);
    }

    #[tokio::test]
    async fn send_failure_shows_inline_error() {
        let (_transport, mut session) = session_over(ScriptedTransport::new().on(
            "POST /chat/send",
            Reply::json(429, json!({"detail": "Daily message limit reached (100)"})),
        ));
        let mut renderer = RecordingRenderer::default();

        let outcome = session.send("hi", &mut renderer).await.unwrap();

        assert!(matches!(outcome, TurnOutcome::Errored(msg) if msg.contains("Daily message limit")));
        assert_eq!(session.message_count(), 2);
        assert!(session.messages()[1].content.contains("Daily message limit"));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn send_while_busy_opens_no_stream() {
        let (transport, mut session) = session_over(ScriptedTransport::new());
        session.begin_turn("first").unwrap();
        let mut renderer = RecordingRenderer::default();

        let err = session.send("second", &mut renderer).await.unwrap_err();
        assert!(err.is_turn_in_progress());
        assert!(transport.calls().is_empty());
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn load_conversation_fetches_detail() {
        let (_transport, mut session) = session_over(ScriptedTransport::new().on(
            "GET /chat/conversations/5",
            Reply::json(
                200,
                json!({
                    "id": 5,
                    "title": "Saved",
                    "model": "llama-3.1-70b-versatile",
                    "created_at": "2024-05-01T12:00:00",
                    "updated_at": "2024-05-01T12:00:00",
                    "messages": []
                }),
            ),
        ));
        session.load_conversation(ConversationId(5)).await.unwrap();
        assert_eq!(session.conversation_id(), Some(ConversationId(5)));
    }

    #[test]
    fn stats_reflect_config() {
        let mut session = session();
        session.set_model("llama-3.1-8b-instant");
        session.set_max_tokens(512);
        let stats = session.stats();
        assert_eq!(stats.model, "llama-3.1-8b-instant");
        assert_eq!(stats.max_tokens, 512);
        assert_eq!(stats.phase, SessionPhase::Idle);
        assert_eq!(stats.message_count, 0);
    }
}
