//! Single-flight session coordinator.
//!
//! Owns the "at most one active stream" slot. `start` cancels any active
//! stream before opening the next one, `cancel` is idempotent, and every
//! notification is tagged with an epoch captured when its transport task was
//! spawned — updates from a superseded or cancelled stream are discarded at
//! dispatch time, so a late-completing read can never leak into the next
//! session. Tokens and structured events travel through one channel and keep
//! one total order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use futures_util::StreamExt;

use crate::events::{AgentEvent, DebugReport, StreamEvent};
use crate::transport::{ChunkedTransport, EventStream, PushTransport, Transport};

/// What to stream and under which session key.
///
/// A request with a JSON body goes out over the chunked POST transport;
/// a body-less request opens a push event connection.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub endpoint: String,
    pub body: Option<serde_json::Value>,
    pub session_key: String,
}

impl StreamRequest {
    /// POST `endpoint` with `body`, streaming the response body.
    pub fn chunked(
        endpoint: impl Into<String>,
        body: serde_json::Value,
        session_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            body: Some(body),
            session_key: session_key.into(),
        }
    }

    /// GET `endpoint` as a push event connection.
    pub fn push(endpoint: impl Into<String>, session_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            body: None,
            session_key: session_key.into(),
        }
    }
}

/// Notifications delivered to the caller, in frame arrival order.
///
/// Exactly one of `Done`/`Error` is delivered per session, and nothing
/// follows it.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate {
    Token { session_key: String, text: String },
    Agent { session_key: String, event: AgentEvent },
    Debug { session_key: String, report: DebugReport },
    Done { session_key: String },
    Error { session_key: String, message: String },
}

impl StreamUpdate {
    pub fn session_key(&self) -> &str {
        match self {
            StreamUpdate::Token { session_key, .. }
            | StreamUpdate::Agent { session_key, .. }
            | StreamUpdate::Debug { session_key, .. }
            | StreamUpdate::Done { session_key }
            | StreamUpdate::Error { session_key, .. } => session_key,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamUpdate::Done { .. } | StreamUpdate::Error { .. })
    }
}

/// Accumulated state of the active stream, reset on terminal or cancel.
#[derive(Debug, Default)]
pub struct StreamSession {
    pub session_key: String,
    /// Concatenated token text received so far, for display.
    pub tokens: String,
    /// Every structured agent event received so far, in order.
    pub agent_events: Vec<AgentEvent>,
}

/// An update tagged with the epoch of the task that produced it.
struct Envelope {
    epoch: u64,
    update: StreamUpdate,
}

/// Single-flight stream coordinator. One instance drives one logical
/// conversation surface; all I/O happens on spawned tokio tasks and lands
/// back here through [`StreamCoordinator::next_update`].
pub struct StreamCoordinator {
    tx: mpsc::UnboundedSender<Envelope>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    /// Bumped on every start and cancel; stale envelopes are dropped.
    epoch: u64,
    session: Option<StreamSession>,
    task: Option<JoinHandle<()>>,
    chunked: Arc<dyn Transport>,
    push: Arc<dyn Transport>,
}

impl StreamCoordinator {
    pub fn new() -> Self {
        Self::with_transports(
            Arc::new(ChunkedTransport::new()),
            Arc::new(PushTransport::new()),
        )
    }

    /// Inject transports (tests script these).
    pub fn with_transports(chunked: Arc<dyn Transport>, push: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            epoch: 0,
            session: None,
            task: None,
            chunked,
            push,
        }
    }

    /// Whether a stream is currently active.
    pub fn is_streaming(&self) -> bool {
        self.session.is_some()
    }

    /// The active session's accumulated state, if any.
    pub fn session(&self) -> Option<&StreamSession> {
        self.session.as_ref()
    }

    /// Start a new stream, cancelling the active one first. Returns
    /// immediately; results arrive through [`Self::next_update`].
    pub fn start(&mut self, request: StreamRequest) {
        self.cancel();
        self.epoch += 1;

        let transport = if request.body.is_some() {
            Arc::clone(&self.chunked)
        } else {
            Arc::clone(&self.push)
        };

        tracing::debug!(
            session_key = %request.session_key,
            endpoint = %request.endpoint,
            epoch = self.epoch,
            "starting stream"
        );

        self.session = Some(StreamSession {
            session_key: request.session_key.clone(),
            tokens: String::new(),
            agent_events: Vec::new(),
        });
        self.task = Some(tokio::spawn(run_stream(
            transport,
            request,
            self.epoch,
            self.tx.clone(),
        )));
    }

    /// Cancel the active stream. Idempotent; a cancelled stream never later
    /// yields `Done` or `Error`.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(session) = self.session.take() {
            tracing::debug!(session_key = %session.session_key, "stream cancelled");
        }
        // Anything an aborted task managed to send before the abort landed
        // carries a stale epoch and is dropped in next_update.
        self.epoch += 1;
    }

    /// Await the next notification of the active stream.
    ///
    /// Filters superseded epochs, folds tokens and agent events into the
    /// session state, and resets the session on a terminal update. Pends
    /// while no stream is active; callers typically `select!` on this
    /// alongside their input sources.
    pub async fn next_update(&mut self) -> Option<StreamUpdate> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.epoch != self.epoch || self.session.is_none() {
                continue;
            }

            if let Some(session) = self.session.as_mut() {
                match &envelope.update {
                    StreamUpdate::Token { text, .. } => session.tokens.push_str(text),
                    StreamUpdate::Agent { event, .. } => session.agent_events.push(event.clone()),
                    StreamUpdate::Debug { .. } => {}
                    StreamUpdate::Done { .. } | StreamUpdate::Error { .. } => {}
                }
            }

            if envelope.update.is_terminal() {
                self.session = None;
                self.task = None;
            }

            return Some(envelope.update);
        }
    }
}

impl Default for StreamCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Epoch-tagged sender handed to the transport task.
struct UpdateSink {
    epoch: u64,
    session_key: String,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl UpdateSink {
    fn send(&self, update: StreamUpdate) {
        // The receiver outlives every task; a send failure means the
        // coordinator itself was dropped, which ends the session anyway.
        let _ = self.tx.send(Envelope {
            epoch: self.epoch,
            update,
        });
    }

    fn error(&self, message: String) {
        self.send(StreamUpdate::Error {
            session_key: self.session_key.clone(),
            message,
        });
    }

    fn done(&self) {
        self.send(StreamUpdate::Done {
            session_key: self.session_key.clone(),
        });
    }
}

/// Open the transport and pump its events into the sink, honoring the
/// transport's watchdog ceiling.
async fn run_stream(
    transport: Arc<dyn Transport>,
    request: StreamRequest,
    epoch: u64,
    tx: mpsc::UnboundedSender<Envelope>,
) {
    let StreamRequest {
        endpoint,
        body,
        session_key,
    } = request;
    let sink = UpdateSink {
        epoch,
        session_key,
        tx,
    };

    let stream = match transport.open(&endpoint, body.as_ref()).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "stream open failed");
            sink.error(e.to_string());
            return;
        }
    };

    match transport.watchdog() {
        Some(ceiling) => {
            // The timeout dropping the drain future tears the transport down.
            if tokio::time::timeout(ceiling, drain(stream, &sink))
                .await
                .is_err()
            {
                tracing::warn!(ceiling_secs = ceiling.as_secs(), "stream watchdog fired");
                sink.error("generation timed out".to_string());
            }
        }
        None => drain(stream, &sink).await,
    }
}

/// Forward classified events until the first terminal one. A stream that
/// closes without a terminal frame counts as success.
async fn drain(mut stream: EventStream, sink: &UpdateSink) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(StreamEvent::Token { text }) => sink.send(StreamUpdate::Token {
                session_key: sink.session_key.clone(),
                text,
            }),
            Ok(StreamEvent::Agent(event)) => sink.send(StreamUpdate::Agent {
                session_key: sink.session_key.clone(),
                event,
            }),
            Ok(StreamEvent::Debug(report)) => sink.send(StreamUpdate::Debug {
                session_key: sink.session_key.clone(),
                report,
            }),
            Ok(StreamEvent::Done) => {
                sink.done();
                return;
            }
            Ok(StreamEvent::Error { message }) => {
                sink.error(message);
                return;
            }
            Err(e) => {
                sink.error(e.to_string());
                return;
            }
        }
    }
    sink.done();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StreamError;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures_util::stream;

    /// Transport that replays a scripted event list per `open`, optionally
    /// delaying each item to model in-flight I/O.
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Vec<Result<StreamEvent, StreamError>>>>,
        delay: Option<Duration>,
        watchdog: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(scripts: Vec<Vec<Result<StreamEvent, StreamError>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                delay: None,
                watchdog: None,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open(
            &self,
            _endpoint: &str,
            _body: Option<&serde_json::Value>,
        ) -> Result<EventStream, StreamError> {
            let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
            let delay = self.delay;
            let stream = stream::iter(events).then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            });
            Ok(Box::pin(stream))
        }

        fn watchdog(&self) -> Option<Duration> {
            self.watchdog
        }
    }

    /// Transport whose establishment always fails.
    struct RefusingTransport;

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn open(
            &self,
            _endpoint: &str,
            _body: Option<&serde_json::Value>,
        ) -> Result<EventStream, StreamError> {
            Err(StreamError::Status {
                status: 500,
                message: "engine exploded".to_string(),
            })
        }
    }

    /// Transport that opens fine but never produces anything.
    struct StalledTransport {
        watchdog: Duration,
    }

    #[async_trait]
    impl Transport for StalledTransport {
        async fn open(
            &self,
            _endpoint: &str,
            _body: Option<&serde_json::Value>,
        ) -> Result<EventStream, StreamError> {
            Ok(Box::pin(stream::pending()))
        }

        fn watchdog(&self) -> Option<Duration> {
            Some(self.watchdog)
        }
    }

    fn coordinator_with(transport: Arc<dyn Transport>) -> StreamCoordinator {
        // Same transport on both slots; requests pick by body presence.
        StreamCoordinator::with_transports(Arc::clone(&transport), transport)
    }

    fn token(text: &str) -> Result<StreamEvent, StreamError> {
        Ok(StreamEvent::Token {
            text: text.to_string(),
        })
    }

    async fn collect_until_terminal(coordinator: &mut StreamCoordinator) -> Vec<StreamUpdate> {
        let mut updates = Vec::new();
        loop {
            let update = coordinator.next_update().await.expect("channel open");
            let terminal = update.is_terminal();
            updates.push(update);
            if terminal {
                return updates;
            }
        }
    }

    /// Assert that no further update arrives within a short grace period.
    async fn assert_quiet(coordinator: &mut StreamCoordinator) {
        let result =
            tokio::time::timeout(Duration::from_millis(50), coordinator.next_update()).await;
        assert!(result.is_err(), "expected no further updates");
    }

    #[tokio::test]
    async fn test_updates_arrive_in_frame_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            token("Hello, "),
            Ok(StreamEvent::Agent(AgentEvent::Thinking {
                content: "checking".to_string(),
            })),
            token("world"),
            Ok(StreamEvent::Done),
        ]]));
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/1", "camp-1"));

        let updates = collect_until_terminal(&mut coordinator).await;
        assert_eq!(updates.len(), 4);
        assert!(matches!(&updates[0], StreamUpdate::Token { text, .. } if text == "Hello, "));
        assert!(matches!(&updates[1], StreamUpdate::Agent { .. }));
        assert!(matches!(&updates[2], StreamUpdate::Token { text, .. } if text == "world"));
        assert!(matches!(&updates[3], StreamUpdate::Done { session_key } if session_key == "camp-1"));
        assert!(!coordinator.is_streaming());
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_session_accumulates_tokens_and_events() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            token("foo"),
            Ok(StreamEvent::Agent(AgentEvent::StartedTool {
                tool: "calc".to_string(),
                args: serde_json::Map::new(),
                call_id: None,
            })),
            token("bar"),
            Ok(StreamEvent::Done),
        ]]));
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/2", "camp-2"));

        // Three non-terminal updates, then inspect accumulated state.
        for _ in 0..3 {
            coordinator.next_update().await.unwrap();
        }
        let session = coordinator.session().expect("session active");
        assert_eq!(session.tokens, "foobar");
        assert_eq!(session.agent_events.len(), 1);

        assert!(matches!(
            coordinator.next_update().await.unwrap(),
            StreamUpdate::Done { .. }
        ));
        assert!(coordinator.session().is_none());
    }

    #[tokio::test]
    async fn test_stream_end_without_terminal_synthesizes_done() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![token("partial")]]));
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/3", "camp-3"));

        let updates = collect_until_terminal(&mut coordinator).await;
        assert_eq!(updates.len(), 2);
        assert!(matches!(&updates[1], StreamUpdate::Done { .. }));
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_started_tool_then_eof_terminates_exactly_once() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![Ok(StreamEvent::Agent(
            AgentEvent::StartedTool {
                tool: "web_search".to_string(),
                args: serde_json::Map::new(),
                call_id: Some("call_0_0".to_string()),
            },
        ))]]));
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/4", "camp-4"));

        let updates = collect_until_terminal(&mut coordinator).await;
        let terminals = updates.iter().filter(|u| u.is_terminal()).count();
        assert_eq!(terminals, 1);
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_error_sentinel_terminates_with_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![
            token("some text"),
            Ok(StreamEvent::Error {
                message: "LLM request timed out".to_string(),
            }),
        ]]));
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/5", "camp-5"));

        let updates = collect_until_terminal(&mut coordinator).await;
        assert!(matches!(
            updates.last().unwrap(),
            StreamUpdate::Error { message, .. } if message == "LLM request timed out"
        ));
        assert!(!coordinator.is_streaming());
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_establishment_failure_surfaces_immediately() {
        let mut coordinator = coordinator_with(Arc::new(RefusingTransport));
        coordinator.start(StreamRequest::chunked(
            "http://backend/refine",
            serde_json::json!({"field_name": "hook"}),
            "camp-6",
        ));

        match coordinator.next_update().await.unwrap() {
            StreamUpdate::Error { message, .. } => {
                assert!(message.contains("500"));
                assert!(message.contains("engine exploded"));
            }
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(!coordinator.is_streaming());
    }

    #[tokio::test]
    async fn test_start_cancels_predecessor() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![
                vec![token("stale"), Ok(StreamEvent::Done)],
                vec![token("fresh"), Ok(StreamEvent::Done)],
            ])
            .with_delay(Duration::from_millis(30)),
        );
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/7", "old"));
        // Let the first transport get in flight, then supersede it.
        tokio::time::sleep(Duration::from_millis(5)).await;
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/7", "new"));

        let updates = collect_until_terminal(&mut coordinator).await;
        assert!(
            updates.iter().all(|u| u.session_key() == "new"),
            "stale session leaked: {:?}",
            updates
        );
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_cancel_suppresses_late_notifications() {
        let transport = Arc::new(
            ScriptedTransport::new(vec![vec![token("late"), Ok(StreamEvent::Done)]])
                .with_delay(Duration::from_millis(20)),
        );
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/8", "camp-8"));
        coordinator.cancel();

        assert!(!coordinator.is_streaming());
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let mut coordinator = coordinator_with(Arc::new(ScriptedTransport::new(vec![])));
        coordinator.cancel();
        coordinator.cancel();
        assert!(!coordinator.is_streaming());
    }

    #[tokio::test]
    async fn test_watchdog_times_out_stalled_stream() {
        let transport = Arc::new(StalledTransport {
            watchdog: Duration::from_millis(40),
        });
        let mut coordinator = coordinator_with(transport);
        coordinator.start(StreamRequest::push("http://backend/generate/ideas/9", "camp-9"));

        match coordinator.next_update().await.unwrap() {
            StreamUpdate::Error { message, .. } => {
                assert_eq!(message, "generation timed out");
            }
            other => panic!("expected Error, got {:?}", other),
        }
        assert!(!coordinator.is_streaming());
        assert_quiet(&mut coordinator).await;
    }

    #[tokio::test]
    async fn test_restart_resets_accumulated_state() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            vec![token("first run"), Ok(StreamEvent::Done)],
            vec![token("second"), Ok(StreamEvent::Done)],
        ]));
        let mut coordinator = coordinator_with(transport);

        coordinator.start(StreamRequest::push("http://backend/generate/ideas/10", "a"));
        collect_until_terminal(&mut coordinator).await;

        coordinator.start(StreamRequest::push("http://backend/generate/ideas/10", "b"));
        coordinator.next_update().await.unwrap();
        let session = coordinator.session().expect("session active");
        assert_eq!(session.session_key, "b");
        assert_eq!(session.tokens, "second");
        assert!(session.agent_events.is_empty());
        collect_until_terminal(&mut coordinator).await;
    }
}
