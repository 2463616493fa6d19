//! Streaming transcription session.
//!
//! One driver task per session owns the connection, the state machine, the
//! FIFO write queue, and the transcript aggregate. Client calls and
//! transport events are both funneled into that task over channels, so all
//! mutable session state changes on a single logical worker.
//!
//! ```text
//! send_audio()/stop() ──▶ command channel ──▶ ┌─────────────┐
//!                                             │ driver task │──▶ event channel
//! transport events    ──────────────────────▶ └─────────────┘──▶ completion (oneshot)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::auth::{AuthToken, TokenPlacement, TokenProvider};
use crate::error::{Error, Result};
use crate::stt::messages::{RecognitionResult, ServerMessage, stop_frame};
use crate::stt::settings::RecognitionSettings;
use crate::stt::transcript::Transcript;
use crate::transport::{ConnectRequest, Connection, Transport, TransportError, TransportEvent};

/// Default recognize endpoint (Dallas).
pub const DEFAULT_RECOGNIZE_URL: &str =
    "wss://api.us-south.speech-to-text.watson.cloud.ibm.com/v1/recognize";

/// Default number of reconnect attempts after an auth-classified rejection.
pub const DEFAULT_MAX_RETRIES: u32 = 1;

/// Consecutive unclassifiable or contract-violating payloads tolerated
/// before the session fails.
const MAX_CONSECUTIVE_PROTOCOL_ERRORS: u32 = 3;

/// Command channel depth; callers see backpressure when it fills.
const COMMAND_BUFFER: usize = 32;

/// Event channel depth.
const EVENT_BUFFER: usize = 256;

/// Decides whether a transport failure should be treated as an
/// authentication rejection (token refresh + bounded reconnect).
///
/// The exact rejection signature is service-version-dependent, so it is a
/// configurable predicate rather than a hard-coded match.
pub type AuthFailureClassifier = Arc<dyn Fn(&TransportError) -> bool + Send + Sync>;

/// Default classifier: the WebSocket upgrade was rejected with 401 or 403.
pub fn default_auth_classifier(error: &TransportError) -> bool {
    matches!(
        error,
        TransportError::HandshakeRejected {
            status: 401 | 403,
            ..
        }
    )
}

// =============================================================================
// Options
// =============================================================================

/// Connection-level options for a session. Recognition parameters that
/// travel in the start frame live in [`RecognitionSettings`] instead.
#[derive(Clone)]
pub struct SessionOptions {
    /// Recognize endpoint URL (`wss://.../v1/recognize`).
    pub recognize_url: String,
    /// Base or custom language model identifier.
    pub model: Option<String>,
    /// Customization (custom language model) identifier.
    pub customization_id: Option<String>,
    /// Opt out of IBM's request logging for model improvement.
    pub learning_opt_out: bool,
    /// Reconnect attempts after an auth-classified rejection.
    pub max_retries: u32,
    /// Extra headers added to the upgrade request.
    pub headers: Vec<(String, String)>,
    /// Classifier for authentication-class transport failures.
    pub auth_failure: AuthFailureClassifier,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            recognize_url: DEFAULT_RECOGNIZE_URL.to_string(),
            model: None,
            customization_id: None,
            learning_opt_out: false,
            max_retries: DEFAULT_MAX_RETRIES,
            headers: Vec::new(),
            auth_failure: Arc::new(default_auth_classifier),
        }
    }
}

impl std::fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOptions")
            .field("recognize_url", &self.recognize_url)
            .field("model", &self.model)
            .field("customization_id", &self.customization_id)
            .field("learning_opt_out", &self.learning_opt_out)
            .field("max_retries", &self.max_retries)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl SessionOptions {
    /// Build the upgrade request, placing the token in the query string or
    /// an `X-Watson-Authorization-Token` header per the provider's scheme.
    pub(crate) fn connect_request(
        &self,
        token: &AuthToken,
        placement: TokenPlacement,
    ) -> Result<ConnectRequest> {
        let mut url = Url::parse(&self.recognize_url)
            .map_err(|e| Error::Configuration(format!("invalid recognize url: {e}")))?;

        {
            let mut query = url.query_pairs_mut();
            if let Some(ref model) = self.model {
                query.append_pair("model", model);
            }
            if let Some(ref customization_id) = self.customization_id {
                query.append_pair("customization_id", customization_id);
            }
            if self.learning_opt_out {
                query.append_pair("x-watson-learning-opt-out", "true");
            }
            if placement == TokenPlacement::Query {
                query.append_pair("access_token", token.as_str());
            }
        }

        let mut headers = self.headers.clone();
        headers.push((
            "User-Agent".to_string(),
            concat!("watson-stt/", env!("CARGO_PKG_VERSION")).to_string(),
        ));
        if placement == TokenPlacement::Header {
            headers.push((
                "X-Watson-Authorization-Token".to_string(),
                token.as_str().to_string(),
            ));
        }

        Ok(ConnectRequest {
            url: url.to_string(),
            headers,
        })
    }
}

// =============================================================================
// Session state and events
// =============================================================================

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport connection.
    Disconnected,
    /// Connection attempt (or auth retry) in flight.
    Connecting,
    /// Connected; no request in flight.
    Listening,
    /// At least one frame of the current request has been written.
    RequestStarted,
    /// Result messages are arriving.
    ReceivingResults,
    /// Terminal.
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::RequestStarted => "request-started",
            Self::ReceivingResults => "receiving-results",
            Self::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Progress notifications delivered on the session's event channel.
///
/// `Final` results are durable; `Interim` results at the same index may be
/// overwritten until the index is finalized.
#[derive(Debug)]
pub enum TranscriptEvent {
    /// A provisional hypothesis at `index`.
    Interim {
        /// Transcript position.
        index: usize,
        /// Current value at that position.
        result: RecognitionResult,
    },
    /// A finalized result at `index`; it will never change again.
    Final {
        /// Transcript position.
        index: usize,
        /// Final value at that position.
        result: RecognitionResult,
    },
    /// A recoverable anomaly; the session stays alive. Fatal errors resolve
    /// the completion channel instead.
    Error(Error),
}

// =============================================================================
// Public session API
// =============================================================================

/// Factory for streaming transcription exchanges over an injected transport
/// and token provider. Each `start()` spawns one independent session.
pub struct StreamingTranscriptionSession {
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    options: SessionOptions,
}

impl StreamingTranscriptionSession {
    /// Create a session factory with its dependencies injected.
    pub fn new(
        transport: Arc<dyn Transport>,
        tokens: Arc<dyn TokenProvider>,
        options: SessionOptions,
    ) -> Self {
        Self {
            transport,
            tokens,
            options,
        }
    }

    /// Begin a transcription exchange.
    ///
    /// Settings are validated synchronously; a violation returns
    /// [`Error::Configuration`] before any connection is attempted. On
    /// success, returns a handle for writes plus the event channel carrying
    /// interim/final updates.
    pub fn start(
        &self,
        settings: RecognitionSettings,
    ) -> Result<(SessionHandle, mpsc::Receiver<TranscriptEvent>)> {
        settings.validate()?;

        let id = Uuid::new_v4();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        info!(
            session = %id,
            content_type = %settings.content_type,
            "starting transcription session"
        );

        let driver = SessionDriver {
            id,
            transport: Arc::clone(&self.transport),
            tokens: Arc::clone(&self.tokens),
            options: self.options.clone(),
            start_json: settings.start_message().to_string(),
            state: SessionState::Disconnected,
            retries: 0,
            refresh_token: false,
            pending: VecDeque::new(),
            start_consumed: false,
            initial_listening_seen: false,
            stop_queued: false,
            stop_sent: false,
            protocol_errors: 0,
            commands_open: true,
            transcript: Transcript::new(),
            events: event_tx,
        };
        tokio::spawn(driver.run(command_rx, done_tx, cancel.clone()));

        Ok((
            SessionHandle {
                commands: command_tx,
                cancel,
                finished: done_rx,
            },
            event_rx,
        ))
    }
}

enum Command {
    Audio(Bytes),
    Stop,
}

/// Write handle for one running session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    finished: oneshot::Receiver<Result<Vec<RecognitionResult>>>,
}

impl SessionHandle {
    /// Enqueue a binary audio frame. Non-blocking with respect to network
    /// I/O: frames queue while the transport is connecting and are never
    /// silently dropped. Fails once the session has terminated.
    pub async fn send_audio(&self, chunk: Bytes) -> Result<()> {
        self.commands
            .send(Command::Audio(chunk))
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Enqueue the end-of-audio control frame. The session disconnects after
    /// the queue drains and the service finishes delivering results.
    pub async fn stop(&self) -> Result<()> {
        self.commands
            .send(Command::Stop)
            .await
            .map_err(|_| Error::SessionClosed)
    }

    /// Forced disconnect: discard queued writes and tear down the transport
    /// without draining. Accumulated results are still delivered through the
    /// completion channel.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Await the session outcome: the reconciled results on success, or the
    /// single fatal error that closed the session.
    pub async fn finished(self) -> Result<Vec<RecognitionResult>> {
        match self.finished.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::SessionClosed),
        }
    }
}

// =============================================================================
// Driver
// =============================================================================

enum Outbound {
    Start(String),
    Audio(Bytes),
    Stop(String),
}

enum Flow {
    Continue,
    Finished,
}

enum Input {
    Cancelled,
    Command(Option<Command>),
    Transport(Option<TransportEvent>),
}

struct SessionDriver {
    id: Uuid,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    options: SessionOptions,
    /// Serialized start frame; replayed ahead of queued audio on reconnect.
    start_json: String,
    state: SessionState,
    retries: u32,
    /// Force a token refresh on the next connect attempt.
    refresh_token: bool,
    /// Strictly FIFO outbound queue; suspended whenever disconnected.
    pending: VecDeque<Outbound>,
    /// The start frame has been written on some connection.
    start_consumed: bool,
    /// The readiness signal for the current request has arrived; the next
    /// `listening` state marks the end of processing.
    initial_listening_seen: bool,
    stop_queued: bool,
    /// The stop frame has been written on some connection.
    stop_sent: bool,
    protocol_errors: u32,
    commands_open: bool,
    transcript: Transcript,
    events: mpsc::Sender<TranscriptEvent>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        done: oneshot::Sender<Result<Vec<RecognitionResult>>>,
        cancel: CancellationToken,
    ) {
        let outcome = self.drive(&mut commands, &cancel).await;
        self.state = SessionState::Closed;
        match &outcome {
            Ok(results) => {
                info!(session = %self.id, results = results.len(), "session closed")
            }
            Err(e) => error!(session = %self.id, error = %e, "session failed"),
        }
        let _ = done.send(outcome);
    }

    async fn drive(
        &mut self,
        commands: &mut mpsc::Receiver<Command>,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecognitionResult>> {
        self.pending
            .push_back(Outbound::Start(self.start_json.clone()));
        let mut connection: Option<Box<dyn Connection>> = None;

        loop {
            if cancel.is_cancelled() {
                return self.teardown(connection.take()).await;
            }

            // (Re)connect before touching the queue; writes stay suspended
            // until the transport is ready. Forced disconnect must not wait
            // for a token fetch or handshake in flight.
            if connection.is_none() {
                let established = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = self.establish() => Some(result),
                };
                let Some(established) = established else {
                    return self.teardown(None).await;
                };
                connection = Some(established?);
                self.state = SessionState::Listening;
                self.retries = 0;
                self.protocol_errors = 0;
                self.initial_listening_seen = false;
                // A reconnect replays the start frame ahead of queued audio,
                // and re-queues the stop frame if it was already consumed.
                if self.start_consumed {
                    self.pending
                        .push_front(Outbound::Start(self.start_json.clone()));
                    self.start_consumed = false;
                }
                if self.stop_sent {
                    self.pending.push_back(Outbound::Stop(stop_frame()));
                    self.stop_sent = false;
                }
            }

            // Drain the queue in FIFO order. A failed frame stays queued,
            // and a forced disconnect abandons the drain.
            let flushed = match connection.as_mut() {
                Some(conn) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = self.flush(conn.as_mut()) => Some(result),
                    }
                }
                None => continue,
            };
            let Some(flushed) = flushed else {
                return self.teardown(connection.take()).await;
            };
            if let Err(e) = flushed {
                warn!(session = %self.id, error = %e, "write failed; connection lost");
                if let Some(mut conn) = connection.take() {
                    let _ = conn.close().await;
                }
                self.classify_disconnect(e)?;
                continue;
            }

            let input = match connection.as_mut() {
                Some(conn) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Input::Cancelled,
                        cmd = commands.recv(), if self.commands_open => Input::Command(cmd),
                        event = conn.next_event() => Input::Transport(event),
                    }
                }
                None => continue,
            };

            match input {
                Input::Cancelled => return self.teardown(connection.take()).await,
                Input::Command(None) => self.commands_open = false,
                Input::Command(Some(Command::Audio(data))) => {
                    self.pending.push_back(Outbound::Audio(data));
                }
                Input::Command(Some(Command::Stop)) => {
                    if !self.stop_queued {
                        self.stop_queued = true;
                        self.pending.push_back(Outbound::Stop(stop_frame()));
                    }
                }
                Input::Transport(Some(TransportEvent::Text(text))) => {
                    match self.handle_text(&text)? {
                        Flow::Continue => {}
                        Flow::Finished => {
                            if let Some(mut conn) = connection.take() {
                                let _ = conn.close().await;
                            }
                            return Ok(std::mem::take(&mut self.transcript).into_results());
                        }
                    }
                }
                Input::Transport(Some(TransportEvent::Binary(data))) => {
                    debug!(session = %self.id, bytes = data.len(), "ignoring binary frame");
                }
                Input::Transport(Some(TransportEvent::Closed(None)))
                | Input::Transport(None) => {
                    // Clean server-side close (e.g. after the inactivity
                    // timeout): terminal stop with accumulated results.
                    info!(session = %self.id, "server closed the connection");
                    return Ok(std::mem::take(&mut self.transcript).into_results());
                }
                Input::Transport(Some(TransportEvent::Closed(Some(e)))) => {
                    connection = None;
                    self.classify_disconnect(e)?;
                }
            }
        }
    }

    /// Connect, fetching (or refreshing) a token first. Auth-classified
    /// rejections are retried up to `max_retries`, then surfaced as a fatal
    /// authentication error.
    async fn establish(&mut self) -> Result<Box<dyn Connection>> {
        loop {
            self.state = SessionState::Connecting;
            let token = if self.refresh_token {
                self.refresh_token = false;
                self.tokens.refresh().await?
            } else {
                self.tokens.token().await?
            };
            let request = self
                .options
                .connect_request(&token, self.tokens.placement())?;

            debug!(session = %self.id, attempt = self.retries + 1, "connecting");
            match self.transport.connect(request).await {
                Ok(connection) => {
                    info!(session = %self.id, "transport connected");
                    return Ok(connection);
                }
                Err(e) => self.classify_disconnect(e)?,
            }
        }
    }

    /// Classify a transport failure: auth-class failures consume a retry and
    /// schedule a token refresh; anything else is fatal.
    fn classify_disconnect(&mut self, error: TransportError) -> Result<()> {
        if (self.options.auth_failure)(&error) {
            if self.retries < self.options.max_retries {
                self.retries += 1;
                self.refresh_token = true;
                self.state = SessionState::Connecting;
                warn!(
                    session = %self.id,
                    retry = self.retries,
                    max_retries = self.options.max_retries,
                    "authentication rejected; refreshing token"
                );
                return Ok(());
            }
            return Err(Error::Authentication(format!(
                "credentials rejected after {} retries: {error}",
                self.retries
            )));
        }
        Err(Error::Transport(error))
    }

    async fn flush(
        &mut self,
        conn: &mut dyn Connection,
    ) -> std::result::Result<(), TransportError> {
        while let Some(frame) = self.pending.front() {
            match frame {
                Outbound::Start(text) | Outbound::Stop(text) => {
                    conn.send_text(text.clone()).await?;
                }
                Outbound::Audio(data) => conn.send_binary(data.clone()).await?,
            }
            // Only start and audio frames open a request; the stop frame
            // ends one and must not move the state forward.
            match self.pending.pop_front() {
                Some(Outbound::Start(_)) => {
                    debug!(session = %self.id, "sent start frame");
                    self.start_consumed = true;
                    if self.state == SessionState::Listening {
                        self.state = SessionState::RequestStarted;
                    }
                }
                Some(Outbound::Stop(_)) => {
                    debug!(session = %self.id, "sent stop frame");
                    self.stop_sent = true;
                }
                Some(Outbound::Audio(data)) => {
                    debug!(session = %self.id, bytes = data.len(), "sent audio frame");
                    if self.state == SessionState::Listening {
                        self.state = SessionState::RequestStarted;
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    fn handle_text(&mut self, text: &str) -> Result<Flow> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                self.protocol_violation(Error::Protocol(format!(
                    "unrecognized payload: {e}"
                )))?;
                return Ok(Flow::Continue);
            }
        };

        match message {
            ServerMessage::State(state) if state.is_listening() => {
                self.protocol_errors = 0;
                if !self.initial_listening_seen {
                    debug!(session = %self.id, "service is listening");
                    self.initial_listening_seen = true;
                } else if self.stop_sent && self.pending.is_empty() {
                    // Processing finished after the stop frame.
                    return Ok(Flow::Finished);
                } else if self.state == SessionState::ReceivingResults {
                    // Utterance complete; ready for the next one.
                    self.state = SessionState::Listening;
                }
            }
            ServerMessage::State(state) => {
                self.protocol_errors = 0;
                debug!(session = %self.id, state = %state.state, "state update");
            }
            ServerMessage::Results(envelope) => {
                if self.state == SessionState::RequestStarted {
                    self.state = SessionState::ReceivingResults;
                }
                match self
                    .transcript
                    .reconcile(envelope.result_index, envelope.results)
                {
                    Ok(updates) => {
                        self.protocol_errors = 0;
                        for update in updates {
                            let event = if update.result.is_final {
                                TranscriptEvent::Final {
                                    index: update.index,
                                    result: update.result,
                                }
                            } else {
                                TranscriptEvent::Interim {
                                    index: update.index,
                                    result: update.result,
                                }
                            };
                            self.emit(event);
                        }
                    }
                    // The frame is rejected, never partially applied.
                    Err(e) => self.protocol_violation(e)?,
                }
            }
            ServerMessage::Error(service_error) => {
                if service_error.is_inactivity_timeout() {
                    info!(
                        session = %self.id,
                        error = %service_error.error,
                        "inactivity timeout; ending session normally"
                    );
                    return Ok(Flow::Finished);
                }
                return Err(Error::Service {
                    code: service_error.code,
                    message: service_error.error,
                });
            }
        }

        Ok(Flow::Continue)
    }

    /// Report a recoverable protocol anomaly; fatal once it repeats.
    fn protocol_violation(&mut self, error: Error) -> Result<()> {
        self.protocol_errors += 1;
        warn!(
            session = %self.id,
            error = %error,
            consecutive = self.protocol_errors,
            "protocol violation"
        );
        if self.protocol_errors >= MAX_CONSECUTIVE_PROTOCOL_ERRORS {
            return Err(Error::Protocol(format!(
                "{error} ({} consecutive violations)",
                self.protocol_errors
            )));
        }
        self.emit(TranscriptEvent::Error(error));
        Ok(())
    }

    fn emit(&self, event: TranscriptEvent) {
        if self.events.try_send(event).is_err() {
            debug!(session = %self.id, "event receiver unavailable; dropping event");
        }
    }

    async fn teardown(
        &mut self,
        connection: Option<Box<dyn Connection>>,
    ) -> Result<Vec<RecognitionResult>> {
        if let Some(mut conn) = connection {
            let _ = conn.close().await;
        }
        let discarded = self.pending.len();
        self.pending.clear();
        info!(
            session = %self.id,
            discarded,
            "session aborted; pending writes discarded"
        );
        Ok(std::mem::take(&mut self.transcript).into_results())
    }
}

// =============================================================================
// Tests
// =============================================================================
