//! Duplex transport abstraction for the recognize endpoint.
//!
//! The session holds a [`Transport`] by reference and layers token retry and
//! write queueing around it by composition, so tests can substitute a
//! scripted transport and the WebSocket library never leaks into the session
//! logic.

mod websocket;

pub use websocket::WebSocketTransport;

use bytes::Bytes;

/// Failures raised by a transport or an established connection.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The server refused the WebSocket upgrade. Carries the HTTP status of
    /// the rejection so the session can classify authentication failures.
    #[error("handshake rejected with status {status}: {message}")]
    HandshakeRejected {
        /// HTTP status of the failed upgrade response.
        status: u16,
        /// Response detail, when available.
        message: String,
    },

    /// The connection could not be established at all.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// An outbound frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// An established connection failed or was closed abnormally.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// A connection request: target URL plus extra request headers.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Fully-built `wss://` URL including query parameters.
    pub url: String,
    /// Additional headers for the upgrade request (auth token, user agent).
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    /// Create a request with no extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// Inbound events surfaced by an established connection.
#[derive(Debug)]
pub enum TransportEvent {
    /// A text frame (JSON control or result message).
    Text(String),
    /// A binary frame. The recognize service does not normally send these.
    Binary(Bytes),
    /// The connection ended. `None` means a clean close.
    Closed(Option<TransportError>),
}

/// Factory for duplex message channels.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection. Implementations are expected to bound the attempt
    /// with their own timeout.
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// An established duplex connection.
#[async_trait::async_trait]
pub trait Connection: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a binary frame.
    async fn send_binary(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next inbound event. Yields `Closed` exactly once when the
    /// connection ends, then `None`.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Close the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<(), TransportError>;
}
