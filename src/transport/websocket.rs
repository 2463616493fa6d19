//! WebSocket transport backed by tokio-tungstenite.

use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderName, HeaderValue};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::{ConnectRequest, Connection, Transport, TransportError, TransportEvent};

/// Default bound on the WebSocket handshake.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Production transport: TLS WebSocket via tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Create a transport with the default 30 second handshake timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Map a tungstenite handshake error to a transport error, preserving the
/// HTTP status of a rejected upgrade so auth failures stay classifiable.
fn classify_connect_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            let message = response
                .body()
                .as_ref()
                .map(|body| String::from_utf8_lossy(body).into_owned())
                .unwrap_or_default();
            TransportError::HandshakeRejected { status, message }
        }
        other => TransportError::ConnectFailed(other.to_string()),
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(
        &self,
        request: ConnectRequest,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConnectFailed(format!("invalid url: {e}")))?;

        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::ConnectFailed(format!("invalid header name: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::ConnectFailed(format!("invalid header value: {e}")))?;
            upgrade.headers_mut().insert(name, value);
        }

        let (stream, response) = timeout(self.connect_timeout, connect_async(upgrade))
            .await
            .map_err(|_| {
                TransportError::ConnectFailed(format!(
                    "handshake timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(classify_connect_error)?;

        debug!(status = %response.status(), "websocket upgrade accepted");

        Ok(Box::new(WebSocketConnection {
            stream,
            closed: false,
        }))
    }
}

struct WebSocketConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait::async_trait]
impl Connection for WebSocketConnection {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<(), TransportError> {
        self.stream
            .send(Message::Binary(data))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return Some(TransportEvent::Text(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(data))) => return Some(TransportEvent::Binary(data)),
                Some(Ok(Message::Close(frame))) => {
                    self.closed = true;
                    let error = match frame {
                        None => None,
                        Some(ref f) if f.code == CloseCode::Normal => None,
                        Some(f) => Some(TransportError::ConnectionLost(format!(
                            "close code {}: {}",
                            u16::from(f.code),
                            f.reason
                        ))),
                    };
                    return Some(TransportEvent::Closed(error));
                }
                Some(Ok(Message::Ping(payload))) => {
                    // tungstenite queues the pong; flush it out
                    let _ = self.stream.send(Message::Pong(payload)).await;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(TransportEvent::Closed(Some(TransportError::ConnectionLost(
                        e.to_string(),
                    ))));
                }
                None => {
                    self.closed = true;
                    return Some(TransportEvent::Closed(Some(TransportError::ConnectionLost(
                        "stream ended without close frame".to_string(),
                    ))));
                }
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))
    }
}
