//! Error taxonomy for the streaming transcription client.
//!
//! Pre-flight configuration problems are returned synchronously from
//! `start()`; everything else surfaces through the session's completion
//! channel (fatal) or its event channel (recoverable).

use crate::transport::TransportError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by a streaming transcription session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid settings detected before any connection attempt. Never sent
    /// over the wire.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A token could not be obtained, or the service rejected the
    /// credentials after the retry budget was exhausted.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// A payload did not match any known server message shape, or the
    /// server violated the result-index contract. Recoverable unless it
    /// repeats.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The service explicitly reported an error payload.
    #[error("service error: {message}")]
    Service {
        /// Numeric code, when the service provides one.
        code: Option<i32>,
        /// Error description, verbatim from the service.
        message: String,
    },

    /// Socket or network failure unrelated to authentication.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The session has terminated; queued sends can no longer be delivered.
    #[error("session closed")]
    SessionClosed,
}
