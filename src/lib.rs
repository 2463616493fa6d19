//! Streaming speech-to-text client for the IBM Watson recognize WebSocket
//! protocol.
//!
//! The crate is organized around three injected seams: a [`Transport`]
//! opening duplex message channels, a [`TokenProvider`] supplying bearer
//! tokens, and the [`StreamingTranscriptionSession`] driving the recognize
//! protocol over them.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use watson_stt::auth::IamTokenProvider;
//! use watson_stt::stt::{
//!     AudioFormat, RecognitionSettings, SessionOptions, StreamingTranscriptionSession,
//!     TranscriptEvent,
//! };
//! use watson_stt::transport::WebSocketTransport;
//!
//! # async fn run(audio_chunks: Vec<bytes::Bytes>) -> watson_stt::Result<()> {
//! let session = StreamingTranscriptionSession::new(
//!     Arc::new(WebSocketTransport::default()),
//!     Arc::new(IamTokenProvider::new("apikey")?),
//!     SessionOptions::default(),
//! );
//!
//! let mut settings = RecognitionSettings::new(AudioFormat::Wav);
//! settings.interim_results = Some(true);
//! let (handle, mut events) = session.start(settings)?;
//!
//! for chunk in audio_chunks {
//!     handle.send_audio(chunk).await?;
//! }
//! handle.stop().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TranscriptEvent::Final { result, .. } = event {
//!         println!("{}", result.best_transcript().unwrap_or(""));
//!     }
//! }
//! let results = handle.finished().await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod error;
pub mod stt;
pub mod transport;

pub use auth::TokenProvider;
pub use error::{Error, Result};
pub use stt::{
    AudioFormat, RecognitionResult, RecognitionSettings, SessionHandle, SessionOptions,
    StreamingTranscriptionSession, TranscriptEvent,
};
pub use transport::{Transport, WebSocketTransport};
