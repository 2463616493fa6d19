//! Streaming speech-to-text over the recognize WebSocket protocol.
//!
//! A session is started from a [`StreamingTranscriptionSession`] with
//! per-request [`RecognitionSettings`]. Audio writes go through the returned
//! [`SessionHandle`]; interim and final transcript updates arrive on the
//! paired event channel, and the handle resolves once with the reconciled
//! results or the single fatal error.

pub mod messages;
pub mod session;
pub mod settings;
pub mod transcript;


pub use messages::{
    KeywordResult, RecognitionResult, ResultsEnvelope, ServerMessage, ServiceErrorMessage,
    StateMessage, TranscriptionAlternative, WordAlternative, WordAlternativeResults,
    WordConfidence, WordTimestamp,
};
pub use session::{
    AuthFailureClassifier, DEFAULT_MAX_RETRIES, DEFAULT_RECOGNIZE_URL, SessionHandle,
    SessionOptions, SessionState, StreamingTranscriptionSession, TranscriptEvent,
    default_auth_classifier,
};
pub use settings::{AudioFormat, RecognitionSettings};
pub use transcript::{Transcript, TranscriptUpdate};
