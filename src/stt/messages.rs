//! Wire message types for the recognize WebSocket protocol.
//!
//! Server frames are JSON discriminated by their top-level key: `state`,
//! `result_index`/`results`, or `error`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A text frame received from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    /// Incremental recognition results.
    Results(ResultsEnvelope),
    /// State notification (`listening` signals readiness).
    State(StateMessage),
    /// Service-reported error.
    Error(ServiceErrorMessage),
}

impl ServerMessage {
    /// Parse a JSON text frame.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Results frame: a changepoint index plus the new or updated results at and
/// after that index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsEnvelope {
    /// Positions below this index are stable and will not change again.
    #[serde(default)]
    pub result_index: usize,
    /// New or updated results starting at `result_index`.
    pub results: Vec<RecognitionResult>,
    /// Non-fatal warnings, e.g. unknown start-frame fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
}

/// One position in the evolving transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Once true, this result will never change again.
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Candidate transcripts, best first.
    pub alternatives: Vec<TranscriptionAlternative>,
    /// Keyword spotting matches, keyed by the client-supplied keyword.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords_result: Option<HashMap<String, Vec<KeywordResult>>>,
    /// Confusion-network entries for acoustically similar words.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_alternatives: Option<Vec<WordAlternativeResults>>,
}

impl RecognitionResult {
    /// Transcript of the best alternative, if any.
    pub fn best_transcript(&self) -> Option<&str> {
        self.alternatives.first().map(|alt| alt.transcript.as_str())
    }
}

/// A candidate transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionAlternative {
    /// Transcribed text.
    pub transcript: String,
    /// Confidence in `[0.0, 1.0]`. Only the top alternative of a final
    /// result carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Per-word `[word, start, end]` times in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Vec<WordTimestamp>>,
    /// Per-word `[word, confidence]` scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_confidence: Option<Vec<WordConfidence>>,
}

/// Word-level timestamp: `(word, start_time, end_time)`.
pub type WordTimestamp = (String, f64, f64);

/// Word-level confidence: `(word, confidence)`.
pub type WordConfidence = (String, f64);

/// A spotted keyword occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordResult {
    /// The word as transcribed.
    pub normalized_text: String,
    /// Start time in seconds.
    pub start_time: f64,
    /// End time in seconds.
    pub end_time: f64,
    /// Match confidence.
    pub confidence: f64,
}

/// Word alternatives at one time span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternativeResults {
    /// Start time in seconds.
    pub start_time: f64,
    /// End time in seconds.
    pub end_time: f64,
    /// Hypotheses for this span.
    pub alternatives: Vec<WordAlternative>,
}

/// A single word hypothesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordAlternative {
    /// Hypothesis confidence.
    pub confidence: f64,
    /// The word.
    pub word: String,
}

/// State notification from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMessage {
    /// The announced state.
    pub state: String,
}

impl StateMessage {
    /// The service finished processing and is ready for a new utterance.
    pub fn is_listening(&self) -> bool {
        self.state == "listening"
    }
}

/// Error frame from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorMessage {
    /// Error description.
    pub error: String,
    /// Error code, when provided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

impl ServiceErrorMessage {
    /// The server closed the session because no audio arrived within the
    /// inactivity timeout. Treated as a normal termination, not a failure.
    pub fn is_inactivity_timeout(&self) -> bool {
        self.error.contains("inactivity")
            || self.error.contains("no speech detected")
            || self.code == Some(408)
    }
}

/// Serialize the `{"action": "stop"}` end-of-audio frame.
pub fn stop_frame() -> String {
    r#"{"action":"stop"}"#.to_string()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listening_message() {
        let msg = ServerMessage::parse(r#"{"state": "listening"}"#).unwrap();
        match msg {
            ServerMessage::State(state) => assert!(state.is_listening()),
            other => panic!("expected state message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_final_results() {
        let json = r#"{
            "result_index": 0,
            "results": [
                {
                    "final": true,
                    "alternatives": [
                        {"transcript": "hello world ", "confidence": 0.95}
                    ]
                }
            ]
        }"#;

        let msg = ServerMessage::parse(json).unwrap();
        match msg {
            ServerMessage::Results(envelope) => {
                assert_eq!(envelope.result_index, 0);
                assert_eq!(envelope.results.len(), 1);
                let result = &envelope.results[0];
                assert!(result.is_final);
                assert_eq!(result.best_transcript(), Some("hello world "));
                assert_eq!(result.alternatives[0].confidence, Some(0.95));
            }
            other => panic!("expected results message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_interim_results_default_index() {
        let json = r#"{
            "results": [
                {"final": false, "alternatives": [{"transcript": "hel"}]}
            ]
        }"#;

        let msg = ServerMessage::parse(json).unwrap();
        match msg {
            ServerMessage::Results(envelope) => {
                assert_eq!(envelope.result_index, 0);
                assert!(!envelope.results[0].is_final);
                assert_eq!(envelope.results[0].alternatives[0].confidence, None);
            }
            other => panic!("expected results message, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_results_with_timestamps_and_word_confidence() {
        let json = r#"{
            "result_index": 2,
            "results": [
                {
                    "final": true,
                    "alternatives": [
                        {
                            "transcript": "hello world",
                            "confidence": 0.9,
                            "timestamps": [["hello", 0.0, 0.5], ["world", 0.6, 1.0]],
                            "word_confidence": [["hello", 0.95], ["world", 0.87]]
                        }
                    ]
                }
            ]
        }"#;

        let msg = ServerMessage::parse(json).unwrap();
        let ServerMessage::Results(envelope) = msg else {
            panic!("expected results message");
        };
        let alt = &envelope.results[0].alternatives[0];
        let timestamps = alt.timestamps.as_ref().unwrap();
        assert_eq!(timestamps[0].0, "hello");
        assert!((timestamps[1].2 - 1.0).abs() < f64::EPSILON);
        let confidences = alt.word_confidence.as_ref().unwrap();
        assert_eq!(confidences[1], ("world".to_string(), 0.87));
    }

    #[test]
    fn test_parse_keyword_spotting_and_word_alternatives() {
        let json = r#"{
            "results": [
                {
                    "final": true,
                    "alternatives": [{"transcript": "tornado warning"}],
                    "keywords_result": {
                        "tornado": [
                            {"normalized_text": "tornado", "start_time": 1.0,
                             "end_time": 1.6, "confidence": 0.98}
                        ]
                    },
                    "word_alternatives": [
                        {
                            "start_time": 1.0,
                            "end_time": 1.6,
                            "alternatives": [
                                {"confidence": 0.98, "word": "tornado"},
                                {"confidence": 0.02, "word": "tomato"}
                            ]
                        }
                    ]
                }
            ]
        }"#;

        let ServerMessage::Results(envelope) = ServerMessage::parse(json).unwrap() else {
            panic!("expected results message");
        };
        let result = &envelope.results[0];
        let spotted = &result.keywords_result.as_ref().unwrap()["tornado"];
        assert_eq!(spotted[0].normalized_text, "tornado");
        assert!((spotted[0].confidence - 0.98).abs() < f64::EPSILON);
        let alternatives = result.word_alternatives.as_ref().unwrap();
        assert_eq!(alternatives[0].alternatives[1].word, "tomato");
    }

    #[test]
    fn test_parse_error_message() {
        let msg = ServerMessage::parse(
            r#"{"error": "unable to transcode data stream audio/wav -> audio/x-float-array"}"#,
        )
        .unwrap();
        match msg {
            ServerMessage::Error(err) => {
                assert!(err.error.contains("unable to transcode"));
                assert!(!err.is_inactivity_timeout());
            }
            other => panic!("expected error message, got {other:?}"),
        }
    }

    #[test]
    fn test_inactivity_timeout_classification() {
        let err = ServiceErrorMessage {
            error: "session timed out due to inactivity".to_string(),
            code: None,
        };
        assert!(err.is_inactivity_timeout());

        let err = ServiceErrorMessage {
            error: "no speech detected for 30s".to_string(),
            code: Some(400),
        };
        assert!(err.is_inactivity_timeout());
    }

    #[test]
    fn test_malformed_frame_is_parse_error() {
        assert!(ServerMessage::parse("not json").is_err());
        // Known JSON with none of the discriminating keys is also rejected.
        assert!(ServerMessage::parse(r#"{"unexpected": true}"#).is_err());
    }

    #[test]
    fn test_stop_frame() {
        let value: serde_json::Value = serde_json::from_str(&stop_frame()).unwrap();
        assert_eq!(value["action"], "stop");
    }
}
