//! Per-session recognition settings and pre-flight validation.

use serde_json::json;

use crate::error::{Error, Result};

/// Audio formats accepted by the recognize endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFormat {
    /// FLAC.
    Flac,
    /// MP3.
    Mp3,
    /// MPEG.
    Mpeg,
    /// Linear 16-bit PCM. Raw PCM requires explicit sampling parameters.
    L16 {
        /// Sample rate in Hz.
        rate: u32,
        /// Channel count.
        channels: u32,
    },
    /// WAV.
    Wav,
    /// Ogg container, codec auto-detected.
    Ogg,
    /// Ogg container with Opus codec.
    OggOpus,
    /// Ogg container with Vorbis codec.
    OggVorbis,
    /// WebM container, codec auto-detected.
    Webm,
    /// WebM container with Opus codec.
    WebmOpus,
    /// WebM container with Vorbis codec.
    WebmVorbis,
    /// Mu-law encoded audio.
    Mulaw {
        /// Sample rate in Hz.
        rate: u32,
    },
    /// G.711 a-law / basic audio.
    Basic,
}

impl AudioFormat {
    /// The MIME string sent in the start frame's `content-type` field.
    pub fn mime_type(&self) -> String {
        match self {
            Self::Flac => "audio/flac".to_string(),
            Self::Mp3 => "audio/mp3".to_string(),
            Self::Mpeg => "audio/mpeg".to_string(),
            Self::L16 { rate, channels } => {
                format!("audio/l16;rate={rate};channels={channels}")
            }
            Self::Wav => "audio/wav".to_string(),
            Self::Ogg => "audio/ogg".to_string(),
            Self::OggOpus => "audio/ogg;codecs=opus".to_string(),
            Self::OggVorbis => "audio/ogg;codecs=vorbis".to_string(),
            Self::Webm => "audio/webm".to_string(),
            Self::WebmOpus => "audio/webm;codecs=opus".to_string(),
            Self::WebmVorbis => "audio/webm;codecs=vorbis".to_string(),
            Self::Mulaw { rate } => format!("audio/mulaw;rate={rate}"),
            Self::Basic => "audio/basic".to_string(),
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type())
    }
}

/// Settings for one recognition request. Immutable once the session starts;
/// `None` fields fall back to service defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionSettings {
    /// Format of the audio data. Required.
    pub content_type: AudioFormat,

    /// Seconds of silence after which the service ends the session.
    /// `-1` disables the timeout. Service default is 30.
    pub inactivity_timeout: Option<i32>,

    /// Keyword strings to spot in the input audio.
    pub keywords: Option<Vec<String>>,

    /// Minimum confidence for a keyword match, in `[0.0, 1.0]`. Requires a
    /// non-empty `keywords` list.
    pub keywords_threshold: Option<f64>,

    /// Maximum number of alternative transcripts. Service default is 1.
    pub max_alternatives: Option<u32>,

    /// Receive interim (non-final) results. Service default is false.
    pub interim_results: Option<bool>,

    /// Minimum confidence for a word alternative, in `[0.0, 1.0]`.
    pub word_alternatives_threshold: Option<f64>,

    /// Receive a confidence score per word.
    pub word_confidence: Option<bool>,

    /// Receive per-word start/end times.
    pub timestamps: Option<bool>,

    /// Censor profanity in the output. Service default is true.
    pub profanity_filter: Option<bool>,

    /// Convert dates, times, numbers etc. into conventional representations.
    pub smart_formatting: Option<bool>,

    /// Receive speaker labels per timestamp.
    pub speaker_labels: Option<bool>,

    /// Keep transcribing across multiple utterances instead of stopping at
    /// the first end-of-speech.
    pub continuous: Option<bool>,
}

impl RecognitionSettings {
    /// Settings with the given content type and service defaults elsewhere.
    pub fn new(content_type: AudioFormat) -> Self {
        Self {
            content_type,
            inactivity_timeout: None,
            keywords: None,
            keywords_threshold: None,
            max_alternatives: None,
            interim_results: None,
            word_alternatives_threshold: None,
            word_confidence: None,
            timestamps: None,
            profanity_filter: None,
            smart_formatting: None,
            speaker_labels: None,
            continuous: None,
        }
    }

    /// Pre-flight validation. Violations fail fast before any connection
    /// attempt.
    pub fn validate(&self) -> Result<()> {
        match &self.content_type {
            AudioFormat::L16 { rate, channels } => {
                if *rate == 0 || *channels == 0 {
                    return Err(Error::Configuration(
                        "audio/l16 requires a non-zero rate and channel count".to_string(),
                    ));
                }
            }
            AudioFormat::Mulaw { rate } if *rate == 0 => {
                return Err(Error::Configuration(
                    "audio/mulaw requires a non-zero rate".to_string(),
                ));
            }
            _ => {}
        }

        if let Some(threshold) = self.keywords_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Configuration(format!(
                    "keywords_threshold must be within [0.0, 1.0], got {threshold}"
                )));
            }
            if self.keywords.as_ref().is_none_or(|k| k.is_empty()) {
                return Err(Error::Configuration(
                    "keywords_threshold requires a non-empty keywords list".to_string(),
                ));
            }
        }

        if let Some(threshold) = self.word_alternatives_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(Error::Configuration(format!(
                    "word_alternatives_threshold must be within [0.0, 1.0], got {threshold}"
                )));
            }
        }

        if self.max_alternatives == Some(0) {
            return Err(Error::Configuration(
                "max_alternatives must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the JSON start frame for this request.
    pub(crate) fn start_message(&self) -> serde_json::Value {
        let mut msg = json!({
            "action": "start",
            "content-type": self.content_type.mime_type(),
        });

        if let Some(timeout) = self.inactivity_timeout {
            msg["inactivity_timeout"] = json!(timeout);
        }
        if let Some(ref keywords) = self.keywords {
            msg["keywords"] = json!(keywords);
        }
        if let Some(threshold) = self.keywords_threshold {
            msg["keywords_threshold"] = json!(threshold);
        }
        if let Some(max) = self.max_alternatives {
            msg["max_alternatives"] = json!(max);
        }
        if let Some(interim) = self.interim_results {
            msg["interim_results"] = json!(interim);
        }
        if let Some(threshold) = self.word_alternatives_threshold {
            msg["word_alternatives_threshold"] = json!(threshold);
        }
        if let Some(confidence) = self.word_confidence {
            msg["word_confidence"] = json!(confidence);
        }
        if let Some(timestamps) = self.timestamps {
            msg["timestamps"] = json!(timestamps);
        }
        if let Some(filter) = self.profanity_filter {
            msg["profanity_filter"] = json!(filter);
        }
        if let Some(formatting) = self.smart_formatting {
            msg["smart_formatting"] = json!(formatting);
        }
        if let Some(labels) = self.speaker_labels {
            msg["speaker_labels"] = json!(labels);
        }
        if let Some(continuous) = self.continuous {
            msg["continuous"] = json!(continuous);
        }

        msg
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_types() {
        assert_eq!(AudioFormat::Flac.mime_type(), "audio/flac");
        assert_eq!(AudioFormat::Wav.mime_type(), "audio/wav");
        assert_eq!(
            AudioFormat::L16 {
                rate: 16000,
                channels: 1
            }
            .mime_type(),
            "audio/l16;rate=16000;channels=1"
        );
        assert_eq!(AudioFormat::OggOpus.mime_type(), "audio/ogg;codecs=opus");
        assert_eq!(
            AudioFormat::Mulaw { rate: 8000 }.mime_type(),
            "audio/mulaw;rate=8000"
        );
    }

    #[test]
    fn test_defaults_are_valid() {
        let settings = RecognitionSettings::new(AudioFormat::Wav);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_keywords_threshold_without_keywords_rejected() {
        let mut settings = RecognitionSettings::new(AudioFormat::Flac);
        settings.keywords_threshold = Some(0.75);
        settings.keywords = Some(vec![]);
        assert!(matches!(
            settings.validate(),
            Err(Error::Configuration(_))
        ));

        settings.keywords = None;
        assert!(matches!(
            settings.validate(),
            Err(Error::Configuration(_))
        ));

        // Keywords without a threshold are fine.
        settings.keywords_threshold = None;
        settings.keywords = Some(vec!["tornado".to_string()]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_threshold_range_enforced() {
        let mut settings = RecognitionSettings::new(AudioFormat::Flac);
        settings.keywords = Some(vec!["storm".to_string()]);
        settings.keywords_threshold = Some(1.5);
        assert!(settings.validate().is_err());

        settings.keywords_threshold = Some(0.5);
        settings.word_alternatives_threshold = Some(-0.1);
        assert!(settings.validate().is_err());

        settings.word_alternatives_threshold = Some(0.9);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_max_alternatives_zero_rejected() {
        let mut settings = RecognitionSettings::new(AudioFormat::Wav);
        settings.max_alternatives = Some(0);
        assert!(settings.validate().is_err());
        settings.max_alternatives = Some(1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_raw_pcm_requires_sampling_parameters() {
        let settings = RecognitionSettings::new(AudioFormat::L16 {
            rate: 0,
            channels: 1,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_start_message_contains_only_set_fields() {
        let mut settings = RecognitionSettings::new(AudioFormat::L16 {
            rate: 16000,
            channels: 1,
        });
        settings.interim_results = Some(true);
        settings.timestamps = Some(true);
        settings.keywords = Some(vec!["tornado".to_string(), "storm".to_string()]);
        settings.keywords_threshold = Some(0.75);

        let msg = settings.start_message();
        assert_eq!(msg["action"], "start");
        assert_eq!(msg["content-type"], "audio/l16;rate=16000;channels=1");
        assert_eq!(msg["interim_results"], true);
        assert_eq!(msg["timestamps"], true);
        assert_eq!(msg["keywords_threshold"], 0.75);
        assert_eq!(msg["keywords"][1], "storm");

        // Unset fields must be absent, not null.
        assert!(msg.get("max_alternatives").is_none());
        assert!(msg.get("profanity_filter").is_none());
        assert!(msg.get("continuous").is_none());
    }
}
