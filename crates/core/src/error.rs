use serde::{Deserialize, Serialize};
use std::fmt;

/// A device capability the conversation can run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SpeechInput,
    SpeechOutput,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::SpeechInput => write!(f, "speech-to-text"),
            Capability::SpeechOutput => write!(f, "text-to-speech"),
        }
    }
}

/// Failures reported by the speech adapters and generators.
///
/// None of these end a session. Results that arrive for a superseded turn are
/// not errors at all and never become one of these variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoachError {
    /// The platform has no microphone or speaker support; fall back to text.
    #[error("{0} is not available on this platform")]
    CapabilityUnavailable(Capability),

    /// Capture produced nothing usable.
    #[error("speech recognition failed: {0}")]
    RecognitionFailure(String),

    /// The remote model call failed.
    #[error("reply generation failed: {0}")]
    GenerationFailure(String),

    /// Synthesis failed; treated like the end of playback.
    #[error("speech playback failed: {0}")]
    PlaybackFailure(String),
}

impl CoachError {
    pub fn generation(err: impl fmt::Display) -> Self {
        CoachError::GenerationFailure(err.to_string())
    }

    pub fn recognition(err: impl fmt::Display) -> Self {
        CoachError::RecognitionFailure(err.to_string())
    }

    pub fn playback(err: impl fmt::Display) -> Self {
        CoachError::PlaybackFailure(err.to_string())
    }
}
