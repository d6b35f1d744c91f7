use crate::error::CoachError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What a speech capture reports back.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Intermediate text from a continuous recognizer. Not terminal.
    Interim(String),
    /// The recognized utterance. Terminal.
    Final(String),
    /// Capture failed. Terminal.
    Failed(CoachError),
}

impl RecognitionEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RecognitionEvent::Interim(_))
    }
}

/// Lifecycle of a single spoken utterance.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Failed(CoachError),
    /// Synthetic terminal event emitted when playback was cancelled.
    Cancelled,
}

impl PlaybackEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PlaybackEvent::Started)
    }
}

/// A voice-to-text capability.
///
/// Each activation yields a stream that carries at most one terminal event.
/// Platforms without speech recognition report `is_available() == false` and
/// fail `activate` with `CoachError::CapabilityUnavailable`.
#[async_trait]
pub trait SpeechInput: Send {
    fn is_available(&self) -> bool;

    async fn activate(
        &mut self,
        language: &str,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, CoachError>;

    /// Stops any active capture. Safe to call when nothing is active.
    async fn deactivate(&mut self);
}

/// A text-to-speech capability playing one utterance at a time.
///
/// The stream returned by `speak` carries exactly one terminal event, also
/// when playback is cut short by `cancel`.
#[async_trait]
pub trait SpeechOutput: Send {
    fn is_available(&self) -> bool;

    fn voices(&self) -> Vec<VoiceInfo>;

    async fn speak(
        &mut self,
        text: &str,
        voice: &VoiceChoice,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, CoachError>;

    async fn cancel(&mut self);
}

/// A voice offered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceInfo {
    pub name: String,
    pub lang: String,
    /// False for network-backed voices, which tend to sound better.
    #[serde(default = "default_local_service")]
    pub local_service: bool,
    /// The platform's own default voice, usually the plainest one.
    #[serde(default)]
    pub default: bool,
}

fn default_local_service() -> bool {
    true
}

impl VoiceInfo {
    pub fn new(name: impl Into<String>, lang: impl Into<String>, local_service: bool) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            local_service,
            default: false,
        }
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// Voice preferences for agent speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceSettings {
    pub locale: String,
    /// Name fragments of known high quality voices, best first.
    pub preferred_names: Vec<String>,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            locale: "zh-CN".to_string(),
            preferred_names: vec![
                "Google 普通话".to_string(),
                "Microsoft".to_string(),
                "Ting-Ting".to_string(),
            ],
            rate: 1.1,
            pitch: 1.05,
        }
    }
}

/// The resolved voice handed to `SpeechOutput::speak`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceChoice {
    pub voice: Option<VoiceInfo>,
    pub locale: String,
    pub rate: f32,
    pub pitch: f32,
}

impl VoiceSettings {
    pub fn resolve(&self, voices: &[VoiceInfo]) -> VoiceChoice {
        VoiceChoice {
            voice: select_voice(voices, self).cloned(),
            locale: self.locale.clone(),
            rate: self.rate,
            pitch: self.pitch,
        }
    }
}

fn matches_locale(lang: &str, locale: &str) -> bool {
    let lang = lang.to_lowercase();
    locale
        .split(['-', '_'])
        .filter(|part| !part.is_empty())
        .any(|part| lang.contains(&part.to_lowercase()))
}

/// Picks the best voice for `settings.locale`.
///
/// Among the voices for the locale: the first preferred name that matches,
/// then any voice other than the platform default, then any network voice,
/// then the first one available.
pub fn select_voice<'a>(voices: &'a [VoiceInfo], settings: &VoiceSettings) -> Option<&'a VoiceInfo> {
    let candidates: Vec<&VoiceInfo> = voices
        .iter()
        .filter(|v| matches_locale(&v.lang, &settings.locale))
        .collect();

    settings
        .preferred_names
        .iter()
        .find_map(|name| candidates.iter().find(|v| v.name.contains(name.as_str())))
        .or_else(|| candidates.iter().find(|v| !v.default))
        .or_else(|| candidates.iter().find(|v| !v.local_service))
        .or_else(|| candidates.first())
        .copied()
}
