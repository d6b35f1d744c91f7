use jobmate_core::Input;
use jobmate_core::conversation::{ConversationState, Notice};
use jobmate_core::driver::SessionUpdate;
use jobmate_core::error::{Capability, CoachError};
use jobmate_core::generator::Persona;
use jobmate_core::speech::{PlaybackEvent, RecognitionEvent, VoiceChoice, VoiceInfo};
use jobmate_core::transcript::Utterance;
use serde::{Deserialize, Serialize};

/// Session options and the capability probe sent by the browser when it
/// opens a session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartOptions {
    pub persona: Persona,
    #[serde(default)]
    pub practice: bool,
    #[serde(default = "default_auto_play")]
    pub auto_play: bool,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub speech_input: bool,
    #[serde(default)]
    pub speech_output: bool,
    #[serde(default)]
    pub voices: Vec<VoiceInfo>,
}

fn default_auto_play() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackStatus {
    Started,
    Ended,
    Cancelled,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionStatus {
    Interim,
    Final,
    Error,
    /// The browser has no recognizer after all.
    Unavailable,
}

/// Messages from the browser.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Start(StartOptions),
    Text {
        text: String,
    },
    SpeechStarted,
    StopListening,
    Practice {
        enabled: bool,
    },
    AutoPlay {
        enabled: bool,
    },
    Retry,
    Resume,
    End,
    /// Progress of the `speak` request with the same id.
    Playback {
        id: u64,
        status: PlaybackStatus,
        #[serde(default)]
        message: Option<String>,
    },
    /// Progress of the `listen` request with the same id.
    Recognition {
        id: u64,
        status: RecognitionStatus,
        #[serde(default)]
        text: String,
    },
}

/// Where an incoming message has to go.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Start(StartOptions),
    Session(Input),
    Playback { id: u64, event: PlaybackEvent },
    Recognition { id: u64, event: RecognitionEvent },
}

impl ClientMessage {
    pub fn route(self) -> Route {
        match self {
            ClientMessage::Start(options) => Route::Start(options),
            ClientMessage::Text { text } => Route::Session(Input::UserText(text)),
            ClientMessage::SpeechStarted => Route::Session(Input::UserSpeechStarted),
            ClientMessage::StopListening => Route::Session(Input::StopListening),
            ClientMessage::Practice { enabled } => Route::Session(Input::SetPractice(enabled)),
            ClientMessage::AutoPlay { enabled } => Route::Session(Input::SetAutoPlay(enabled)),
            ClientMessage::Retry => Route::Session(Input::Retry),
            ClientMessage::Resume => Route::Session(Input::ResumeListening),
            ClientMessage::End => Route::Session(Input::End),
            ClientMessage::Playback { id, status, message } => {
                let event = match status {
                    PlaybackStatus::Started => PlaybackEvent::Started,
                    PlaybackStatus::Ended => PlaybackEvent::Ended,
                    PlaybackStatus::Cancelled => PlaybackEvent::Cancelled,
                    PlaybackStatus::Error => {
                        PlaybackEvent::Failed(CoachError::playback(message.unwrap_or_default()))
                    }
                };
                Route::Playback { id, event }
            }
            ClientMessage::Recognition { id, status, text } => {
                let event = match status {
                    RecognitionStatus::Interim => RecognitionEvent::Interim(text),
                    RecognitionStatus::Final => RecognitionEvent::Final(text),
                    RecognitionStatus::Error => RecognitionEvent::Failed(CoachError::recognition(text)),
                    RecognitionStatus::Unavailable => RecognitionEvent::Failed(
                        CoachError::CapabilityUnavailable(Capability::SpeechInput),
                    ),
                };
                Route::Recognition { id, event }
            }
        }
    }
}

/// Messages to the browser.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    State { state: ConversationState },
    Utterance { utterance: Utterance },
    Hint { text: String },
    HintCleared,
    Notice { notice: Notice },
    /// Play `text`. The browser answers with `playback` messages for `id`.
    Speak { id: u64, text: String, voice: VoiceChoice },
    CancelSpeech { id: u64 },
    /// Start a capture. The browser answers with `recognition` messages for `id`.
    Listen { id: u64, language: String },
    StopListening { id: u64 },
    Ended,
    Error { message: String },
}

impl From<SessionUpdate> for ServerMessage {
    fn from(update: SessionUpdate) -> Self {
        match update {
            SessionUpdate::State(state) => ServerMessage::State { state },
            SessionUpdate::Utterance(utterance) => ServerMessage::Utterance { utterance },
            SessionUpdate::Hint(text) => ServerMessage::Hint { text },
            SessionUpdate::HintCleared => ServerMessage::HintCleared,
            SessionUpdate::Notice(notice) => ServerMessage::Notice { notice },
            SessionUpdate::Ended => ServerMessage::Ended,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> ClientMessage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn start_fills_defaults() {
        let msg = parse(json!({ "type": "start", "persona": "technical" }));
        let Route::Start(options) = msg.route() else {
            panic!("expected start");
        };
        assert_eq!(options.persona, Persona::Technical);
        assert!(options.auto_play);
        assert!(!options.practice);
        assert!(!options.speech_input);
        assert!(options.voices.is_empty());
        assert_eq!(options.language, None);
    }

    #[test]
    fn start_with_probe_results() {
        let msg = parse(json!({
            "type": "start",
            "persona": "open",
            "practice": true,
            "auto_play": false,
            "speech_input": true,
            "speech_output": true,
            "voices": [{ "name": "Ting-Ting", "lang": "zh-CN" }]
        }));
        let Route::Start(options) = msg.route() else {
            panic!("expected start");
        };
        assert!(options.practice && !options.auto_play);
        assert!(options.speech_input && options.speech_output);
        assert_eq!(options.voices, vec![VoiceInfo::new("Ting-Ting", "zh-CN", true)]);
    }

    #[test]
    fn user_actions_become_inputs() {
        assert_eq!(
            parse(json!({ "type": "text", "text": "我叫小明" })).route(),
            Route::Session(Input::UserText("我叫小明".into()))
        );
        assert_eq!(
            parse(json!({ "type": "practice", "enabled": true })).route(),
            Route::Session(Input::SetPractice(true))
        );
        assert_eq!(parse(json!({ "type": "resume" })).route(), Route::Session(Input::ResumeListening));
        assert_eq!(parse(json!({ "type": "speech_started" })).route(), Route::Session(Input::UserSpeechStarted));
        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "dance" })).is_err());
    }

    #[test]
    fn device_reports_become_events() {
        assert_eq!(
            parse(json!({ "type": "playback", "id": 3, "status": "error", "message": "audio busy" })).route(),
            Route::Playback {
                id: 3,
                event: PlaybackEvent::Failed(CoachError::PlaybackFailure("audio busy".into()))
            }
        );
        assert_eq!(
            parse(json!({ "type": "recognition", "id": 7, "status": "final", "text": "我叫小明" })).route(),
            Route::Recognition {
                id: 7,
                event: RecognitionEvent::Final("我叫小明".into())
            }
        );
        assert_eq!(
            parse(json!({ "type": "recognition", "id": 8, "status": "unavailable" })).route(),
            Route::Recognition {
                id: 8,
                event: RecognitionEvent::Failed(CoachError::CapabilityUnavailable(Capability::SpeechInput))
            }
        );
    }

    #[test]
    fn server_messages_are_tagged() {
        let state = serde_json::to_value(ServerMessage::from(SessionUpdate::State(ConversationState::AgentSpeaking))).unwrap();
        assert_eq!(state, json!({ "type": "state", "state": "agent_speaking" }));

        let notice = serde_json::to_value(ServerMessage::from(SessionUpdate::Notice(Notice::Busy))).unwrap();
        assert_eq!(notice, json!({ "type": "notice", "notice": { "kind": "busy" } }));

        let listen = serde_json::to_value(ServerMessage::Listen { id: 2, language: "zh-CN".into() }).unwrap();
        assert_eq!(listen, json!({ "type": "listen", "id": 2, "language": "zh-CN" }));

        assert_eq!(serde_json::to_value(ServerMessage::Ended).unwrap(), json!({ "type": "ended" }));
    }
}
