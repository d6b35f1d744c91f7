pub mod archive;
pub mod conversation;
pub mod driver;
pub mod error;
pub mod generator;
pub mod hint;
pub mod speech;
pub mod transcript;
pub mod turn;

use crate::archive::SessionArchive;
use crate::conversation::{ConversationState, Notice};
use crate::error::CoachError;
use crate::generator::ModeConfig;
use crate::speech::PlaybackEvent;
use crate::transcript::Utterance;
use crate::turn::{HintTicket, ListenTicket, TurnSeq};

/// Represents commands that the core logic (`Conversation`) issues to the runtime.
///
/// This enum is the primary API for decoupling the conversation's decisions
/// from the runtime's execution of side effects (speaking, listening, calling
/// the model). Every command that starts asynchronous work carries the tag the
/// result must come back with.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    StateChanged(ConversationState),
    /// A new transcript line to display.
    Show(Utterance),
    Speak { turn: TurnSeq, text: String },
    CancelSpeech,
    Listen(ListenTicket),
    StopListening,
    Generate {
        turn: TurnSeq,
        history: Vec<Utterance>,
        mode: ModeConfig,
    },
    RequestHint { ticket: HintTicket, question: String },
    ShowHint(String),
    ClearHint,
    Notify(Notice),
    Archive(SessionArchive),
    SessionEnded,
}

/// Everything the conversation reacts to: user actions and tagged results of
/// the asynchronous work it started.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Start,
    /// A typed message.
    UserText(String),
    /// The user pressed to talk or started speaking over the agent.
    UserSpeechStarted,
    StopListening,
    SetPractice(bool),
    SetAutoPlay(bool),
    /// Ask the model again after a failed turn.
    Retry,
    /// Give up on a failed turn and go back to listening.
    ResumeListening,
    End,
    Playback {
        turn: TurnSeq,
        event: PlaybackEvent,
    },
    Recognition {
        ticket: ListenTicket,
        result: Result<String, CoachError>,
    },
    Generation {
        turn: TurnSeq,
        result: Result<String, CoachError>,
    },
    Hint {
        ticket: HintTicket,
        result: Result<String, CoachError>,
    },
}
