use crate::turn::TurnSeq;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Agent,
    User,
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Speaker::Agent => write!(f, "agent"),
            Speaker::User => write!(f, "user"),
        }
    }
}

/// Opaque identifier of an utterance, unique within its transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtteranceId(u64);

/// One recorded line of the conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    id: UtteranceId,
    turn: TurnSeq,
    speaker: Speaker,
    text: String,
    created_at: DateTime<Utc>,
}

impl Utterance {
    pub fn id(&self) -> UtteranceId {
        self.id
    }

    pub fn turn(&self) -> TurnSeq {
        self.turn
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Append-only, ordered record of a session's utterances.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    utterances: Vec<Utterance>,
    next_id: u64,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new utterance and returns a reference to it.
    pub fn append(&mut self, turn: TurnSeq, speaker: Speaker, text: impl Into<String>) -> &Utterance {
        let id = UtteranceId(self.next_id);
        self.next_id += 1;
        self.utterances.push(Utterance {
            id,
            turn,
            speaker,
            text: text.into(),
            created_at: Utc::now(),
        });
        &self.utterances[self.utterances.len() - 1]
    }

    pub fn utterances(&self) -> &[Utterance] {
        &self.utterances
    }

    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utterances.is_empty()
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.utterances.last()
    }

    /// The most recent line spoken by the agent, i.e. the question on the table.
    pub fn last_agent_line(&self) -> Option<&str> {
        self.utterances
            .iter()
            .rev()
            .find(|u| u.speaker == Speaker::Agent)
            .map(|u| u.text.as_str())
    }

    pub fn first_user_line(&self) -> Option<&str> {
        self.utterances
            .iter()
            .find(|u| u.speaker == Speaker::User)
            .map(|u| u.text.as_str())
    }

    pub fn speakers(&self) -> Vec<Speaker> {
        self.utterances.iter().map(|u| u.speaker).collect()
    }

    /// True if no two neighbouring utterances share a speaker.
    pub fn is_alternating(&self) -> bool {
        self.utterances
            .windows(2)
            .all(|pair| pair[0].speaker != pair[1].speaker)
    }

    /// Plain `speaker: text` rendering, one utterance per line.
    pub fn render(&self) -> String {
        render_lines(&self.utterances)
    }
}

pub fn render_lines(utterances: &[Utterance]) -> String {
    utterances
        .iter()
        .map(|u| format!("{}: {}", u.speaker, u.text))
        .collect::<Vec<_>>()
        .join("\n")
}
