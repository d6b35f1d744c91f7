use crate::error::CoachError;
use crate::transcript::Utterance;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Said when the model returns nothing, or when the user asks to move on
/// after a failed turn.
pub const EMPTY_REPLY_FALLBACK: &str = "抱歉，我没听清，请您再说一遍？";

/// Shown when the hint model returns nothing.
pub const EMPTY_HINT_FALLBACK: &str = "尝试使用 STAR 原则（情境-任务-行动-结果）来构建你的回答。";

pub const DEFAULT_MAX_REPLY_TOKENS: u32 = 150;
pub const DEFAULT_MAX_REPLY_CHARS: usize = 200;
pub const MAX_HINT_CHARS: usize = 60;

/// Interviewing or coaching style of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    Behavioral,
    Technical,
    Pressure,
    /// Open-ended career coaching chat.
    Open,
}

impl Persona {
    pub fn is_interview(&self) -> bool {
        !matches!(self, Persona::Open)
    }

    /// Key of the system prompt for this persona.
    pub fn prompt_key(&self) -> &'static str {
        match self {
            Persona::Behavioral => "interviewer_behavioral",
            Persona::Technical => "interviewer_technical",
            Persona::Pressure => "interviewer_pressure",
            Persona::Open => "coach_open",
        }
    }

    pub fn opening_line(&self) -> &'static str {
        if self.is_interview() {
            "你好，我是你的面试官。感谢你今天的参与。请先做一个简短的自我介绍吧。"
        } else {
            "你好，我是职伴。最近有什么经历想和我聊聊吗？"
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Persona::Behavioral => "behavioral",
            Persona::Technical => "technical",
            Persona::Pressure => "pressure",
            Persona::Open => "open",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "behavioral" => Ok(Persona::Behavioral),
            "technical" => Ok(Persona::Technical),
            "pressure" => Ok(Persona::Pressure),
            "open" => Ok(Persona::Open),
            other => Err(format!("unknown persona '{other}'")),
        }
    }
}

/// Per-request generation settings, passed explicitly on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfig {
    pub persona: Persona,
    pub max_reply_tokens: u32,
    pub max_reply_chars: usize,
}

impl ModeConfig {
    pub fn new(persona: Persona) -> Self {
        Self {
            persona,
            max_reply_tokens: DEFAULT_MAX_REPLY_TOKENS,
            max_reply_chars: DEFAULT_MAX_REPLY_CHARS,
        }
    }
}

/// Produces the agent's next line from the dialogue so far.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    async fn generate(&self, history: &[Utterance], mode: &ModeConfig) -> Result<String, CoachError>;
}

/// Produces a short advisory hint for an interview question.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait HintGenerator: Send + Sync {
    async fn hint(&self, question: &str) -> Result<String, CoachError>;
}

/// Normalizes a model reply for speaking aloud.
pub fn spoken_reply(raw: &str, mode: &ModeConfig) -> String {
    let flat = flatten(raw);
    if flat.is_empty() {
        return EMPTY_REPLY_FALLBACK.to_string();
    }
    clamp_to_sentence(&flat, mode.max_reply_chars)
}

pub fn spoken_hint(raw: &str) -> String {
    let flat = flatten(raw);
    if flat.is_empty() {
        return EMPTY_HINT_FALLBACK.to_string();
    }
    clamp_to_sentence(&flat, MAX_HINT_CHARS)
}

/// Joins the text into one paragraph and drops Markdown list and heading markers.
fn flatten(raw: &str) -> String {
    raw.lines()
        .map(|line| line.trim().trim_start_matches(['#', '-', '*', '>']).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

const SENTENCE_ENDS: [char; 8] = ['。', '！', '？', '；', '.', '!', '?', ';'];

/// Cuts `text` to at most `max_chars` characters, preferring a sentence end.
fn clamp_to_sentence(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let head: String = text.chars().take(max_chars).collect();
    let cut = head
        .char_indices()
        .filter(|(_, c)| SENTENCE_ENDS.contains(c))
        .map(|(i, c)| i + c.len_utf8())
        .last();

    match cut {
        Some(end) if head[..end].chars().count() >= max_chars / 3 => head[..end].trim().to_string(),
        _ => format!("{}…", head.trim_end()),
    }
}
