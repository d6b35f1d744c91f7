use crate::generator::Persona;
use crate::transcript::Transcript;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "新对话";
pub const MAX_TITLE_CHARS: usize = 8;
/// Shorter conversations are not worth keeping.
pub const MIN_ARCHIVE_UTTERANCES: usize = 2;

/// Everything handed to the persistence collaborator when a session ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArchive {
    pub title: String,
    pub persona: Persona,
    pub ended_at: DateTime<Utc>,
    pub transcript: Transcript,
}

impl SessionArchive {
    pub fn new(persona: Persona, transcript: Transcript) -> Self {
        Self {
            title: derive_title(&transcript),
            persona,
            ended_at: Utc::now(),
            transcript,
        }
    }
}

/// Receives finished sessions. Storage format is up to the implementation.
#[async_trait]
pub trait Archiver: Send + Sync {
    async fn archive(&self, archive: SessionArchive) -> anyhow::Result<()>;
}

/// Short title from the user's first line: punctuation and whitespace
/// removed, at most `MAX_TITLE_CHARS` characters.
pub fn derive_title(transcript: &Transcript) -> String {
    transcript
        .first_user_line()
        .map(sanitize_title)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TITLE.to_string())
}

pub fn sanitize_title(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .take(MAX_TITLE_CHARS)
        .collect()
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() || "，。！？、；：“”‘’（）《》【】…—·".contains(c)
}
