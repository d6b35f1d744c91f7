use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonically increasing identifier of an agent turn.
///
/// Every asynchronous operation the session launches is stamped with the
/// `TurnSeq` that was current at launch time. When its result comes back the
/// stamp is compared against the session's current value and the result is
/// ignored if the two differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnSeq(u64);

impl TurnSeq {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TurnSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Owns the current `TurnSeq` and hands out new ones.
#[derive(Debug, Default)]
pub struct TurnTagger {
    current: TurnSeq,
}

impl TurnTagger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> TurnSeq {
        self.current
    }

    /// Starts a new turn and returns its tag.
    pub fn advance(&mut self) -> TurnSeq {
        self.current = TurnSeq(self.current.0 + 1);
        self.current
    }

    /// True if a result tagged with `tag` may still take effect.
    pub fn is_current(&self, tag: TurnSeq) -> bool {
        self.current == tag
    }
}

/// Tag for one speech capture.
///
/// Capture can be stopped and re-armed several times within one turn, so the
/// turn alone does not identify which activation a recognition result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListenTicket {
    pub turn: TurnSeq,
    pub attempt: u32,
}

/// Tag for one hint request: the turn it was asked for and the practice-mode
/// epoch that was in force when it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HintTicket {
    pub turn: TurnSeq,
    pub epoch: u64,
}
