use crate::turn::{HintTicket, TurnSeq};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintStatus {
    Pending,
    Ready,
    Discarded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HintRequest {
    pub ticket: HintTicket,
    pub question: String,
    pub status: HintStatus,
}

/// Bookkeeping for practice-mode hints.
///
/// Holds the practice flag, the epoch that is bumped on every toggle, the
/// latest request and the hint currently on screen. At most one request is
/// pending at a time.
#[derive(Debug, Default)]
pub struct HintBoard {
    practice: bool,
    epoch: u64,
    request: Option<HintRequest>,
    visible: Option<String>,
}

impl HintBoard {
    pub fn new(practice: bool) -> Self {
        Self {
            practice,
            ..Self::default()
        }
    }

    pub fn practice(&self) -> bool {
        self.practice
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn request(&self) -> Option<&HintRequest> {
        self.request.as_ref()
    }

    pub fn visible(&self) -> Option<&str> {
        self.visible.as_deref()
    }

    /// Flips the practice flag. Returns false if the value did not change.
    pub fn set_practice(&mut self, enabled: bool) -> bool {
        if self.practice == enabled {
            return false;
        }
        self.practice = enabled;
        self.epoch += 1;
        if !enabled {
            self.discard_pending();
        }
        true
    }

    /// Opens a request for `question`, superseding any pending one.
    pub fn issue(&mut self, turn: TurnSeq, question: impl Into<String>) -> HintTicket {
        self.discard_pending();
        let ticket = HintTicket {
            turn,
            epoch: self.epoch,
        };
        self.request = Some(HintRequest {
            ticket,
            question: question.into(),
            status: HintStatus::Pending,
        });
        ticket
    }

    fn is_pending(&self, ticket: HintTicket) -> bool {
        self.request
            .as_ref()
            .is_some_and(|r| r.status == HintStatus::Pending && r.ticket == ticket)
    }

    /// Takes a resolved hint. Returns the text to show, or `None` if the
    /// request was superseded, discarded or practice mode is off.
    pub fn accept(&mut self, ticket: HintTicket, text: String) -> Option<String> {
        if !self.practice || ticket.epoch != self.epoch || !self.is_pending(ticket) {
            return None;
        }
        if let Some(request) = self.request.as_mut() {
            request.status = HintStatus::Ready;
        }
        self.visible = Some(text.clone());
        Some(text)
    }

    /// Marks a failed request as discarded. Returns true if it was the pending one.
    pub fn fail(&mut self, ticket: HintTicket) -> bool {
        if !self.is_pending(ticket) {
            return false;
        }
        self.discard_pending();
        true
    }

    fn discard_pending(&mut self) {
        if let Some(request) = self.request.as_mut() {
            if request.status == HintStatus::Pending {
                request.status = HintStatus::Discarded;
            }
        }
    }

    /// Drops the pending request and the visible hint. Returns true if a hint
    /// was on screen and must be cleared.
    pub fn reset(&mut self) -> bool {
        self.discard_pending();
        self.visible.take().is_some()
    }
}
