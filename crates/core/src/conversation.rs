use crate::archive::{MIN_ARCHIVE_UTTERANCES, SessionArchive};
use crate::error::{Capability, CoachError};
use crate::generator::{EMPTY_REPLY_FALLBACK, ModeConfig, Persona, spoken_hint, spoken_reply};
use crate::hint::HintBoard;
use crate::speech::PlaybackEvent;
use crate::transcript::{Speaker, Transcript};
use crate::turn::{HintTicket, ListenTicket, TurnSeq, TurnTagger};
use crate::{Command, Input};
use serde::{Deserialize, Serialize};

/// Consecutive empty or failed captures that are re-armed automatically.
pub const MAX_RECOGNITION_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    AgentSpeaking,
    Listening,
    Thinking,
    /// Generation failed. Waits for `Input::Retry` or `Input::ResumeListening`.
    Errored,
}

/// Transient, user-facing messages. None of them ends the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    /// A device capability is missing; the user has to type or read instead.
    TextMode { capability: Capability },
    /// Capture came back empty or failed and was armed again.
    RecognitionRetry { reason: String },
    /// Automatic re-arming gave up. The user has to press to speak or type.
    PressToSpeak,
    PlaybackFailed { reason: String },
    /// The reply could not be generated. Retry or resume listening.
    GenerationFailed { reason: String },
    /// Input arrived while a reply is pending.
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversationConfig {
    pub mode: ModeConfig,
    pub auto_play: bool,
    pub practice: bool,
    /// Language hint handed to speech capture.
    pub language: String,
    /// Replaces the persona's default greeting.
    pub opening_line: Option<String>,
}

impl ConversationConfig {
    pub fn new(persona: Persona) -> Self {
        Self {
            mode: ModeConfig::new(persona),
            auto_play: true,
            practice: false,
            language: "zh-CN".to_string(),
            opening_line: None,
        }
    }

    pub fn with_practice(mut self, practice: bool) -> Self {
        self.practice = practice;
        self
    }

    pub fn with_auto_play(mut self, auto_play: bool) -> Self {
        self.auto_play = auto_play;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_opening_line(mut self, line: impl Into<String>) -> Self {
        self.opening_line = Some(line.into());
        self
    }
}

/// What the platform can do, as reported by the capability probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub speech_input: bool,
    pub speech_output: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            speech_input: true,
            speech_output: true,
        }
    }

    pub fn text_only() -> Self {
        Self {
            speech_input: false,
            speech_output: false,
        }
    }
}

/// The spoken-turn state machine.
///
/// `Conversation` does no I/O. Every call to [`Conversation::handle`] applies
/// one input synchronously and returns the commands the runtime has to carry
/// out, in order. Results of asynchronous work come back as inputs tagged with
/// the `TurnSeq` (or ticket) they were launched under; anything whose tag no
/// longer matches is dropped.
#[derive(Debug)]
pub struct Conversation {
    config: ConversationConfig,
    capabilities: Capabilities,
    state: ConversationState,
    transcript: Transcript,
    turns: TurnTagger,
    hints: HintBoard,
    capture: Option<ListenTicket>,
    capture_attempts: u32,
    recognition_retries: u32,
}

impl Conversation {
    pub fn new(config: ConversationConfig, capabilities: Capabilities) -> Self {
        let hints = HintBoard::new(config.practice);
        Self {
            config,
            capabilities,
            state: ConversationState::Idle,
            transcript: Transcript::new(),
            turns: TurnTagger::new(),
            hints,
            capture: None,
            capture_attempts: 0,
            recognition_retries: 0,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn current_turn(&self) -> TurnSeq {
        self.turns.current()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn practice(&self) -> bool {
        self.hints.practice()
    }

    pub fn visible_hint(&self) -> Option<&str> {
        self.hints.visible()
    }

    /// True while a speech capture is armed.
    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn handle(&mut self, input: Input) -> Vec<Command> {
        let mut out = Vec::new();
        match input {
            Input::Start => self.start(&mut out),
            Input::UserText(text) => self.user_text(&text, &mut out),
            Input::UserSpeechStarted => self.user_speech_started(&mut out),
            Input::StopListening => self.disarm_capture(&mut out),
            Input::SetPractice(enabled) => self.set_practice(enabled, &mut out),
            Input::SetAutoPlay(enabled) => self.set_auto_play(enabled, &mut out),
            Input::Retry => self.retry(&mut out),
            Input::ResumeListening => self.resume_listening(&mut out),
            Input::End => self.end(&mut out),
            Input::Playback { turn, event } => self.on_playback(turn, event, &mut out),
            Input::Recognition { ticket, result } => self.on_recognition(ticket, result, &mut out),
            Input::Generation { turn, result } => self.on_generation(turn, result, &mut out),
            Input::Hint { ticket, result } => self.on_hint(ticket, result, &mut out),
        }
        out
    }

    fn transition(&mut self, next: ConversationState, out: &mut Vec<Command>) {
        if self.state == next {
            return;
        }
        tracing::debug!("{:?} -> {:?} (turn {})", self.state, next, self.turns.current());
        self.state = next;
        out.push(Command::StateChanged(next));
    }

    fn start(&mut self, out: &mut Vec<Command>) {
        if self.state != ConversationState::Idle {
            tracing::debug!("Session already running, ignoring start");
            return;
        }

        self.transcript = Transcript::new();
        self.recognition_retries = 0;
        let turn = self.turns.advance();
        tracing::info!("Starting {} session", self.config.mode.persona);

        if !self.capabilities.speech_output {
            out.push(Command::Notify(Notice::TextMode {
                capability: Capability::SpeechOutput,
            }));
        }
        if !self.capabilities.speech_input {
            out.push(Command::Notify(Notice::TextMode {
                capability: Capability::SpeechInput,
            }));
        }

        let opening = self
            .config
            .opening_line
            .clone()
            .unwrap_or_else(|| self.config.mode.persona.opening_line().to_string());
        self.agent_says(turn, opening, out);
    }

    fn agent_says(&mut self, turn: TurnSeq, text: String, out: &mut Vec<Command>) {
        let utterance = self.transcript.append(turn, Speaker::Agent, text.clone()).clone();
        out.push(Command::Show(utterance));

        if self.config.auto_play && self.capabilities.speech_output {
            self.transition(ConversationState::AgentSpeaking, out);
            out.push(Command::Speak { turn, text });
        } else {
            self.enter_listening(out);
        }
    }

    fn enter_listening(&mut self, out: &mut Vec<Command>) {
        self.transition(ConversationState::Listening, out);
        self.recognition_retries = 0;
        if self.capabilities.speech_input {
            self.arm_capture(out);
        }
        self.request_hint(out);
    }

    fn arm_capture(&mut self, out: &mut Vec<Command>) {
        self.capture_attempts += 1;
        let ticket = ListenTicket {
            turn: self.turns.current(),
            attempt: self.capture_attempts,
        };
        self.capture = Some(ticket);
        out.push(Command::Listen(ticket));
    }

    fn disarm_capture(&mut self, out: &mut Vec<Command>) {
        if self.capture.take().is_some() {
            out.push(Command::StopListening);
        }
    }

    fn request_hint(&mut self, out: &mut Vec<Command>) {
        if !self.hints.practice() || !self.config.mode.persona.is_interview() {
            return;
        }
        let Some(question) = self.transcript.last_agent_line().map(str::to_string) else {
            return;
        };
        let ticket = self.hints.issue(self.turns.current(), question.clone());
        out.push(Command::RequestHint { ticket, question });
    }

    fn clear_hint(&mut self, out: &mut Vec<Command>) {
        if self.hints.reset() {
            out.push(Command::ClearHint);
        }
    }

    fn user_text(&mut self, text: &str, out: &mut Vec<Command>) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        match self.state {
            ConversationState::AgentSpeaking => {
                out.push(Command::CancelSpeech);
                self.accept_user_line(text, out);
            }
            ConversationState::Listening => {
                self.disarm_capture(out);
                self.accept_user_line(text, out);
            }
            ConversationState::Thinking | ConversationState::Errored => {
                out.push(Command::Notify(Notice::Busy));
            }
            ConversationState::Idle => tracing::debug!("No session running, ignoring typed input"),
        }
    }

    fn accept_user_line(&mut self, text: &str, out: &mut Vec<Command>) {
        self.clear_hint(out);
        let utterance = self
            .transcript
            .append(self.turns.current(), Speaker::User, text)
            .clone();
        out.push(Command::Show(utterance));
        self.begin_generation(out);
    }

    fn begin_generation(&mut self, out: &mut Vec<Command>) {
        let turn = self.turns.advance();
        self.transition(ConversationState::Thinking, out);
        out.push(Command::Generate {
            turn,
            history: self.transcript.utterances().to_vec(),
            mode: self.config.mode.clone(),
        });
    }

    fn user_speech_started(&mut self, out: &mut Vec<Command>) {
        match self.state {
            ConversationState::AgentSpeaking => {
                out.push(Command::CancelSpeech);
                if !self.capabilities.speech_input {
                    out.push(Command::Notify(Notice::TextMode {
                        capability: Capability::SpeechInput,
                    }));
                }
                self.enter_listening(out);
            }
            ConversationState::Listening if self.capture.is_none() => {
                if self.capabilities.speech_input {
                    self.recognition_retries = 0;
                    self.arm_capture(out);
                } else {
                    out.push(Command::Notify(Notice::TextMode {
                        capability: Capability::SpeechInput,
                    }));
                }
            }
            _ => {}
        }
    }

    fn set_practice(&mut self, enabled: bool, out: &mut Vec<Command>) {
        if !self.hints.set_practice(enabled) {
            return;
        }
        tracing::debug!("Practice mode {}", if enabled { "on" } else { "off" });
        if !enabled {
            self.clear_hint(out);
        } else if self.state == ConversationState::Listening {
            self.request_hint(out);
        }
    }

    fn set_auto_play(&mut self, enabled: bool, out: &mut Vec<Command>) {
        if self.config.auto_play == enabled {
            return;
        }
        self.config.auto_play = enabled;
        if !enabled && self.state == ConversationState::AgentSpeaking {
            out.push(Command::CancelSpeech);
            self.enter_listening(out);
        }
    }

    fn retry(&mut self, out: &mut Vec<Command>) {
        if self.state != ConversationState::Errored {
            return;
        }
        tracing::info!("Retrying reply generation");
        self.begin_generation(out);
    }

    fn resume_listening(&mut self, out: &mut Vec<Command>) {
        if self.state != ConversationState::Errored {
            return;
        }
        let turn = self.turns.current();
        self.agent_says(turn, EMPTY_REPLY_FALLBACK.to_string(), out);
    }

    fn end(&mut self, out: &mut Vec<Command>) {
        if self.state == ConversationState::Idle {
            return;
        }
        if self.state == ConversationState::AgentSpeaking {
            out.push(Command::CancelSpeech);
        }
        self.disarm_capture(out);
        self.clear_hint(out);
        let last = self.turns.advance();
        self.transition(ConversationState::Idle, out);
        tracing::info!("Session ended at turn {last} with {} utterances", self.transcript.len());

        if self.transcript.len() >= MIN_ARCHIVE_UTTERANCES {
            out.push(Command::Archive(SessionArchive::new(
                self.config.mode.persona,
                self.transcript.clone(),
            )));
        }
        out.push(Command::SessionEnded);
    }

    fn on_playback(&mut self, turn: TurnSeq, event: PlaybackEvent, out: &mut Vec<Command>) {
        if !self.turns.is_current(turn) || self.state != ConversationState::AgentSpeaking {
            tracing::trace!("Dropping stale playback event {event:?} for turn {turn}");
            return;
        }
        match event {
            PlaybackEvent::Started => tracing::debug!("Playback started for turn {turn}"),
            PlaybackEvent::Ended | PlaybackEvent::Cancelled => self.enter_listening(out),
            PlaybackEvent::Failed(err) => {
                tracing::warn!("{err}");
                out.push(Command::Notify(Notice::PlaybackFailed {
                    reason: err.to_string(),
                }));
                self.enter_listening(out);
            }
        }
    }

    fn on_recognition(
        &mut self,
        ticket: ListenTicket,
        result: Result<String, CoachError>,
        out: &mut Vec<Command>,
    ) {
        if self.capture != Some(ticket)
            || !self.turns.is_current(ticket.turn)
            || self.state != ConversationState::Listening
        {
            tracing::trace!("Dropping stale recognition result for {ticket:?}");
            return;
        }
        self.capture = None;

        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.recognition_retries = 0;
                self.accept_user_line(text.trim(), out);
            }
            Ok(_) => self.recognition_missed("nothing was recognized".to_string(), out),
            Err(CoachError::CapabilityUnavailable(capability)) => {
                tracing::warn!("{capability} went away, switching to typed input");
                self.capabilities.speech_input = false;
                out.push(Command::Notify(Notice::TextMode { capability }));
            }
            Err(err) => self.recognition_missed(err.to_string(), out),
        }
    }

    fn recognition_missed(&mut self, reason: String, out: &mut Vec<Command>) {
        tracing::warn!("Recognition missed: {reason}");
        if self.recognition_retries < MAX_RECOGNITION_RETRIES {
            self.recognition_retries += 1;
            out.push(Command::Notify(Notice::RecognitionRetry { reason }));
            self.arm_capture(out);
        } else {
            out.push(Command::Notify(Notice::PressToSpeak));
        }
    }

    fn on_generation(&mut self, turn: TurnSeq, result: Result<String, CoachError>, out: &mut Vec<Command>) {
        if !self.turns.is_current(turn) || self.state != ConversationState::Thinking {
            tracing::trace!("Dropping stale generation result for turn {turn}");
            return;
        }
        match result {
            Ok(raw) => {
                let reply = spoken_reply(&raw, &self.config.mode);
                self.agent_says(turn, reply, out);
            }
            Err(err) => {
                tracing::warn!("{err}");
                self.transition(ConversationState::Errored, out);
                out.push(Command::Notify(Notice::GenerationFailed {
                    reason: err.to_string(),
                }));
            }
        }
    }

    fn on_hint(&mut self, ticket: HintTicket, result: Result<String, CoachError>, out: &mut Vec<Command>) {
        if !self.turns.is_current(ticket.turn) || self.state != ConversationState::Listening {
            self.hints.fail(ticket);
            tracing::trace!("Dropping hint for turn {}", ticket.turn);
            return;
        }
        match result {
            Ok(raw) => match self.hints.accept(ticket, spoken_hint(&raw)) {
                Some(text) => out.push(Command::ShowHint(text)),
                None => tracing::trace!("Dropping superseded hint for turn {}", ticket.turn),
            },
            Err(err) => {
                if self.hints.fail(ticket) {
                    tracing::debug!("No hint this turn: {err}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Speaker::{Agent, User};

    const INTRO: &str = "请先做一个简短的自我介绍";

    fn conversation(config: ConversationConfig) -> Conversation {
        Conversation::new(config.with_opening_line(INTRO), Capabilities::full())
    }

    fn speak_turn(commands: &[Command]) -> TurnSeq {
        commands
            .iter()
            .find_map(|c| match c {
                Command::Speak { turn, .. } => Some(*turn),
                _ => None,
            })
            .expect("no Speak command")
    }

    fn listen_ticket(commands: &[Command]) -> ListenTicket {
        commands
            .iter()
            .find_map(|c| match c {
                Command::Listen(ticket) => Some(*ticket),
                _ => None,
            })
            .expect("no Listen command")
    }

    fn generate_turn(commands: &[Command]) -> TurnSeq {
        commands
            .iter()
            .find_map(|c| match c {
                Command::Generate { turn, .. } => Some(*turn),
                _ => None,
            })
            .expect("no Generate command")
    }

    fn hint_ticket(commands: &[Command]) -> HintTicket {
        commands
            .iter()
            .find_map(|c| match c {
                Command::RequestHint { ticket, .. } => Some(*ticket),
                _ => None,
            })
            .expect("no RequestHint command")
    }

    fn finish_playback(conv: &mut Conversation, turn: TurnSeq) -> Vec<Command> {
        conv.handle(Input::Playback {
            turn,
            event: PlaybackEvent::Ended,
        })
    }

    fn recognize(conv: &mut Conversation, ticket: ListenTicket, text: &str) -> Vec<Command> {
        conv.handle(Input::Recognition {
            ticket,
            result: Ok(text.to_string()),
        })
    }

    /// Runs the session up to the point where the agent's opening line has
    /// been spoken and capture is armed.
    fn listening(conv: &mut Conversation) -> Vec<Command> {
        let started = conv.handle(Input::Start);
        finish_playback(conv, speak_turn(&started))
    }

    #[test]
    fn start_speaks_opening_line() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let commands = conv.handle(Input::Start);

        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
        assert_eq!(conv.current_turn(), TurnSeq::new(1));
        assert!(matches!(&commands[0], Command::Show(u) if u.speaker() == Agent && u.text() == INTRO));
        assert_eq!(commands[1], Command::StateChanged(ConversationState::AgentSpeaking));
        assert_eq!(
            commands[2],
            Command::Speak {
                turn: TurnSeq::new(1),
                text: INTRO.to_string()
            }
        );
    }

    #[test]
    fn default_opening_line_follows_persona() {
        let mut conv = Conversation::new(ConversationConfig::new(Persona::Open), Capabilities::full());
        conv.handle(Input::Start);
        assert_eq!(conv.transcript().last_agent_line(), Some(Persona::Open.opening_line()));
    }

    #[test]
    fn start_twice_is_ignored() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        conv.handle(Input::Start);
        assert!(conv.handle(Input::Start).is_empty());
        assert_eq!(conv.transcript().len(), 1);
    }

    #[test]
    fn full_turn_cycle() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let commands = listening(&mut conv);
        assert_eq!(conv.state(), ConversationState::Listening);

        let commands = recognize(&mut conv, listen_ticket(&commands), "我叫小明");
        assert_eq!(conv.state(), ConversationState::Thinking);
        let turn = generate_turn(&commands);
        assert_eq!(turn, TurnSeq::new(2));

        let history = commands
            .iter()
            .find_map(|c| match c {
                Command::Generate { history, .. } => Some(history.clone()),
                _ => None,
            })
            .unwrap();
        let lines: Vec<_> = history.iter().map(|u| (u.speaker(), u.text())).collect();
        assert_eq!(lines, vec![(Agent, INTRO), (User, "我叫小明")]);

        let commands = conv.handle(Input::Generation {
            turn,
            result: Ok("谢谢，接下来介绍一下你的项目经历".to_string()),
        });
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
        assert_eq!(conv.transcript().len(), 3);
        assert_eq!(conv.transcript().speakers(), vec![Agent, User, Agent]);

        finish_playback(&mut conv, speak_turn(&commands));
        assert_eq!(conv.state(), ConversationState::Listening);
    }

    #[test]
    fn speakers_alternate_over_many_turns() {
        let mut conv = conversation(ConversationConfig::new(Persona::Technical));
        let mut commands = listening(&mut conv);

        for round in 0..4 {
            let reply = recognize(&mut conv, listen_ticket(&commands), &format!("回答 {round}"));
            let spoken = conv.handle(Input::Generation {
                turn: generate_turn(&reply),
                result: Ok(format!("问题 {round}")),
            });
            commands = finish_playback(&mut conv, speak_turn(&spoken));
        }

        assert_eq!(conv.transcript().len(), 9);
        assert!(conv.transcript().is_alternating());
    }

    #[test]
    fn generated_reply_is_clamped_for_speech() {
        let mut config = ConversationConfig::new(Persona::Open);
        config.mode.max_reply_chars = 9;
        let mut conv = conversation(config);
        let commands = listening(&mut conv);
        let commands = recognize(&mut conv, listen_ticket(&commands), "我想聊聊实习");

        conv.handle(Input::Generation {
            turn: generate_turn(&commands),
            result: Ok("- 好的。\n- 先说说你在实习中遇到的最大挑战是什么吧。".to_string()),
        });
        assert_eq!(conv.transcript().last_agent_line(), Some("好的。"));
    }

    #[test]
    fn stale_playback_end_is_ignored() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let started = conv.handle(Input::Start);
        let first_turn = speak_turn(&started);

        // Interrupt, then let the cancelled utterance report its end late.
        let commands = conv.handle(Input::UserText("我叫小明".into()));
        assert_eq!(conv.state(), ConversationState::Thinking);
        let late = finish_playback(&mut conv, first_turn);
        assert!(late.is_empty());
        assert_eq!(conv.state(), ConversationState::Thinking);

        let spoken = conv.handle(Input::Generation {
            turn: generate_turn(&commands),
            result: Ok("谢谢".into()),
        });
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
        let cancelled = conv.handle(Input::Playback {
            turn: first_turn,
            event: PlaybackEvent::Cancelled,
        });
        assert!(cancelled.is_empty());
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);

        finish_playback(&mut conv, speak_turn(&spoken));
        assert_eq!(conv.state(), ConversationState::Listening);
    }

    #[test]
    fn stale_generation_result_is_ignored() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let commands = listening(&mut conv);
        let commands = recognize(&mut conv, listen_ticket(&commands), "我叫小明");
        let turn = generate_turn(&commands);

        conv.handle(Input::End);
        let late = conv.handle(Input::Generation {
            turn,
            result: Ok("谢谢".into()),
        });
        assert!(late.is_empty());
        assert_eq!(conv.transcript().len(), 2);
        assert_eq!(conv.state(), ConversationState::Idle);
    }

    #[test]
    fn typed_input_interrupts_playback_in_same_step() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        conv.handle(Input::Start);

        let commands = conv.handle(Input::UserText("  我叫小明 ".into()));
        assert_eq!(commands[0], Command::CancelSpeech);
        assert!(commands.contains(&Command::StateChanged(ConversationState::Thinking)));
        assert_eq!(conv.state(), ConversationState::Thinking);
        assert_eq!(conv.transcript().utterances()[1].text(), "我叫小明");
    }

    #[test]
    fn barge_in_cancels_playback_and_listens() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        conv.handle(Input::Start);

        let commands = conv.handle(Input::UserSpeechStarted);
        assert_eq!(commands[0], Command::CancelSpeech);
        assert_eq!(conv.state(), ConversationState::Listening);
        let ticket = listen_ticket(&commands);
        assert_eq!(ticket.turn, TurnSeq::new(1));

        // The cancelled utterance still reports; nothing happens.
        let late = conv.handle(Input::Playback {
            turn: TurnSeq::new(1),
            event: PlaybackEvent::Cancelled,
        });
        assert!(late.is_empty());
        assert!(conv.is_capturing());
    }

    #[test]
    fn typed_input_while_listening_stops_capture() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let commands = listening(&mut conv);
        let ticket = listen_ticket(&commands);

        let commands = conv.handle(Input::UserText("我叫小明".into()));
        assert_eq!(commands[0], Command::StopListening);
        assert!(!conv.is_capturing());

        // The capture that was stopped still delivers something.
        assert!(recognize(&mut conv, ticket, "我叫").is_empty());
        assert_eq!(conv.transcript().len(), 2);
    }

    #[test]
    fn typed_input_while_thinking_is_busy() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        conv.handle(Input::Start);
        conv.handle(Input::UserText("我叫小明".into()));

        let commands = conv.handle(Input::UserText("还有一点".into()));
        assert_eq!(commands, vec![Command::Notify(Notice::Busy)]);
        assert_eq!(conv.transcript().len(), 2);
    }

    #[test]
    fn empty_text_and_idle_input_are_ignored() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        assert!(conv.handle(Input::UserText("你好".into())).is_empty());
        conv.handle(Input::Start);
        assert!(conv.handle(Input::UserText("   ".into())).is_empty());
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
    }

    #[test]
    fn empty_recognition_rearms_then_gives_up() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let mut ticket = listen_ticket(&listening(&mut conv));

        for _ in 0..MAX_RECOGNITION_RETRIES {
            let commands = recognize(&mut conv, ticket, "  ");
            assert!(matches!(commands[0], Command::Notify(Notice::RecognitionRetry { .. })));
            let next = listen_ticket(&commands);
            assert!(next.attempt > ticket.attempt);
            ticket = next;
            assert_eq!(conv.state(), ConversationState::Listening);
        }

        let commands = conv.handle(Input::Recognition {
            ticket,
            result: Err(CoachError::recognition("no-speech")),
        });
        assert_eq!(commands, vec![Command::Notify(Notice::PressToSpeak)]);
        assert_eq!(conv.state(), ConversationState::Listening);
        assert!(!conv.is_capturing());

        // Pressing to speak arms a fresh capture with a fresh retry budget.
        let commands = conv.handle(Input::UserSpeechStarted);
        let ticket = listen_ticket(&commands);
        let commands = recognize(&mut conv, ticket, "");
        assert!(matches!(commands[0], Command::Notify(Notice::RecognitionRetry { .. })));
    }

    #[test]
    fn old_capture_ticket_is_rejected() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let first = listen_ticket(&listening(&mut conv));

        conv.handle(Input::StopListening);
        let second = listen_ticket(&conv.handle(Input::UserSpeechStarted));
        assert_ne!(first, second);

        assert!(recognize(&mut conv, first, "旧的").is_empty());
        recognize(&mut conv, second, "新的");
        assert_eq!(conv.transcript().utterances()[1].text(), "新的");
    }

    #[test]
    fn missing_microphone_switches_to_text_mode() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let ticket = listen_ticket(&listening(&mut conv));

        let commands = conv.handle(Input::Recognition {
            ticket,
            result: Err(CoachError::CapabilityUnavailable(Capability::SpeechInput)),
        });
        assert_eq!(
            commands,
            vec![Command::Notify(Notice::TextMode {
                capability: Capability::SpeechInput
            })]
        );
        assert!(!conv.capabilities().speech_input);
        assert_eq!(conv.state(), ConversationState::Listening);

        let commands = conv.handle(Input::UserSpeechStarted);
        assert!(matches!(commands[0], Command::Notify(Notice::TextMode { .. })));
        conv.handle(Input::UserText("我叫小明".into()));
        assert_eq!(conv.state(), ConversationState::Thinking);
    }

    #[test]
    fn text_only_platform_degrades_without_speaking() {
        let mut conv = Conversation::new(
            ConversationConfig::new(Persona::Behavioral).with_opening_line(INTRO),
            Capabilities::text_only(),
        );
        let commands = conv.handle(Input::Start);

        assert!(commands.contains(&Command::Notify(Notice::TextMode {
            capability: Capability::SpeechOutput
        })));
        assert!(!commands.iter().any(|c| matches!(c, Command::Speak { .. } | Command::Listen(_))));
        assert_eq!(conv.state(), ConversationState::Listening);

        let commands = conv.handle(Input::UserText("我叫小明".into()));
        conv.handle(Input::Generation {
            turn: generate_turn(&commands),
            result: Ok("谢谢".into()),
        });
        assert_eq!(conv.state(), ConversationState::Listening);
        assert_eq!(conv.transcript().len(), 3);
    }

    #[test]
    fn auto_play_off_skips_speaking() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_auto_play(false));
        let commands = conv.handle(Input::Start);

        assert!(!commands.iter().any(|c| matches!(c, Command::Speak { .. })));
        assert_eq!(conv.state(), ConversationState::Listening);
        assert_eq!(listen_ticket(&commands).turn, TurnSeq::new(1));
    }

    #[test]
    fn turning_auto_play_off_stops_playback() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        conv.handle(Input::Start);

        let commands = conv.handle(Input::SetAutoPlay(false));
        assert_eq!(commands[0], Command::CancelSpeech);
        assert_eq!(conv.state(), ConversationState::Listening);
        assert!(conv.handle(Input::SetAutoPlay(false)).is_empty());
    }

    #[test]
    fn playback_failure_proceeds_to_listening() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let turn = speak_turn(&conv.handle(Input::Start));

        let commands = conv.handle(Input::Playback {
            turn,
            event: PlaybackEvent::Failed(CoachError::playback("synthesis-failed")),
        });
        assert!(matches!(commands[0], Command::Notify(Notice::PlaybackFailed { .. })));
        assert_eq!(conv.state(), ConversationState::Listening);
        listen_ticket(&commands);
    }

    #[test]
    fn playback_started_changes_nothing() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let turn = speak_turn(&conv.handle(Input::Start));
        let commands = conv.handle(Input::Playback {
            turn,
            event: PlaybackEvent::Started,
        });
        assert!(commands.is_empty());
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
    }

    #[test]
    fn generation_failure_then_retry() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let ticket = listen_ticket(&listening(&mut conv));
        let failed_turn = generate_turn(&recognize(&mut conv, ticket, "我叫小明"));

        let commands = conv.handle(Input::Generation {
            turn: failed_turn,
            result: Err(CoachError::generation("timeout")),
        });
        assert_eq!(conv.state(), ConversationState::Errored);
        assert!(matches!(&commands[1], Command::Notify(Notice::GenerationFailed { reason }) if reason.contains("timeout")));

        let commands = conv.handle(Input::Retry);
        let retry_turn = generate_turn(&commands);
        assert!(retry_turn > failed_turn);
        assert_eq!(conv.state(), ConversationState::Thinking);

        // A late answer to the failed attempt does not count.
        assert!(conv
            .handle(Input::Generation {
                turn: failed_turn,
                result: Ok("迟到的回复".into())
            })
            .is_empty());

        conv.handle(Input::Generation {
            turn: retry_turn,
            result: Ok("谢谢".into()),
        });
        assert_eq!(conv.state(), ConversationState::AgentSpeaking);
        assert!(conv.transcript().is_alternating());
    }

    #[test]
    fn generation_failure_then_resume_listening() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let ticket = listen_ticket(&listening(&mut conv));
        let turn = generate_turn(&recognize(&mut conv, ticket, "我叫小明"));
        conv.handle(Input::Generation {
            turn,
            result: Err(CoachError::generation("503")),
        });

        assert_eq!(conv.handle(Input::UserText("喂？".into())), vec![Command::Notify(Notice::Busy)]);

        let commands = conv.handle(Input::ResumeListening);
        assert_eq!(conv.transcript().last_agent_line(), Some(EMPTY_REPLY_FALLBACK));
        finish_playback(&mut conv, speak_turn(&commands));
        assert_eq!(conv.state(), ConversationState::Listening);
        assert!(conv.transcript().is_alternating());
    }

    #[test]
    fn retry_outside_errored_is_ignored() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        listening(&mut conv);
        assert!(conv.handle(Input::Retry).is_empty());
        assert!(conv.handle(Input::ResumeListening).is_empty());
    }

    #[test]
    fn hint_is_shown_then_cleared_when_user_speaks() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let commands = listening(&mut conv);

        let request = commands
            .iter()
            .find_map(|c| match c {
                Command::RequestHint { question, .. } => Some(question.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(request, INTRO);

        let shown = conv.handle(Input::Hint {
            ticket: hint_ticket(&commands),
            result: Ok("提示：用STAR结构回答".into()),
        });
        assert_eq!(shown, vec![Command::ShowHint("提示：用STAR结构回答".into())]);
        assert_eq!(conv.visible_hint(), Some("提示：用STAR结构回答"));

        let commands = recognize(&mut conv, listen_ticket(&commands), "我叫小明");
        assert_eq!(commands[0], Command::ClearHint);
        assert_eq!(conv.visible_hint(), None);
    }

    #[test]
    fn hint_after_turn_advanced_is_discarded() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let commands = listening(&mut conv);
        let ticket = hint_ticket(&commands);

        recognize(&mut conv, listen_ticket(&commands), "我叫小明");
        let late = conv.handle(Input::Hint {
            ticket,
            result: Ok("提示：用STAR结构回答".into()),
        });
        assert!(late.is_empty());
        assert_eq!(conv.visible_hint(), None);
    }

    #[test]
    fn hint_after_practice_turned_off_is_discarded() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let ticket = hint_ticket(&listening(&mut conv));

        conv.handle(Input::SetPractice(false));
        let late = conv.handle(Input::Hint {
            ticket,
            result: Ok("提示".into()),
        });
        assert!(late.is_empty());

        // Turning it back on asks again; the old answer still does not count.
        let commands = conv.handle(Input::SetPractice(true));
        let fresh = hint_ticket(&commands);
        assert_ne!(fresh, ticket);
        assert!(conv
            .handle(Input::Hint {
                ticket,
                result: Ok("提示".into())
            })
            .is_empty());
        assert_eq!(
            conv.handle(Input::Hint {
                ticket: fresh,
                result: Ok("新提示".into())
            }),
            vec![Command::ShowHint("新提示".into())]
        );
    }

    #[test]
    fn turning_practice_off_clears_visible_hint() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let ticket = hint_ticket(&listening(&mut conv));
        conv.handle(Input::Hint {
            ticket,
            result: Ok("提示".into()),
        });

        assert_eq!(conv.handle(Input::SetPractice(false)), vec![Command::ClearHint]);
        assert!(!conv.practice());
    }

    #[test]
    fn failed_hint_is_silent() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let ticket = hint_ticket(&listening(&mut conv));
        let commands = conv.handle(Input::Hint {
            ticket,
            result: Err(CoachError::generation("quota")),
        });
        assert!(commands.is_empty());
        assert_eq!(conv.state(), ConversationState::Listening);
    }

    #[test]
    fn empty_hint_uses_fallback() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let ticket = hint_ticket(&listening(&mut conv));
        let commands = conv.handle(Input::Hint {
            ticket,
            result: Ok(" ".into()),
        });
        assert_eq!(
            commands,
            vec![Command::ShowHint(crate::generator::EMPTY_HINT_FALLBACK.to_string())]
        );
    }

    #[test]
    fn open_coaching_never_requests_hints() {
        let mut conv = conversation(ConversationConfig::new(Persona::Open).with_practice(true));
        let commands = listening(&mut conv);
        assert!(!commands.iter().any(|c| matches!(c, Command::RequestHint { .. })));
    }

    #[test]
    fn end_tears_everything_down_once() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral).with_practice(true));
        let commands = listening(&mut conv);
        let hint = hint_ticket(&commands);
        let capture = listen_ticket(&commands);
        conv.handle(Input::Hint {
            ticket: hint,
            result: Ok("提示".into()),
        });
        let turn_before = conv.current_turn();

        let commands = conv.handle(Input::End);
        assert_eq!(commands[0], Command::StopListening);
        assert_eq!(commands[1], Command::ClearHint);
        assert_eq!(commands[2], Command::StateChanged(ConversationState::Idle));
        assert_eq!(commands.last(), Some(&Command::SessionEnded));
        assert!(conv.current_turn() > turn_before);

        assert!(conv.handle(Input::End).is_empty());
        assert!(recognize(&mut conv, capture, "迟到").is_empty());
        assert!(finish_playback(&mut conv, turn_before).is_empty());
        assert_eq!(conv.state(), ConversationState::Idle);
    }

    #[test]
    fn end_while_speaking_cancels_playback() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let turn = speak_turn(&conv.handle(Input::Start));

        let commands = conv.handle(Input::End);
        assert_eq!(commands[0], Command::CancelSpeech);
        // One utterance is too short to keep.
        assert!(!commands.iter().any(|c| matches!(c, Command::Archive(_))));
        assert!(conv.handle(Input::Playback { turn, event: PlaybackEvent::Cancelled }).is_empty());
    }

    #[test]
    fn end_archives_transcript_with_title() {
        let mut conv = conversation(ConversationConfig::new(Persona::Technical));
        let ticket = listen_ticket(&listening(&mut conv));
        recognize(&mut conv, ticket, "我做过分布式缓存系统。");

        let commands = conv.handle(Input::End);
        let archive = commands
            .iter()
            .find_map(|c| match c {
                Command::Archive(archive) => Some(archive.clone()),
                _ => None,
            })
            .expect("no Archive command");
        assert_eq!(archive.title, "我做过分布式缓存");
        assert_eq!(archive.persona, Persona::Technical);
        assert_eq!(archive.transcript.len(), 2);
    }

    #[test]
    fn restart_after_end_begins_fresh_transcript() {
        let mut conv = conversation(ConversationConfig::new(Persona::Behavioral));
        let ticket = listen_ticket(&listening(&mut conv));
        recognize(&mut conv, ticket, "我叫小明");
        conv.handle(Input::End);
        let ended_at = conv.current_turn();

        conv.handle(Input::Start);
        assert_eq!(conv.transcript().len(), 1);
        assert!(conv.current_turn() > ended_at);
    }
}
