//! Terminal stand-ins for the speech adapters.
//!
//! The console "speaks" by typing the agent's line out at roughly speaking
//! pace, so interruption behaves the same as with real audio. A cut-off line
//! is completed at once, so the text stays readable. There is no speech
//! recognition in a terminal; the user types.

use async_trait::async_trait;
use jobmate_core::Input;
use jobmate_core::conversation::{ConversationState, Notice};
use jobmate_core::driver::SessionUpdate;
use jobmate_core::error::{Capability, CoachError};
use jobmate_core::generator::Persona;
use jobmate_core::transcript::Speaker;
use jobmate_core::speech::{PlaybackEvent, RecognitionEvent, SpeechInput, SpeechOutput, VoiceChoice, VoiceInfo};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_CHAR_DELAY: Duration = Duration::from_millis(120);

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;
type TerminalSlot = Arc<Mutex<Option<mpsc::Sender<PlaybackEvent>>>>;

/// How far the typing task got. Checked and updated under one lock per
/// character, so a cancelled line is never typed twice.
#[derive(Debug, Default)]
struct Progress {
    typed: usize,
    done: bool,
}

type SharedProgress = Arc<Mutex<Progress>>;

struct Playback {
    task: JoinHandle<()>,
    terminal: TerminalSlot,
    text: String,
    progress: SharedProgress,
}

impl Playback {
    /// Prints the characters the task did not get to.
    fn print_rest(&self, sink: &Sink) {
        let Ok(mut progress) = self.progress.lock() else {
            return;
        };
        if progress.done {
            return;
        }
        progress.done = true;
        let rest: String = self.text.chars().skip(progress.typed).collect();
        if let Err(e) = write_to(sink, &format!("{rest}\n")) {
            tracing::warn!("Failed to finish cancelled line: {e}");
        }
    }
}

pub struct ConsoleSpeechOutput {
    sink: Sink,
    char_delay: Duration,
    prefix: String,
    playing: Option<Playback>,
}

impl ConsoleSpeechOutput {
    pub fn new(sink: impl Write + Send + 'static, char_delay: Duration) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            char_delay,
            prefix: String::new(),
            playing: None,
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout(), DEFAULT_CHAR_DELAY)
    }

    /// Printed at once before each line, e.g. the speaker's name.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

/// Whoever takes the sender out of the slot delivers the one terminal event.
fn take_terminal(slot: &TerminalSlot) -> Option<mpsc::Sender<PlaybackEvent>> {
    slot.lock().ok().and_then(|mut tx| tx.take())
}

fn write_to(sink: &Sink, text: &str) -> io::Result<()> {
    let mut out = sink.lock().map_err(|_| io::Error::other("console output poisoned"))?;
    out.write_all(text.as_bytes())?;
    out.flush()
}

fn lock_progress(progress: &SharedProgress) -> io::Result<std::sync::MutexGuard<'_, Progress>> {
    progress.lock().map_err(|_| io::Error::other("console progress poisoned"))
}

async fn type_out(
    sink: Sink,
    prefix: String,
    text: String,
    delay: Duration,
    progress: SharedProgress,
) -> io::Result<()> {
    write_to(&sink, &prefix)?;
    let mut buf = [0u8; 4];
    for c in text.chars() {
        {
            let mut progress = lock_progress(&progress)?;
            if progress.done {
                return Ok(());
            }
            write_to(&sink, c.encode_utf8(&mut buf))?;
            progress.typed += 1;
        }
        tokio::time::sleep(delay).await;
    }
    let mut progress = lock_progress(&progress)?;
    if !progress.done {
        progress.done = true;
        write_to(&sink, "\n")?;
    }
    Ok(())
}

#[async_trait]
impl SpeechOutput for ConsoleSpeechOutput {
    fn is_available(&self) -> bool {
        true
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        vec![VoiceInfo::new("Console", "zh-CN", true)]
    }

    async fn speak(&mut self, text: &str, voice: &VoiceChoice) -> Result<mpsc::Receiver<PlaybackEvent>, CoachError> {
        self.cancel().await;

        let delay = self.char_delay.div_f32(voice.rate.max(0.1));
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(PlaybackEvent::Started);
        let terminal: TerminalSlot = Arc::new(Mutex::new(Some(tx)));

        let progress = SharedProgress::default();
        let slot = terminal.clone();
        let sink = self.sink.clone();
        let prefix = self.prefix.clone();
        let line = text.to_string();
        let typing = progress.clone();
        let task = tokio::spawn(async move {
            let event = match type_out(sink, prefix, line, delay, typing).await {
                Ok(()) => PlaybackEvent::Ended,
                Err(e) => PlaybackEvent::Failed(CoachError::playback(e)),
            };
            if let Some(tx) = take_terminal(&slot) {
                let _ = tx.try_send(event);
            }
        });

        self.playing = Some(Playback {
            task,
            terminal,
            text: text.to_string(),
            progress,
        });
        Ok(rx)
    }

    async fn cancel(&mut self) {
        let Some(playback) = self.playing.take() else {
            return;
        };
        playback.task.abort();
        if let Some(tx) = take_terminal(&playback.terminal) {
            playback.print_rest(&self.sink);
            let _ = tx.try_send(PlaybackEvent::Cancelled);
        }
    }
}

/// Speech input for platforms without a recognizer.
#[derive(Debug, Default)]
pub struct UnavailableSpeechInput;

#[async_trait]
impl SpeechInput for UnavailableSpeechInput {
    fn is_available(&self) -> bool {
        false
    }

    async fn activate(&mut self, _language: &str) -> Result<mpsc::Receiver<RecognitionEvent>, CoachError> {
        Err(CoachError::CapabilityUnavailable(Capability::SpeechInput))
    }

    async fn deactivate(&mut self) {}
}

pub const HELP: &str = "输入文字回答。命令：/skip 打断播放  /retry 重试  /resume 跳过失败的回复  \
/practice on|off 答题提示  /autoplay on|off 朗读  /end 结束";

/// Maps a line typed at the prompt to a session input. Blank lines map to nothing.
pub fn parse_line(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok((!line.is_empty()).then(|| Input::UserText(line.to_string())));
    };

    let mut words = command.split_whitespace();
    let name = words.next().unwrap_or_default();
    let switch = |value: Option<&str>| match value {
        Some("on") => Ok(true),
        Some("off") => Ok(false),
        _ => Err(format!("用法：/{name} on|off")),
    };

    let input = match name {
        "skip" => Input::UserSpeechStarted,
        "retry" => Input::Retry,
        "resume" => Input::ResumeListening,
        "end" | "quit" => Input::End,
        "practice" => Input::SetPractice(switch(words.next())?),
        "autoplay" => Input::SetAutoPlay(switch(words.next())?),
        _ => return Err(format!("未知命令：/{name}\n{HELP}")),
    };
    Ok(Some(input))
}

/// The name shown in front of agent lines.
pub fn agent_label(persona: Persona) -> &'static str {
    if persona.is_interview() { "面试官" } else { "职伴" }
}

/// Turns session updates into terminal output.
///
/// Agent lines are held back until it is clear whether the speech output
/// types them; lines that are not spoken are printed when listening starts.
#[derive(Debug)]
pub struct ConsoleView {
    label: &'static str,
    unspoken: Option<String>,
}

impl ConsoleView {
    pub fn new(persona: Persona) -> Self {
        Self {
            label: agent_label(persona),
            unspoken: None,
        }
    }

    pub fn render(&mut self, update: &SessionUpdate) -> Option<String> {
        match update {
            SessionUpdate::Utterance(u) if u.speaker() == Speaker::Agent => {
                self.unspoken = Some(u.text().to_string());
                None
            }
            SessionUpdate::Utterance(_) => None,
            SessionUpdate::State(ConversationState::AgentSpeaking) => {
                self.unspoken = None;
                None
            }
            SessionUpdate::State(ConversationState::Listening) => {
                let line = self.unspoken.take()?;
                Some(format!("{}：{line}", self.label))
            }
            SessionUpdate::State(ConversationState::Thinking) => Some("……".to_string()),
            SessionUpdate::State(_) => None,
            SessionUpdate::Hint(text) => Some(format!("【提示】{text}")),
            SessionUpdate::HintCleared => None,
            SessionUpdate::Notice(notice) => Some(notice_text(notice)),
            SessionUpdate::Ended => Some("对话已结束。".to_string()),
        }
    }
}

fn notice_text(notice: &Notice) -> String {
    match notice {
        Notice::TextMode {
            capability: Capability::SpeechInput,
        } => "（当前环境不支持语音输入，请直接打字回答）".to_string(),
        Notice::TextMode {
            capability: Capability::SpeechOutput,
        } => "（当前环境不支持语音播放，回复将以文字显示）".to_string(),
        Notice::RecognitionRetry { .. } => "（没听清，请再说一遍）".to_string(),
        Notice::PressToSpeak => "（请重新开始说话，或直接输入文字）".to_string(),
        Notice::PlaybackFailed { reason } => format!("（语音播放失败：{reason}）"),
        Notice::GenerationFailed { reason } => {
            format!("（回复生成失败：{reason}。输入 /retry 重试，或 /resume 继续）")
        }
        Notice::Busy => "（请稍等，正在思考……）".to_string(),
    }
}
