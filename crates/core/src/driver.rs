use crate::archive::Archiver;
use crate::conversation::{Capabilities, Conversation, ConversationConfig, ConversationState, Notice};
use crate::generator::{HintGenerator, TurnGenerator};
use crate::speech::{PlaybackEvent, RecognitionEvent, SpeechInput, SpeechOutput, VoiceSettings};
use crate::transcript::{Transcript, Utterance};
use crate::turn::{ListenTicket, TurnSeq};
use crate::{Command, Input};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The collaborators a session drives. Each session gets its own instances.
pub struct Collaborators {
    pub speech_input: Box<dyn SpeechInput>,
    pub speech_output: Box<dyn SpeechOutput>,
    pub generator: Arc<dyn TurnGenerator>,
    pub hints: Arc<dyn HintGenerator>,
    pub archiver: Arc<dyn Archiver>,
}

/// What a front end needs to render the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    State(ConversationState),
    Utterance(Utterance),
    Hint(String),
    HintCleared,
    Notice(Notice),
    Ended,
}

/// Cloneable sender for user actions.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Input>,
}

impl SessionHandle {
    /// Returns false once the session driver is gone.
    pub fn send(&self, input: Input) -> bool {
        self.tx.send(input).is_ok()
    }

    pub fn say(&self, text: impl Into<String>) -> bool {
        self.send(Input::UserText(text.into()))
    }

    pub fn end(&self) -> bool {
        self.send(Input::End)
    }
}

/// Runs a [`Conversation`] against real adapters.
///
/// All inputs, from the user and from finished background work, go through one
/// channel and are applied one at a time, so the conversation is never touched
/// concurrently. Background tasks only ever send tagged results back.
pub struct SessionDriver {
    conversation: Conversation,
    speech_input: Box<dyn SpeechInput>,
    speech_output: Box<dyn SpeechOutput>,
    generator: Arc<dyn TurnGenerator>,
    hints: Arc<dyn HintGenerator>,
    archiver: Arc<dyn Archiver>,
    voice: VoiceSettings,
    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: mpsc::UnboundedReceiver<Input>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    playback_task: Option<JoinHandle<()>>,
    capture_task: Option<JoinHandle<()>>,
    generation_task: Option<JoinHandle<()>>,
    hint_task: Option<JoinHandle<()>>,
    finished: bool,
}

impl SessionDriver {
    pub fn new(
        config: ConversationConfig,
        voice: VoiceSettings,
        collaborators: Collaborators,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>) {
        let capabilities = Capabilities {
            speech_input: collaborators.speech_input.is_available(),
            speech_output: collaborators.speech_output.is_available(),
        };
        tracing::info!(
            "Speech input available: {}, speech output available: {}",
            capabilities.speech_input,
            capabilities.speech_output
        );

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle { tx: input_tx.clone() };

        let driver = Self {
            conversation: Conversation::new(config, capabilities),
            speech_input: collaborators.speech_input,
            speech_output: collaborators.speech_output,
            generator: collaborators.generator,
            hints: collaborators.hints,
            archiver: collaborators.archiver,
            voice,
            input_tx,
            input_rx,
            updates,
            playback_task: None,
            capture_task: None,
            generation_task: None,
            hint_task: None,
            finished: false,
        };
        (driver, handle, updates_rx)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.input_tx.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Applies one input and carries out the resulting commands.
    pub async fn dispatch(&mut self, input: Input) {
        let commands = self.conversation.handle(input);
        for command in commands {
            self.execute(command).await;
        }
    }

    /// Waits for the next queued input and dispatches it.
    pub async fn step(&mut self) -> bool {
        match self.input_rx.recv().await {
            Some(input) => {
                self.dispatch(input).await;
                true
            }
            None => false,
        }
    }

    /// Starts the session and runs it until it is ended. Returns the final transcript.
    pub async fn run(mut self) -> Transcript {
        self.dispatch(Input::Start).await;
        while !self.finished {
            if !self.step().await {
                break;
            }
        }
        self.conversation.transcript().clone()
    }

    fn publish(&self, update: SessionUpdate) {
        if self.updates.send(update).is_err() {
            tracing::trace!("No one is listening for session updates");
        }
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::StateChanged(state) => self.publish(SessionUpdate::State(state)),
            Command::Show(utterance) => self.publish(SessionUpdate::Utterance(utterance)),
            Command::Speak { turn, text } => self.speak(turn, &text).await,
            Command::CancelSpeech => self.speech_output.cancel().await,
            Command::Listen(ticket) => self.listen(ticket).await,
            Command::StopListening => {
                abort(&mut self.capture_task);
                self.speech_input.deactivate().await;
            }
            Command::Generate { turn, history, mode } => {
                abort(&mut self.generation_task);
                let generator = self.generator.clone();
                let tx = self.input_tx.clone();
                self.generation_task = Some(tokio::spawn(async move {
                    let result = generator.generate(&history, &mode).await;
                    let _ = tx.send(Input::Generation { turn, result });
                }));
            }
            Command::RequestHint { ticket, question } => {
                abort(&mut self.hint_task);
                let hints = self.hints.clone();
                let tx = self.input_tx.clone();
                self.hint_task = Some(tokio::spawn(async move {
                    let result = hints.hint(&question).await;
                    let _ = tx.send(Input::Hint { ticket, result });
                }));
            }
            Command::ShowHint(text) => self.publish(SessionUpdate::Hint(text)),
            Command::ClearHint => {
                abort(&mut self.hint_task);
                self.publish(SessionUpdate::HintCleared);
            }
            Command::Notify(notice) => self.publish(SessionUpdate::Notice(notice)),
            Command::Archive(archive) => {
                let title = archive.title.clone();
                if let Err(e) = self.archiver.archive(archive).await {
                    tracing::error!("Failed to archive session '{title}': {e:?}");
                }
            }
            Command::SessionEnded => {
                for task in [
                    &mut self.playback_task,
                    &mut self.capture_task,
                    &mut self.generation_task,
                    &mut self.hint_task,
                ] {
                    abort(task);
                }
                self.finished = true;
                self.publish(SessionUpdate::Ended);
            }
        }
    }

    async fn speak(&mut self, turn: TurnSeq, text: &str) {
        let choice = self.voice.resolve(&self.speech_output.voices());
        match self.speech_output.speak(text, &choice).await {
            Ok(events) => {
                let tx = self.input_tx.clone();
                self.playback_task = Some(tokio::spawn(forward_playback(turn, events, tx)));
            }
            Err(err) => {
                let _ = self.input_tx.send(Input::Playback {
                    turn,
                    event: PlaybackEvent::Failed(err),
                });
            }
        }
    }

    async fn listen(&mut self, ticket: ListenTicket) {
        abort(&mut self.capture_task);
        let language = self.conversation.config().language.clone();
        match self.speech_input.activate(&language).await {
            Ok(events) => {
                let tx = self.input_tx.clone();
                self.capture_task = Some(tokio::spawn(forward_recognition(ticket, events, tx)));
            }
            Err(err) => {
                let _ = self.input_tx.send(Input::Recognition {
                    ticket,
                    result: Err(err),
                });
            }
        }
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(handle) = task.take() {
        handle.abort();
    }
}

/// Tags playback events with their turn. A stream that closes without a
/// terminal event counts as cancelled.
async fn forward_playback(
    turn: TurnSeq,
    mut events: mpsc::Receiver<PlaybackEvent>,
    tx: mpsc::UnboundedSender<Input>,
) {
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if tx.send(Input::Playback { turn, event }).is_err() || terminal {
            return;
        }
    }
    let _ = tx.send(Input::Playback {
        turn,
        event: PlaybackEvent::Cancelled,
    });
}

/// Waits for the terminal recognition event. Interim text is only logged; a
/// stream that closes early counts as an empty result.
async fn forward_recognition(
    ticket: ListenTicket,
    mut events: mpsc::Receiver<RecognitionEvent>,
    tx: mpsc::UnboundedSender<Input>,
) {
    let result = loop {
        match events.recv().await {
            Some(RecognitionEvent::Interim(text)) => tracing::trace!("Interim: {text}"),
            Some(RecognitionEvent::Final(text)) => break Ok(text),
            Some(RecognitionEvent::Failed(err)) => break Err(err),
            None => break Ok(String::new()),
        }
    };
    let _ = tx.send(Input::Recognition { ticket, result });
}
