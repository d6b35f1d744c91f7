use crate::protocol::ServerMessage;
use async_trait::async_trait;
use jobmate_core::error::{Capability, CoachError};
use jobmate_core::speech::{
    PlaybackEvent, RecognitionEvent, SpeechInput, SpeechOutput, VoiceChoice, VoiceInfo,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const EVENT_BUFFER: usize = 16;

/// Open request streams keyed by the id the browser echoes back.
pub struct Routes<E> {
    next_id: Arc<AtomicU64>,
    open: Arc<Mutex<HashMap<u64, mpsc::Sender<E>>>>,
}

impl<E> Clone for Routes<E> {
    fn clone(&self) -> Self {
        Self {
            next_id: self.next_id.clone(),
            open: self.open.clone(),
        }
    }
}

impl<E> Default for Routes<E> {
    fn default() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            open: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<E> Routes<E> {
    fn open(&self) -> (u64, mpsc::Receiver<E>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        if let Ok(mut open) = self.open.lock() {
            open.insert(id, tx);
        }
        (id, rx)
    }

    fn close(&self, id: u64) -> Option<mpsc::Sender<E>> {
        self.open.lock().ok()?.remove(&id)
    }

    fn is_open(&self, id: u64) -> bool {
        self.open.lock().map(|open| open.contains_key(&id)).unwrap_or(false)
    }

    /// Hands `event` to the stream for `id`. A terminal event closes the
    /// stream. Returns false for unknown or already closed ids.
    fn deliver(&self, id: u64, event: E, terminal: bool) -> bool {
        let tx = if terminal {
            self.close(id)
        } else {
            self.open.lock().ok().and_then(|open| open.get(&id).cloned())
        };
        match tx {
            Some(tx) => tx.try_send(event).is_ok(),
            None => {
                tracing::debug!("Dropping event for closed request {id}");
                false
            }
        }
    }
}

impl Routes<PlaybackEvent> {
    pub fn deliver_playback(&self, id: u64, event: PlaybackEvent) -> bool {
        let terminal = event.is_terminal();
        self.deliver(id, event, terminal)
    }
}

impl Routes<RecognitionEvent> {
    pub fn deliver_recognition(&self, id: u64, event: RecognitionEvent) -> bool {
        let terminal = event.is_terminal();
        self.deliver(id, event, terminal)
    }
}

/// Speech synthesis done by the browser on the other end of the socket.
pub struct RemoteSpeechOutput {
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    routes: Routes<PlaybackEvent>,
    available: bool,
    voices: Vec<VoiceInfo>,
    current: Option<u64>,
}

impl RemoteSpeechOutput {
    pub fn new(
        outgoing: mpsc::UnboundedSender<ServerMessage>,
        routes: Routes<PlaybackEvent>,
        available: bool,
        voices: Vec<VoiceInfo>,
    ) -> Self {
        Self {
            outgoing,
            routes,
            available,
            voices,
            current: None,
        }
    }
}

#[async_trait]
impl SpeechOutput for RemoteSpeechOutput {
    fn is_available(&self) -> bool {
        self.available
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }

    async fn speak(
        &mut self,
        text: &str,
        voice: &VoiceChoice,
    ) -> Result<mpsc::Receiver<PlaybackEvent>, CoachError> {
        if !self.available {
            return Err(CoachError::CapabilityUnavailable(Capability::SpeechOutput));
        }
        self.cancel().await;

        let (id, rx) = self.routes.open();
        let message = ServerMessage::Speak {
            id,
            text: text.to_string(),
            voice: voice.clone(),
        };
        if self.outgoing.send(message).is_err() {
            self.routes.close(id);
            return Err(CoachError::playback("connection closed"));
        }
        self.current = Some(id);
        Ok(rx)
    }

    /// Ends the current stream with `Cancelled` right away; whatever the
    /// browser reports for it afterwards is dropped.
    async fn cancel(&mut self) {
        let Some(id) = self.current.take() else {
            return;
        };
        if !self.routes.is_open(id) {
            return;
        }
        let _ = self.outgoing.send(ServerMessage::CancelSpeech { id });
        self.routes.deliver_playback(id, PlaybackEvent::Cancelled);
    }
}

/// Speech recognition done by the browser on the other end of the socket.
pub struct RemoteSpeechInput {
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    routes: Routes<RecognitionEvent>,
    available: bool,
    current: Option<u64>,
}

impl RemoteSpeechInput {
    pub fn new(
        outgoing: mpsc::UnboundedSender<ServerMessage>,
        routes: Routes<RecognitionEvent>,
        available: bool,
    ) -> Self {
        Self {
            outgoing,
            routes,
            available,
            current: None,
        }
    }
}

#[async_trait]
impl SpeechInput for RemoteSpeechInput {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn activate(
        &mut self,
        language: &str,
    ) -> Result<mpsc::Receiver<RecognitionEvent>, CoachError> {
        if !self.available {
            return Err(CoachError::CapabilityUnavailable(Capability::SpeechInput));
        }
        self.deactivate().await;

        let (id, rx) = self.routes.open();
        let message = ServerMessage::Listen {
            id,
            language: language.to_string(),
        };
        if self.outgoing.send(message).is_err() {
            self.routes.close(id);
            return Err(CoachError::recognition("connection closed"));
        }
        self.current = Some(id);
        Ok(rx)
    }

    /// Closes the current stream without a terminal event.
    async fn deactivate(&mut self) {
        let Some(id) = self.current.take() else {
            return;
        };
        if self.routes.close(id).is_some() {
            let _ = self.outgoing.send(ServerMessage::StopListening { id });
        }
    }
}
