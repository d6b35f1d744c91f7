use crate::protocol::{ClientMessage, Route, ServerMessage, StartOptions};
use crate::remote::{RemoteSpeechInput, RemoteSpeechOutput, Routes};
use jobmate_core::archive::Archiver;
use jobmate_core::conversation::ConversationConfig;
use jobmate_core::driver::{Collaborators, SessionDriver};
use jobmate_core::generator::{HintGenerator, TurnGenerator};
use jobmate_core::speech::VoiceSettings;
use jobmate_core::transcript::Transcript;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Shared by every connection.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn TurnGenerator>,
    pub hints: Arc<dyn HintGenerator>,
    pub archiver: Arc<dyn Archiver>,
    pub voice: VoiceSettings,
}

fn session_config(options: &StartOptions) -> ConversationConfig {
    let config = ConversationConfig::new(options.persona)
        .with_practice(options.practice)
        .with_auto_play(options.auto_play);
    match &options.language {
        Some(language) => config.with_language(language.clone()),
        None => config,
    }
}

/// Runs one conversation for one connected browser.
///
/// Waits for a `start` message, then routes user actions into the session and
/// device reports to the remote speech adapters until the session ends or
/// `incoming` closes. A closed connection ends the session like `end` does.
/// Returns `None` if the connection closed before the session started.
pub async fn serve_session(
    mut incoming: mpsc::UnboundedReceiver<ClientMessage>,
    outgoing: mpsc::UnboundedSender<ServerMessage>,
    state: AppState,
) -> Option<Transcript> {
    let options = loop {
        match incoming.recv().await?.route() {
            Route::Start(options) => break options,
            other => {
                tracing::warn!("Message before start: {other:?}");
                let _ = outgoing.send(ServerMessage::Error {
                    message: "send a start message first".to_string(),
                });
            }
        }
    };
    tracing::info!(
        "Starting {} session (speech in: {}, speech out: {}, {} voices)",
        options.persona,
        options.speech_input,
        options.speech_output,
        options.voices.len()
    );

    let playback = Routes::default();
    let recognition = Routes::default();
    let (driver, handle, mut updates) = SessionDriver::new(
        session_config(&options),
        state.voice.clone(),
        Collaborators {
            speech_input: Box::new(RemoteSpeechInput::new(
                outgoing.clone(),
                recognition.clone(),
                options.speech_input,
            )),
            speech_output: Box::new(RemoteSpeechOutput::new(
                outgoing.clone(),
                playback.clone(),
                options.speech_output,
                options.voices,
            )),
            generator: state.generator,
            hints: state.hints,
            archiver: state.archiver,
        },
    );

    let forward = {
        let outgoing = outgoing.clone();
        tokio::spawn(async move {
            while let Some(update) = updates.recv().await {
                if outgoing.send(update.into()).is_err() {
                    break;
                }
            }
        })
    };

    let mut session = tokio::spawn(driver.run());
    let result = loop {
        tokio::select! {
            result = &mut session => break result,
            msg = incoming.recv() => match msg.map(ClientMessage::route) {
                Some(Route::Start(_)) => {
                    let _ = outgoing.send(ServerMessage::Error {
                        message: "session already started".to_string(),
                    });
                }
                Some(Route::Session(input)) => {
                    handle.send(input);
                }
                Some(Route::Playback { id, event }) => {
                    playback.deliver_playback(id, event);
                }
                Some(Route::Recognition { id, event }) => {
                    recognition.deliver_recognition(id, event);
                }
                None => {
                    tracing::info!("Connection closed. Ending session...");
                    handle.end();
                    break (&mut session).await;
                }
            }
        }
    };

    if let Err(e) = forward.await {
        tracing::warn!("Update forwarder failed: {e:?}");
    }
    match result {
        Ok(transcript) => Some(transcript),
        Err(e) => {
            tracing::error!("Session task failed: {e:?}");
            None
        }
    }
}
