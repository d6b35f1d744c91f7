mod config;
mod protocol;
mod remote;
mod session;

use anyhow::Context;
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use jobmate_coach::archive::FileArchiver;
use jobmate_coach::prompt_loader::PromptSet;
use jobmate_coach::providers::Providers;
use jobmate_core::speech::VoiceSettings;
use protocol::{ClientMessage, ServerMessage};
use session::AppState;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Handles WebSocket upgrade requests.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one session over an established connection.
///
/// Text frames are parsed into client messages and fed to the session; server
/// messages are written back as JSON text frames. Frames that do not parse
/// are answered with an `error` message and otherwise ignored.
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("WebSocket connection established");
    let (mut sink, mut stream) = socket.split();
    let (outgoing, mut outbox) = mpsc::unbounded_channel::<ServerMessage>();
    let (inbox, incoming) = mpsc::unbounded_channel::<ClientMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize {msg:?}: {e}");
                    continue;
                }
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                // Client disconnected.
                break;
            }
        }
    });

    let reader = {
        let outgoing = outgoing.clone();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        info!("WebSocket error: {}", e);
                        break;
                    }
                };
                match serde_json::from_str::<ClientMessage>(text.as_str()) {
                    Ok(msg) => {
                        if inbox.send(msg).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Unreadable client message: {e}");
                        let _ = outgoing.send(ServerMessage::Error {
                            message: format!("unreadable message: {e}"),
                        });
                    }
                }
            }
        })
    };

    if let Some(transcript) = session::serve_session(incoming, outgoing, state).await {
        info!("Session finished with {} utterances", transcript.len());
    }

    reader.abort();
    if let Err(e) = writer.await {
        tracing::warn!("Socket writer failed: {e:?}");
    }
    info!("WebSocket connection closed");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = config::Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.coach.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    // --- 3. Initialize API Clients ---
    let prompts = PromptSet::load(&config.coach.prompts_dir).context("Failed to load LLM prompts")?;
    info!("Loaded {} prompts successfully.", prompts.len());
    let providers = Providers::from_config(&config.coach, prompts);
    let archiver = FileArchiver::new(&config.coach.archive_dir).with_titles(providers.titles.clone());

    let state = AppState {
        generator: providers.generator,
        hints: providers.hints,
        archiver: Arc::new(archiver),
        voice: VoiceSettings::default(),
    };

    // Any origin may connect; the browser front end is served separately.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(state);

    info!("Starting WebSocket server, listening on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
