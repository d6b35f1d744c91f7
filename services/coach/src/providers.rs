use crate::archive::TitleGenerator;
use crate::config::{Config, LlmProvider};
use crate::gemini_client::GeminiChat;
use crate::openai_client::OpenAiChat;
use crate::prompt_loader::PromptSet;
use jobmate_core::generator::{HintGenerator, TurnGenerator};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;

/// Deadline for a single model request, response body included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeout, using defaults: {e}");
            Client::new()
        })
}

/// The model-backed collaborators, all served by the configured provider.
#[derive(Clone)]
pub struct Providers {
    pub generator: Arc<dyn TurnGenerator>,
    pub hints: Arc<dyn HintGenerator>,
    pub titles: Arc<dyn TitleGenerator>,
}

impl Providers {
    pub fn from_config(config: &Config, prompts: PromptSet) -> Self {
        let api_key = SecretString::from(config.api_key.expose_secret().to_string());
        match config.provider {
            LlmProvider::OpenAI => {
                let chat = Arc::new(OpenAiChat::new(api_key, &config.base_url, &config.chat_model, prompts));
                Self {
                    generator: chat.clone(),
                    hints: chat.clone(),
                    titles: chat,
                }
            }
            LlmProvider::Gemini => {
                let chat = Arc::new(GeminiChat::new(api_key, &config.base_url, &config.chat_model, prompts));
                Self {
                    generator: chat.clone(),
                    hints: chat.clone(),
                    titles: chat,
                }
            }
        }
    }
}

/// Accepts connections and never answers.
#[cfg(test)]
pub(crate) async fn silent_server() -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    addr
}
