use crate::archive::TitleGenerator;
use crate::prompt_loader::PromptSet;
use crate::providers::{REQUEST_TIMEOUT, http_client};
use anyhow::Result;
use async_trait::async_trait;
use jobmate_core::error::CoachError;
use jobmate_core::generator::{HintGenerator, ModeConfig, TurnGenerator};
use jobmate_core::transcript::{Speaker, Utterance};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const HINT_MAX_TOKENS: u32 = 100;
const TITLE_MAX_TOKENS: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Message,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub content: Option<String>,
}

/// Chat-completions client for the OpenAI API and compatible servers.
pub struct OpenAiChat {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    prompts: PromptSet,
}

impl OpenAiChat {
    pub fn new(api_key: SecretString, base_url: impl Into<String>, model: impl Into<String>, prompts: PromptSet) -> Self {
        Self {
            client: http_client(REQUEST_TIMEOUT),
            api_key,
            base_url: base_url.into(),
            model: model.into(),
            prompts,
        }
    }

    /// Replaces the per-request deadline. A request that takes longer fails
    /// like any other network error.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    async fn complete(&self, messages: Vec<Value>, max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": 0.7
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<LlmResponse>()
            .await?;

        let answer = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No response from LLM"))?
            .message
            .content
            .unwrap_or_default();
        Ok(answer)
    }
}

/// The system instruction followed by the dialogue, agent lines as `assistant`.
pub fn chat_messages(system: &str, history: &[Utterance]) -> Vec<Value> {
    std::iter::once(json!({ "role": "system", "content": system }))
        .chain(history.iter().map(|u| {
            let role = match u.speaker() {
                Speaker::Agent => "assistant",
                Speaker::User => "user",
            };
            json!({ "role": role, "content": u.text() })
        }))
        .collect()
}

#[async_trait]
impl TurnGenerator for OpenAiChat {
    async fn generate(&self, history: &[Utterance], mode: &ModeConfig) -> Result<String, CoachError> {
        let messages = chat_messages(self.prompts.system_instruction(mode.persona), history);
        tracing::debug!("Requesting {} reply over {} utterances", mode.persona, history.len());
        self.complete(messages, mode.max_reply_tokens)
            .await
            .map_err(CoachError::generation)
    }
}

#[async_trait]
impl HintGenerator for OpenAiChat {
    async fn hint(&self, question: &str) -> Result<String, CoachError> {
        let messages = vec![json!({ "role": "user", "content": self.prompts.hint(question) })];
        self.complete(messages, HINT_MAX_TOKENS)
            .await
            .map_err(CoachError::generation)
    }
}

#[async_trait]
impl TitleGenerator for OpenAiChat {
    async fn title(&self, first_message: &str) -> Result<String> {
        let messages = vec![json!({ "role": "user", "content": self.prompts.title(first_message) })];
        self.complete(messages, TITLE_MAX_TOKENS).await
    }
}
