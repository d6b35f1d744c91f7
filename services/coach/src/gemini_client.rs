use crate::archive::TitleGenerator;
use crate::prompt_loader::PromptSet;
use crate::providers::{REQUEST_TIMEOUT, http_client};
use anyhow::Result;
use async_trait::async_trait;
use jobmate_core::error::CoachError;
use jobmate_core::generator::{HintGenerator, ModeConfig, TurnGenerator};
use jobmate_core::transcript::{Utterance, render_lines};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

const HINT_MAX_TOKENS: u32 = 100;
const TITLE_MAX_TOKENS: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

impl GenerateContentResponse {
    /// Text of the first candidate, parts concatenated.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        Some(content.parts.iter().map(|p| p.text.as_str()).collect())
    }
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiChat {
    client: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    prompts: PromptSet,
}

impl GeminiChat {
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

    async fn generate_content(&self, body: Value) -> Result<String> {
        let resp = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<GenerateContentResponse>()
            .await?;

        resp.text().ok_or_else(|| anyhow::anyhow!("No candidates in Gemini response"))
    }
}

/// Request body for one reply. The dialogue goes in as a single user turn of
/// `speaker: text` lines, so it may start with the agent.
pub fn reply_request(system: &str, history: &[Utterance], max_output_tokens: u32) -> Value {
    json!({
        "systemInstruction": { "parts": [{ "text": system }] },
        "contents": [{ "role": "user", "parts": [{ "text": render_lines(history) }] }],
        "generationConfig": { "maxOutputTokens": max_output_tokens }
    })
}

fn prompt_request(prompt: String, max_output_tokens: u32) -> Value {
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        "generationConfig": { "maxOutputTokens": max_output_tokens }
    })
}

#[async_trait]
impl TurnGenerator for GeminiChat {
    async fn generate(&self, history: &[Utterance], mode: &ModeConfig) -> Result<String, CoachError> {
        let body = reply_request(
            self.prompts.system_instruction(mode.persona),
            history,
            mode.max_reply_tokens,
        );
        self.generate_content(body).await.map_err(CoachError::generation)
    }
}

#[async_trait]
impl HintGenerator for GeminiChat {
    async fn hint(&self, question: &str) -> Result<String, CoachError> {
        self.generate_content(prompt_request(self.prompts.hint(question), HINT_MAX_TOKENS))
            .await
            .map_err(CoachError::generation)
    }
}

#[async_trait]
impl TitleGenerator for GeminiChat {
    async fn title(&self, first_message: &str) -> Result<String> {
        self.generate_content(prompt_request(self.prompts.title(first_message), TITLE_MAX_TOKENS))
            .await
    }
}
