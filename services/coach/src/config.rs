//! Application Configuration Module
//!
//! Loads settings for the coaching services from environment variables into a
//! single struct that is passed to the clients and the archiver.

use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug)]
pub struct Config {
    pub provider: LlmProvider,
    pub api_key: SecretString,
    pub base_url: String,
    pub chat_model: String,
    pub log_level: Level,
    pub archive_dir: PathBuf,
    pub prompts_dir: PathBuf,
}

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {var}: {value}")]
    InvalidValue { var: String, value: String },
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `LLM_PROVIDER`: "openai" or "gemini". Defaults to "openai".
    // *   `OPENAI_API_KEY` / `GEMINI_API_KEY`: Required for the selected provider.
    // *   `CHAT_MODEL`: (Optional) Defaults to "gpt-4o-mini" or "gemini-2.5-flash".
    // *   `OPENAI_BASE_URL` / `GEMINI_BASE_URL`: (Optional) API endpoints.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    // *   `ARCHIVE_DIR`: (Optional) Where finished sessions are written. Defaults to "archive".
    // *   `PROMPTS_DIR`: (Optional) Prompt overrides. Defaults to "prompts".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let provider_str = var("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "openai" => LlmProvider::OpenAI,
            "gemini" => LlmProvider::Gemini,
            _ => {
                return Err(ConfigError::InvalidValue {
                    var: "LLM_PROVIDER".to_string(),
                    value: provider_str,
                });
            }
        };

        let (key_var, url_var, default_url, default_model) = match provider {
            LlmProvider::OpenAI => (
                "OPENAI_API_KEY",
                "OPENAI_BASE_URL",
                DEFAULT_OPENAI_BASE_URL,
                DEFAULT_OPENAI_MODEL,
            ),
            LlmProvider::Gemini => (
                "GEMINI_API_KEY",
                "GEMINI_BASE_URL",
                DEFAULT_GEMINI_BASE_URL,
                DEFAULT_GEMINI_MODEL,
            ),
        };

        let api_key = var(key_var)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar(format!("{key_var} must be set for {provider_str} provider")))?;

        let base_url = var(url_var)
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let chat_model = var("CHAT_MODEL").unwrap_or_else(|| default_model.to_string());

        // Configure logging level from RUST_LOG, with a sensible default.
        let log_level_str = var("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidValue {
                var: "RUST_LOG".to_string(),
                value: log_level_str,
            })?;

        Ok(Self {
            provider,
            api_key: SecretString::from(api_key),
            base_url,
            chat_model,
            log_level,
            archive_dir: var("ARCHIVE_DIR").unwrap_or_else(|| "archive".to_string()).into(),
            prompts_dir: var("PROMPTS_DIR").unwrap_or_else(|| "prompts".to_string()).into(),
        })
    }
}
