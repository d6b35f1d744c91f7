use jobmate_coach::config::Config as CoachConfig;
use std::net::SocketAddr;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
    #[error(transparent)]
    Coach(#[from] jobmate_coach::config::ConfigError),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub coach: CoachConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// *   `BIND_ADDRESS`: The address and port to bind the server to. Defaults to "0.0.0.0:3000".
    ///
    /// Everything else (provider, keys, model, prompts, archive, log level) is
    /// read the same way the coach CLI reads it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let coach = CoachConfig::from_env()?;
        let bind_address = parse_bind_address(std::env::var("BIND_ADDRESS").ok())?;
        Ok(Self { bind_address, coach })
    }
}

fn parse_bind_address(value: Option<String>) -> Result<SocketAddr, ConfigError> {
    let bind_address_str = value.unwrap_or_else(|| "0.0.0.0:3000".to_string());
    bind_address_str
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))
}
