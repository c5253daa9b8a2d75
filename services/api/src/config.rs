use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

pub const DEFAULT_KEEPALIVE_SECS: u64 = 30;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Defines the supported agent runtimes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    Echo,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: Option<String>,
    pub provider: Provider,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub keepalive_interval: Duration,
    pub profile_service_url: Option<String>,
    pub profile_service_token: Option<String>,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL").ok();

        let provider_str = std::env::var("AGENT_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = match provider_str.to_lowercase().as_str() {
            "gemini" => Provider::Gemini,
            "echo" => Provider::Echo,
            other => {
                return Err(ConfigError::InvalidValue(
                    "AGENT_PROVIDER".to_string(),
                    format!("'{}' is not one of: gemini, echo", other),
                ));
            }
        };

        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let gemini_model = std::env::var("GEMINI_MODEL")
            .unwrap_or_else(|_| gemini_realtime::DEFAULT_MODEL.to_string());

        let keepalive_secs = match std::env::var("KEEPALIVE_INTERVAL_SECS") {
            Ok(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| {
                    ConfigError::InvalidValue(
                        "KEEPALIVE_INTERVAL_SECS".to_string(),
                        format!("'{}' is not a positive number of seconds", raw),
                    )
                })?,
            Err(_) => DEFAULT_KEEPALIVE_SECS,
        };

        let profile_service_url = std::env::var("PROFILE_SERVICE_URL").ok();
        let profile_service_token = std::env::var("PROFILE_SERVICE_TOKEN").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        if provider == Provider::Gemini && gemini_api_key.is_none() {
            return Err(ConfigError::MissingVar(
                "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            gemini_api_key,
            gemini_model,
            keepalive_interval: Duration::from_secs(keepalive_secs),
            profile_service_url,
            profile_service_token,
            log_level,
            prompts_path,
        })
    }
}
