//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use visualize_core::expiry::{ExpiryPolicy, DEFAULT_CLEANUP_INTERVAL_MINUTES, DEFAULT_TTL_MINUTES};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which vision provider answers image questions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiProvider {
    Gemini,
    OpenAi,
}

impl FromStr for AiProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            other => Err(ConfigError::InvalidValue(
                "AI_PROVIDER".to_string(),
                format!("'{}' is not one of gemini, openai", other),
            )),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub log_level: Level,
    pub frontend_url: String,
    /// Presence selects the persistent session store.
    pub database_url: Option<String>,
    pub ai_provider: AiProvider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub vision_model: String,
    pub gemini_model: String,
    pub session_ttl_minutes: i64,
    pub cleanup_interval_minutes: u64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let frontend_url = std::env::var("FRONTEND_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load Session Store Settings ---
        let database_url = non_empty_var("DATABASE_URL");
        let session_ttl_minutes = parse_var("SESSION_TTL_MINUTES", DEFAULT_TTL_MINUTES)?;
        let cleanup_interval_minutes =
            parse_var("CLEANUP_INTERVAL_MINUTES", DEFAULT_CLEANUP_INTERVAL_MINUTES)?;
        check_minutes("SESSION_TTL_MINUTES", session_ttl_minutes)?;
        check_minutes("CLEANUP_INTERVAL_MINUTES", cleanup_interval_minutes)?;

        // --- Load API Keys (as optional) ---
        let openai_api_key = non_empty_var("OPENAI_API_KEY");
        let gemini_api_key = non_empty_var("GEMINI_API_KEY");

        let ai_provider = match non_empty_var("AI_PROVIDER") {
            Some(name) => name.parse()?,
            None if gemini_api_key.is_some() => AiProvider::Gemini,
            None => AiProvider::OpenAi,
        };

        // --- Load Adapter-specific Settings ---
        let vision_model = std::env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());

        Ok(Self {
            bind_address,
            log_level,
            frontend_url,
            database_url,
            ai_provider,
            openai_api_key,
            gemini_api_key,
            vision_model,
            gemini_model,
            session_ttl_minutes,
            cleanup_interval_minutes,
        })
    }

    pub fn expiry_policy(&self) -> ExpiryPolicy {
        ExpiryPolicy::from_minutes(self.session_ttl_minutes)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes * 60)
    }
}

/// Upper bound for minute-valued settings (one year).
const MAX_MINUTES: u64 = 60 * 24 * 365;

fn check_minutes<T>(name: &str, minutes: T) -> Result<(), ConfigError>
where
    T: TryInto<u64> + Copy + std::fmt::Display,
{
    match minutes.try_into() {
        Ok(m) if (1..=MAX_MINUTES).contains(&m) => Ok(()),
        _ => Err(ConfigError::InvalidValue(
            name.to_string(),
            format!("{} is outside 1..={} minutes", minutes, MAX_MINUTES),
        )),
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => Ok(default),
    }
}
