//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Connection settings for the S3-compatible blob store.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: Option<String>,
    pub access_key: String,
    pub secret_key: String,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    /// Absolute origin used to build phone pairing URLs and blob URIs.
    pub public_base_url: String,
    pub cors_origin: String,
    pub storage: StorageConfig,
    pub google_vision_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub elevenlabs_api_key: Option<String>,
    /// Fallback voice when the caller has no preference row.
    pub default_voice_id: String,
    pub vision_fallback_model: String,
    pub cover_model: String,
    pub session_ttl_hours: i64,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://{}", bind_address))
            .trim_end_matches('/')
            .to_string();

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:5173".to_string());

        // --- Load Blob Store Settings ---
        let storage = StorageConfig {
            endpoint: std::env::var("S3_ENDPOINT")
                .map_err(|_| ConfigError::MissingVar("S3_ENDPOINT".to_string()))?,
            bucket: std::env::var("S3_BUCKET")
                .map_err(|_| ConfigError::MissingVar("S3_BUCKET".to_string()))?,
            region: std::env::var("S3_REGION").ok(),
            access_key: std::env::var("S3_ACCESS_KEY")
                .map_err(|_| ConfigError::MissingVar("S3_ACCESS_KEY".to_string()))?,
            secret_key: std::env::var("S3_SECRET_KEY")
                .map_err(|_| ConfigError::MissingVar("S3_SECRET_KEY".to_string()))?,
        };

        // --- Load API Keys (as optional) ---
        let google_vision_api_key = std::env::var("GOOGLE_VISION_API_KEY").ok();
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let elevenlabs_api_key = std::env::var("ELEVENLABS_API_KEY").ok();

        // --- Load Adapter-specific Settings ---
        let default_voice_id = std::env::var("ELEVENLABS_VOICE_ID")
            .unwrap_or_else(|_| "21m00Tcm4TlvDq8ikWAM".to_string());
        let vision_fallback_model =
            std::env::var("VISION_FALLBACK_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let cover_model =
            std::env::var("COVER_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let session_ttl_hours = match std::env::var("SESSION_TTL_HOURS") {
            Ok(raw) => raw.parse::<i64>().map_err(|e| {
                ConfigError::InvalidValue("SESSION_TTL_HOURS".to_string(), e.to_string())
            })?,
            Err(_) => 24,
        };

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            public_base_url,
            cors_origin,
            storage,
            google_vision_api_key,
            openai_api_key,
            elevenlabs_api_key,
            default_voice_id,
            vision_fallback_model,
            cover_model,
            session_ttl_hours,
        })
    }
}
