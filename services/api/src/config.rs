use secrecy::SecretString;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: SecretString,
    pub realtime_model: String,
    pub realtime_url: String,
    pub openai_sessions_url: String,
    pub credential_url: String,
    pub connect_timeout: Duration,
    pub scenarios_path: Option<PathBuf>,
    pub default_scenario: Option<String>,
    pub preferences_path: PathBuf,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let realtime_model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2025-06-03");
        let realtime_url = var_or("REALTIME_URL", "wss://api.openai.com/v1/realtime");
        let openai_sessions_url = var_or(
            "OPENAI_SESSIONS_URL",
            "https://api.openai.com/v1/realtime/sessions",
        );
        let credential_url = var_or("CREDENTIAL_URL", "http://127.0.0.1:3000/api/session");

        let timeout_str = var_or("CONNECT_TIMEOUT_SECS", "15");
        let connect_timeout = match timeout_str.parse::<u64>() {
            Ok(secs) if secs > 0 => Duration::from_secs(secs),
            _ => {
                return Err(ConfigError::InvalidValue(
                    "CONNECT_TIMEOUT_SECS".to_string(),
                    format!("'{}' is not a positive number of seconds", timeout_str),
                ));
            }
        };

        let scenarios_path = std::env::var("SCENARIOS_PATH").ok().map(PathBuf::from);
        let default_scenario = std::env::var("DEFAULT_SCENARIO")
            .ok()
            .filter(|key| !key.is_empty());
        let preferences_path = PathBuf::from(var_or("PREFERENCES_PATH", "./preferences.json"));

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            openai_api_key,
            realtime_model,
            realtime_url,
            openai_sessions_url,
            credential_url,
            connect_timeout,
            scenarios_path,
            default_scenario,
            preferences_path,
            log_level,
        })
    }
}
