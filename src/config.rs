use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Directory holding the web client
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Postgres URL. Without it rooms are kept in process memory only.
    pub db_url: Option<String>,

    #[serde(default = "default_db_connect_attempts")]
    pub db_connect_attempts: u32,

    #[serde(default = "default_db_connect_retry_delay_secs")]
    pub db_connect_retry_delay_secs: u64,

    /// Redis URL. Required to run more than one process.
    pub redis_url: Option<String>,

    /// Bus topic shared by all processes
    #[serde(default = "default_sync_channel")]
    pub sync_channel: String,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Debounce window for batched writes
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    #[serde(default = "default_save_queue_capacity")]
    pub save_queue_capacity: usize,

    #[serde(default = "default_session_queue_capacity")]
    pub session_queue_capacity: usize,

    #[serde(default = "default_registry_queue_capacity")]
    pub registry_queue_capacity: usize,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    #[serde(default = "default_cleanup_max_age_secs")]
    pub cleanup_max_age_secs: u64,

    /// Also persist envelopes replayed from other processes
    #[serde(default = "default_persist_remote")]
    pub persist_remote: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    /// Parsed CORS origins, empty when unset
    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    pub fn cleanup_max_age(&self) -> Duration {
        Duration::from_secs(self.cleanup_max_age_secs)
    }

    pub fn db_connect_retry_delay(&self) -> Duration {
        Duration::from_secs(self.db_connect_retry_delay_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            cors_origins: None,
            static_dir: default_static_dir(),
            db_url: None,
            db_connect_attempts: default_db_connect_attempts(),
            db_connect_retry_delay_secs: default_db_connect_retry_delay_secs(),
            redis_url: None,
            sync_channel: default_sync_channel(),
            cache_ttl_secs: default_cache_ttl_secs(),
            flush_interval_secs: default_flush_interval_secs(),
            save_queue_capacity: default_save_queue_capacity(),
            session_queue_capacity: default_session_queue_capacity(),
            registry_queue_capacity: default_registry_queue_capacity(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            cleanup_max_age_secs: default_cleanup_max_age_secs(),
            persist_remote: default_persist_remote(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_static_dir() -> String {
    "./static".to_string()
}

fn default_db_connect_attempts() -> u32 {
    5
}

fn default_db_connect_retry_delay_secs() -> u64 {
    2
}

fn default_sync_channel() -> String {
    "clipboard_sync".to_string()
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_save_queue_capacity() -> usize {
    1000
}

fn default_session_queue_capacity() -> usize {
    256
}

fn default_registry_queue_capacity() -> usize {
    1024
}

fn default_cleanup_interval_secs() -> u64 {
    60 * 60
}

fn default_cleanup_max_age_secs() -> u64 {
    24 * 60 * 60
}

fn default_persist_remote() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert_eq!(config.save_queue_capacity, 1000);
        assert_eq!(config.session_queue_capacity, 256);
        assert!(config.persist_remote);
        assert!(config.is_development());
        assert!(!config.is_production());
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = Config {
            cors_origins: Some("http://a.test, http://b.test,,".to_string()),
            ..Config::default()
        };
        assert_eq!(config.cors_origin_list(), vec!["http://a.test", "http://b.test"]);
        assert!(Config::default().cors_origin_list().is_empty());
    }
}
