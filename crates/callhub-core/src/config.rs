//! Application configuration
//!
//! Centralized configuration management using the `config` crate.
//! Values come from built-in defaults, optional config files and
//! `CALLHUB__*` environment variables, in that order.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Upper bound for the destination-owner lookup on the webhook path
pub const MAX_DIRECTORY_LOOKUP_MS: u64 = 2000;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9001
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Apply embedded migrations at startup
    #[serde(default)]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 {
    20
}

/// Redis configuration (only needed for the redis dedupe backend)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: Option<String>,
}

/// Authentication configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret shared with the session issuer
    pub jwt_secret: String,
}

/// Call-control provider configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Provider REST API base URL
    #[serde(default = "default_provider_api")]
    pub api_base_url: String,

    /// Provider account identifier
    #[serde(default)]
    pub account_sid: String,

    /// Provider auth token
    #[serde(default)]
    pub auth_token: String,

    /// Public base URL under which the provider reaches our webhooks
    pub public_base_url: String,

    /// Hold audio played while a caller waits in the queue
    pub hold_music_url: Option<String>,

    /// Timeout for provider REST calls in seconds
    #[serde(default = "default_provider_timeout")]
    pub request_timeout_secs: u64,
}

fn default_provider_api() -> String {
    "https://api.twilio.com/2010-04-01".to_string()
}

fn default_provider_timeout() -> u64 {
    10
}

impl ProviderConfig {
    /// Whether REST credentials are present
    pub fn has_credentials(&self) -> bool {
        !self.account_sid.is_empty() && !self.auth_token.is_empty()
    }
}

/// Which DedupeCache implementation backs the call record store
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DedupeBackend {
    #[default]
    Memory,
    Redis,
}

/// Orchestration engine tuning
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    /// How long an incoming call rings before it becomes missed/voicemail
    #[serde(default = "default_ring_timeout")]
    pub ring_timeout_secs: u64,

    /// Bound on the destination-owner lookup (capped at 2000ms)
    #[serde(default = "default_lookup_timeout")]
    pub directory_lookup_timeout_ms: u64,

    /// Lifetime of dedupe entries
    #[serde(default = "default_dedupe_ttl")]
    pub dedupe_ttl_secs: u64,

    /// Width of the time bucket used to fold near-simultaneous creations
    #[serde(default = "default_dedupe_bucket")]
    pub dedupe_bucket_secs: i64,

    /// Interval of the dedupe sweep
    #[serde(default = "default_sweep_interval")]
    pub dedupe_sweep_interval_secs: u64,

    /// Dedupe backend
    #[serde(default)]
    pub dedupe_backend: DedupeBackend,

    /// Attempts for background persistence and provider redirects
    #[serde(default = "default_persist_attempts")]
    pub persist_max_attempts: u32,

    /// First backoff delay; doubles on each attempt
    #[serde(default = "default_persist_backoff")]
    pub persist_base_backoff_ms: u64,

    /// How long settled sessions stay in memory
    #[serde(default = "default_session_retention")]
    pub session_retention_secs: u64,

    /// Longest a call may stay unsettled in memory; also bounds how long a
    /// forwarded call waits for its dial result
    #[serde(default = "default_max_call_lifetime")]
    pub max_call_lifetime_secs: u64,

    /// Message played when a call cannot be routed
    #[serde(default = "default_unavailable_message")]
    pub unavailable_message: String,

    /// Voicemail greeting used when the destination has none
    #[serde(default = "default_greeting")]
    pub default_greeting: String,
}

fn default_ring_timeout() -> u64 {
    30
}

fn default_lookup_timeout() -> u64 {
    MAX_DIRECTORY_LOOKUP_MS
}

fn default_dedupe_ttl() -> u64 {
    3600 // 60 minutes
}

fn default_dedupe_bucket() -> i64 {
    10
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_persist_attempts() -> u32 {
    3
}

fn default_persist_backoff() -> u64 {
    200
}

fn default_session_retention() -> u64 {
    3600
}

fn default_max_call_lifetime() -> u64 {
    4 * 3600
}

fn default_unavailable_message() -> String {
    "The person you are trying to reach is not available. Please try again later.".to_string()
}

fn default_greeting() -> String {
    "Please leave a message after the tone.".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_timeout_secs: default_ring_timeout(),
            directory_lookup_timeout_ms: default_lookup_timeout(),
            dedupe_ttl_secs: default_dedupe_ttl(),
            dedupe_bucket_secs: default_dedupe_bucket(),
            dedupe_sweep_interval_secs: default_sweep_interval(),
            dedupe_backend: DedupeBackend::default(),
            persist_max_attempts: default_persist_attempts(),
            persist_base_backoff_ms: default_persist_backoff(),
            session_retention_secs: default_session_retention(),
            max_call_lifetime_secs: default_max_call_lifetime(),
            unavailable_message: default_unavailable_message(),
            default_greeting: default_greeting(),
        }
    }
}

impl EngineConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    /// Lookup bound, never above the 2s webhook budget
    pub fn directory_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_lookup_timeout_ms.min(MAX_DIRECTORY_LOOKUP_MS))
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }

    pub fn dedupe_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.dedupe_sweep_interval_secs.max(1))
    }

    pub fn persist_base_backoff(&self) -> Duration {
        Duration::from_millis(self.persist_base_backoff_ms)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn max_call_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_call_lifetime_secs)
    }

    /// When a forwarded call with no dial result is written off
    pub fn forward_backstop(&self) -> Duration {
        self.ring_timeout() + self.max_call_lifetime()
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 9001)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("database.max_connections", 20)?
            .set_default("provider.request_timeout_secs", 10)?
            .set_default("engine.ring_timeout_secs", 30)?
            .set_default("engine.directory_lookup_timeout_ms", 2000)?
            .set_default("engine.dedupe_ttl_secs", 3600)?
            .set_default("engine.persist_max_attempts", 3)?
            .set_default("engine.max_call_lifetime_secs", 14400)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CALLHUB_ prefix
            .add_source(
                Environment::with_prefix("CALLHUB")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CALLHUB").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_engine_config() {
        let config = EngineConfig::default();
        assert_eq!(config.ring_timeout_secs, 30);
        assert_eq!(config.dedupe_ttl_secs, 3600);
        assert_eq!(config.persist_max_attempts, 3);
        assert_eq!(config.dedupe_backend, DedupeBackend::Memory);
        assert_eq!(config.max_call_lifetime(), Duration::from_secs(14400));
        assert_eq!(config.forward_backstop(), Duration::from_secs(14430));
    }

    #[test]
    fn test_lookup_timeout_is_capped() {
        let config = EngineConfig {
            directory_lookup_timeout_ms: 10_000,
            ..Default::default()
        };
        assert_eq!(config.directory_lookup_timeout(), Duration::from_millis(2000));

        let config = EngineConfig {
            directory_lookup_timeout_ms: 500,
            ..Default::default()
        };
        assert_eq!(config.directory_lookup_timeout(), Duration::from_millis(500));
    }
}
