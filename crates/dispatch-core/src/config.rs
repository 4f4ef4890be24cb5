//! Configuration for the dispatch daemon and web adapter.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for environment variable {var}")]
    Env { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventsConfig {
    /// Per-viewer buffer; a viewer that falls this far behind is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Log,
    Sms,
    Webhook,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_enabled_sinks")]
    pub enabled_sinks: Vec<SinkKind>,
    /// Also text the roster when a job gets claimed.
    #[serde(default)]
    pub notify_on_claim: bool,
    /// Messages waiting for the delivery worker before new ones are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub twilio: TwilioConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled_sinks: default_enabled_sinks(),
            notify_on_claim: false,
            queue_capacity: default_queue_capacity(),
            webhook_url: None,
            twilio: TwilioConfig::default(),
            retry: RetrySettings::default(),
        }
    }
}

/// Names of the environment variables holding Twilio credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default = "default_account_sid_env")]
    pub account_sid_env: String,
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,
    #[serde(default = "default_from_number_env")]
    pub from_number_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid_env: default_account_sid_env(),
            auth_token_env: default_auth_token_env(),
            from_number_env: default_from_number_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u64,
    #[serde(default = "default_dead_letter_max_size")]
    pub dead_letter_max_size: usize,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            dead_letter_max_size: default_dead_letter_max_size(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/dispatch.sqlite")
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_queue_capacity() -> usize {
    256
}

fn default_enabled_sinks() -> Vec<SinkKind> {
    vec![SinkKind::Log]
}

fn default_account_sid_env() -> String {
    "TWILIO_ACCOUNT_SID".to_string()
}

fn default_auth_token_env() -> String {
    "TWILIO_AUTH_TOKEN".to_string()
}

fn default_from_number_env() -> String {
    "TWILIO_FROM_NUMBER".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> u64 {
    2
}

fn default_dead_letter_max_size() -> usize {
    1000
}

pub fn parse_dispatch_config(contents: &str) -> Result<DispatchConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_dispatch_config(path: impl AsRef<Path>) -> Result<DispatchConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_dispatch_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}

/// Load the config file if it exists, otherwise fall back to defaults.
pub fn load_dispatch_config_or_default(
    path: impl AsRef<Path>,
) -> Result<DispatchConfig, ConfigError> {
    let path_ref = path.as_ref();
    if !path_ref.exists() {
        return Ok(DispatchConfig::default());
    }
    load_dispatch_config(path_ref)
}

/// Apply `PORT` and `DB_PATH` overrides from the deployment environment.
pub fn apply_env_overrides<F>(config: &mut DispatchConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
        let port_num = port.trim().parse::<u16>().map_err(|_| ConfigError::Env {
            var: "PORT",
            value: port.clone(),
        })?;
        let host = config
            .server
            .bind
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.server.bind = format!("{host}:{port_num}");
    }

    if let Some(path) = lookup("DB_PATH").filter(|v| !v.trim().is_empty()) {
        config.storage.sqlite_path = PathBuf::from(path.trim());
    }

    Ok(())
}
