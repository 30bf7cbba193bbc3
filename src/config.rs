//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::settings::Settings;
use crate::{AppError, Result};

/// Keychain service name under which the API key is stored.
pub const KEYRING_SERVICE: &str = "interpreter-relay";

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "INTERPRETER_API_KEY";

/// HTTP/websocket listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port to bind; 0 lets the OS choose.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared secret for the auth handshake (populated at runtime).
    ///
    /// `None` accepts every key.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8000
}

/// Retry and acknowledgment tuning for outbound delivery.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DeliveryConfig {
    /// Whole-delivery attempts before reporting a failure.
    #[serde(default = "default_delivery_attempts")]
    pub delivery_attempts: u32,
    /// Acknowledged-set polls per attempt.
    #[serde(default = "default_ack_poll_attempts")]
    pub ack_poll_attempts: u32,
    /// Pause between acknowledged-set polls.
    #[serde(default = "default_ack_poll_interval_ms")]
    pub ack_poll_interval_ms: u64,
    /// Pause between failed delivery attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            delivery_attempts: default_delivery_attempts(),
            ack_poll_attempts: default_ack_poll_attempts(),
            ack_poll_interval_ms: default_ack_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_delivery_attempts() -> u32 {
    100
}

fn default_ack_poll_attempts() -> u32 {
    200
}

fn default_ack_poll_interval_ms() -> u64 {
    5
}

fn default_retry_delay_ms() -> u64 {
    50
}

impl DeliveryConfig {
    /// Pause between acknowledged-set polls.
    #[must_use]
    pub fn ack_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ack_poll_interval_ms)
    }

    /// Pause between failed delivery attempts.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// External response-generator process.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GeneratorConfig {
    /// Program to spawn for each response cycle.
    pub command: String,
    /// Arguments passed to the program.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Initial runtime settings.
    #[serde(default)]
    pub agent: Settings,
    /// Delivery retry tuning.
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// Response generator process.
    pub generator: GeneratorConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the API key from OS keychain with env-var fallback.
    ///
    /// A missing key is not an error: the server then accepts any key.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.server.api_key = load_credential("api_key", API_KEY_ENV).await?;
        if self.server.api_key.is_none() {
            warn!("no API key configured; every client will be accepted");
        } else {
            info!("API key loaded");
        }
        Ok(())
    }

    /// Validate a key presented by a client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unauthorized` if a key is configured and `key`
    /// does not match it.
    pub fn ensure_authorized(&self, key: Option<&str>) -> Result<()> {
        match self.server.api_key.as_deref() {
            None => Ok(()),
            Some(expected) if key == Some(expected) => Ok(()),
            Some(_) => Err(AppError::Unauthorized("authentication failed".into())),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.delivery.delivery_attempts == 0 {
            return Err(AppError::Config(
                "delivery_attempts must be greater than zero".into(),
            ));
        }

        if self.delivery.ack_poll_attempts == 0 {
            return Err(AppError::Config(
                "ack_poll_attempts must be greater than zero".into(),
            ));
        }

        if self.generator.command.trim().is_empty() {
            return Err(AppError::Config(
                "generator.command must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single optional credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(env::var(env_key).ok().filter(|value| !value.is_empty()))
}
