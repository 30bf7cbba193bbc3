//! Runtime agent settings with a typed, per-key update operation.
//!
//! Settings can be changed while the server runs (`POST /settings`). Every
//! known key maps to one [`SettingUpdate`] variant; unknown keys are rejected
//! with `AppError::NotFound` instead of being patched in by name.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Settings shared between the agent, the transport, and the HTTP routes.
pub type SharedSettings = Arc<RwLock<Settings>>;

/// Mutable agent behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Settings {
    /// Approve code-execution confirmations without asking.
    #[serde(default)]
    pub auto_run: bool,
    /// Require the peer to acknowledge every outbound chunk.
    #[serde(default)]
    pub require_acknowledge: bool,
    /// Echo produced chunks to the server console.
    #[serde(default = "default_true")]
    pub print_output: bool,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_run: false,
            require_acknowledge: false,
            print_output: true,
        }
    }
}

/// A single typed change to [`Settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingUpdate {
    /// Set `auto_run`.
    AutoRun(bool),
    /// Set `require_acknowledge`.
    RequireAcknowledge(bool),
    /// Set `print_output`.
    PrintOutput(bool),
}

impl SettingUpdate {
    /// Names of every known setting.
    pub const KEYS: [&'static str; 3] = ["auto_run", "require_acknowledge", "print_output"];

    /// Decode a `key = value` pair.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown keys and `AppError::Settings`
    /// when the value has the wrong type.
    pub fn parse(key: &str, value: &Value) -> Result<Self> {
        let flag = || {
            value
                .as_bool()
                .ok_or_else(|| AppError::Settings(format!("{key} must be a boolean")))
        };
        match key {
            "auto_run" => Ok(Self::AutoRun(flag()?)),
            "require_acknowledge" => Ok(Self::RequireAcknowledge(flag()?)),
            "print_output" => Ok(Self::PrintOutput(flag()?)),
            other => Err(AppError::NotFound(format!("setting {other}"))),
        }
    }

    /// Key this update targets.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::AutoRun(_) => "auto_run",
            Self::RequireAcknowledge(_) => "require_acknowledge",
            Self::PrintOutput(_) => "print_output",
        }
    }

    /// Whether the setting may be changed by a network peer.
    ///
    /// `auto_run` would let a remote caller approve arbitrary code execution,
    /// so it is only configurable from the config file.
    #[must_use]
    pub fn is_remotely_writable(self) -> bool {
        !matches!(self, Self::AutoRun(_))
    }
}

impl Settings {
    /// Apply one update.
    pub fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::AutoRun(on) => self.auto_run = on,
            SettingUpdate::RequireAcknowledge(on) => self.require_acknowledge = on,
            SettingUpdate::PrintOutput(on) => self.print_output = on,
        }
    }

    /// Read one setting by name.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown keys.
    pub fn get(&self, key: &str) -> Result<Value> {
        match key {
            "auto_run" => Ok(Value::Bool(self.auto_run)),
            "require_acknowledge" => Ok(Value::Bool(self.require_acknowledge)),
            "print_output" => Ok(Value::Bool(self.print_output)),
            other => Err(AppError::NotFound(format!("setting {other}"))),
        }
    }

    /// Wrap in the shared, lockable form.
    #[must_use]
    pub fn shared(self) -> SharedSettings {
        Arc::new(RwLock::new(self))
    }
}

/// Copy the current settings out of the shared cell.
#[must_use]
pub fn current(settings: &SharedSettings) -> Settings {
    *settings.read().unwrap_or_else(PoisonError::into_inner)
}

/// Validate and apply a batch of remote updates atomically.
///
/// Nothing is applied unless every pair decodes and is remotely writable.
///
/// # Errors
///
/// Returns the first decoding error, or `AppError::Unauthorized` for
/// settings that cannot be changed over the network.
pub fn apply_remote(
    settings: &SharedSettings,
    pairs: &serde_json::Map<String, Value>,
) -> Result<Vec<SettingUpdate>> {
    let updates = pairs
        .iter()
        .map(|(key, value)| SettingUpdate::parse(key, value))
        .collect::<Result<Vec<_>>>()?;
    if let Some(locked) = updates.iter().find(|update| !update.is_remotely_writable()) {
        return Err(AppError::Unauthorized(format!(
            "the setting {} is not modifiable through the server",
            locked.key()
        )));
    }
    let mut guard = settings.write().unwrap_or_else(PoisonError::into_inner);
    for update in &updates {
        guard.apply(*update);
    }
    Ok(updates)
}
