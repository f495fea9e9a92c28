// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loaded from `~/.farmgate/config.json`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! The envelope secret never lives in the file; it comes from
//! [`SECRET_ENV_VAR`] at startup.
//!
//! ```json
//! {
//!   "session": { "idle_window_secs": 900, "tick_interval_ms": 970 },
//!   "envelope": { "key_id": "k2", "retired_key_ids": ["k1"], "ttl_secs": 3600 },
//!   "identity_url": "https://records.example.org/api/me"
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::envelope::{EnvelopeCodec, EnvelopeError, SigningKey, DEFAULT_KEY_ID};
use crate::error::GuardError;
use crate::security::{SessionConfig, StorageKeys};

/// Environment variable holding the envelope signing secret.
pub const SECRET_ENV_VAR: &str = "FARMGATE_ENVELOPE_SECRET";

const CONFIG_FILE: &str = "config.json";
const ACTIVITY_FILE: &str = "activity.json";

/// Ten years. Longer lifetimes are clamped.
const MAX_TTL_SECS: u64 = 10 * 365 * 86_400;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub storage: StorageKeys,

    #[serde(default)]
    pub envelope: EnvelopeSettings,

    /// Identity query endpoint. Without it the CLI reads identities from a file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_url: Option<String>,

    /// Where `watch` persists activity. Defaults to `~/.farmgate/activity.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSettings {
    #[serde(default = "default_key_id")]
    pub key_id: String,

    #[serde(default)]
    pub retired_key_ids: Vec<String>,

    /// Lifetime of sealed envelopes. `None` means they never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

fn default_key_id() -> String {
    DEFAULT_KEY_ID.to_string()
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            key_id: default_key_id(),
            retired_key_ids: Vec::new(),
            ttl_secs: None,
        }
    }
}

impl EnvelopeSettings {
    /// Build the process-wide codec from these settings and the secret.
    pub fn codec(&self, secret: &str) -> Result<EnvelopeCodec, EnvelopeError> {
        let key = SigningKey::new(self.key_id.clone(), secret)?;
        Ok(EnvelopeCodec::new(key).with_retired_keys(self.retired_key_ids.iter().cloned()))
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs
            .map(|secs| Duration::seconds(secs.min(MAX_TTL_SECS) as i64))
    }
}

impl GuardConfig {
    /// Activity file path, falling back to the config directory.
    pub fn activity_path(&self) -> Result<PathBuf, GuardError> {
        match &self.activity_file {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(ACTIVITY_FILE)),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), GuardError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| GuardError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

/// `~/.farmgate`. Not created until something is written.
pub fn config_dir() -> Result<PathBuf, GuardError> {
    let home = dirs::home_dir()
        .ok_or_else(|| GuardError::Config("could not find home directory".to_string()))?;
    Ok(home.join(".farmgate"))
}

pub fn config_path() -> Result<PathBuf, GuardError> {
    Ok(config_dir()?.join(CONFIG_FILE))
}

pub fn load_config() -> Result<GuardConfig, GuardError> {
    load_config_from(&config_path()?)
}

/// Load and validate. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<GuardConfig, GuardError> {
    let mut config: GuardConfig = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| GuardError::Config(format!("{}: {}", path.display(), e)))?
    } else {
        tracing::debug!("CONFIG_DEFAULTS | path={} reason=missing", path.display());
        GuardConfig::default()
    };

    config.session = config.session.validated();
    Ok(config)
}

pub fn save_config(config: &GuardConfig) -> Result<(), GuardError> {
    config.save_to(&config_path()?)
}

/// Read the signing secret from the environment.
pub fn secret_from_env() -> Result<String, GuardError> {
    secret_from(std::env::var(SECRET_ENV_VAR).ok())
}

fn secret_from(value: Option<String>) -> Result<String, GuardError> {
    match value {
        Some(secret) if !secret.trim().is_empty() => Ok(secret),
        _ => Err(GuardError::Config(format!(
            "{} is not set (generate one with `farmgate keygen`)",
            SECRET_ENV_VAR
        ))),
    }
}
