// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Activity persistence.
//!
//! The last-activity timestamp is the only piece of session state that
//! survives a reload. A second, per-identity key mirrors the remaining
//! seconds for cross-tab visibility and debugging; it is never read back by
//! the guard.
//!
//! Values are stored as strings under well-known keys, RFC 3339 with
//! millisecond precision for timestamps.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::locks::{resilient_read, resilient_write};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("activity store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("activity store is corrupt: {0}")]
    Corrupt(String),
}

/// Key namespace for persisted session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageKeys {
    pub last_activity: String,
    pub remaining_prefix: String,
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self {
            last_activity: "farmgate.lastActivity".to_string(),
            remaining_prefix: "farmgate.remaining.".to_string(),
        }
    }
}

impl StorageKeys {
    pub fn remaining_key(&self, identity_id: &str) -> String {
        format!("{}{}", self.remaining_prefix, identity_id)
    }
}

pub trait ActivityStore {
    /// Persisted last-activity timestamp, `None` if never written or cleared.
    fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    fn record_activity(&self, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Non-authoritative mirror of the countdown.
    fn record_remaining(&self, identity_id: &str, remaining_secs: u64) -> Result<(), StoreError>;

    /// Remove every session-local key. Keys outside the namespace are kept.
    fn clear(&self) -> Result<(), StoreError>;
}

type Entries = BTreeMap<String, String>;

fn read_timestamp(entries: &Entries, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let Some(raw) = entries.get(key) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|_| StoreError::Corrupt(format!("{} holds '{}'", key, raw)))
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn clear_session(entries: &mut Entries, keys: &StorageKeys) {
    entries.remove(&keys.last_activity);
    entries.retain(|key, _| !key.starts_with(&keys.remaining_prefix));
}

/// Process-local store. Clones share the same entries, which is how tests
/// model a page reload: a new guard over a clone of the old store.
#[derive(Debug, Clone, Default)]
pub struct MemoryActivityStore {
    entries: Arc<RwLock<Entries>>,
    keys: StorageKeys,
}

impl MemoryActivityStore {
    pub fn new(keys: StorageKeys) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::new())),
            keys,
        }
    }

    pub fn keys(&self) -> &StorageKeys {
        &self.keys
    }

    pub fn get(&self, key: &str) -> Option<String> {
        resilient_read(&self.entries).get(key).cloned()
    }

    /// Write a raw value, bypassing formatting.
    pub fn set_raw(&self, key: impl Into<String>, value: impl Into<String>) {
        resilient_write(&self.entries).insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        resilient_read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ActivityStore for MemoryActivityStore {
    fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        read_timestamp(&resilient_read(&self.entries), &self.keys.last_activity)
    }

    fn record_activity(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        resilient_write(&self.entries)
            .insert(self.keys.last_activity.clone(), format_timestamp(at));
        Ok(())
    }

    fn record_remaining(&self, identity_id: &str, remaining_secs: u64) -> Result<(), StoreError> {
        resilient_write(&self.entries)
            .insert(self.keys.remaining_key(identity_id), remaining_secs.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        clear_session(&mut resilient_write(&self.entries), &self.keys);
        Ok(())
    }
}

/// JSON file store. Survives process restarts the way browser storage
/// survives a page reload. Every read goes to disk so a second process
/// sharing the file sees the latest activity.
#[derive(Debug, Clone)]
pub struct FileActivityStore {
    path: PathBuf,
    keys: StorageKeys,
}

impl FileActivityStore {
    pub fn new(path: impl Into<PathBuf>, keys: StorageKeys) -> Self {
        Self {
            path: path.into(),
            keys,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Entries, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(Entries::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                StoreError::Corrupt(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, entries: &Entries) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        // Write-then-rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Entries)) -> Result<(), StoreError> {
        let mut entries = self.load()?;
        apply(&mut entries);
        self.save(&entries)
    }
}

impl ActivityStore for FileActivityStore {
    fn last_activity(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        read_timestamp(&self.load()?, &self.keys.last_activity)
    }

    fn record_activity(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(self.keys.last_activity.clone(), format_timestamp(at));
        })
    }

    fn record_remaining(&self, identity_id: &str, remaining_secs: u64) -> Result<(), StoreError> {
        self.update(|entries| {
            entries.insert(self.keys.remaining_key(identity_id), remaining_secs.to_string());
        })
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.update(|entries| clear_session(entries, &self.keys))
    }
}
