//! Persistence for the alerting configuration.
//!
//! The configuration is an opaque JSON blob. Every save gets the next version
//! number; only the latest version is served.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AlertmanagerError, Result};

/// A saved configuration blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfiguration {
    /// Version assigned by the store, starting at 1.
    pub version: u64,
    /// The raw JSON document.
    pub raw: String,
    /// When it was saved.
    pub created_at: DateTime<Utc>,
}

/// Where configuration blobs are kept.
pub trait ConfigStore: Send + Sync {
    /// Returns the latest saved configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::NoConfiguration` if nothing was saved yet,
    /// or `AlertmanagerError::Storage` on I/O failure.
    fn get_latest(&self) -> Result<StoredConfiguration>;

    /// Saves a new version and returns its number.
    ///
    /// # Errors
    ///
    /// Returns `AlertmanagerError::Storage` on I/O failure.
    fn save(&self, raw: &str) -> Result<u64>;
}

/// Keeps the latest configuration in memory.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    latest: Mutex<Option<StoredConfiguration>>,
}

impl InMemoryConfigStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get_latest(&self) -> Result<StoredConfiguration> {
        self.latest
            .lock()
            .clone()
            .ok_or(AlertmanagerError::NoConfiguration)
    }

    fn save(&self, raw: &str) -> Result<u64> {
        let mut latest = self.latest.lock();
        let version = latest.as_ref().map_or(0, |c| c.version) + 1;
        *latest = Some(StoredConfiguration {
            version,
            raw: raw.to_string(),
            created_at: Utc::now(),
        });
        Ok(version)
    }
}

/// Keeps the latest configuration in a JSON snapshot file.
///
/// Writes go to a temporary file that is renamed over the snapshot, so a
/// crash mid-write leaves the previous version intact.
#[derive(Debug)]
pub struct JsonFileConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileConfigStore {
    /// Creates a store at `path`. The file is created on first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the snapshot path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<StoredConfiguration>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage(&self.path, &e)),
        };
        let stored = serde_json::from_str(&data).map_err(|e| AlertmanagerError::Storage {
            reason: format!("corrupt snapshot {}: {e}", self.path.display()),
        })?;
        Ok(Some(stored))
    }
}

fn storage(path: &Path, err: &std::io::Error) -> AlertmanagerError {
    AlertmanagerError::Storage {
        reason: format!("{}: {err}", path.display()),
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn get_latest(&self) -> Result<StoredConfiguration> {
        let _guard = self.lock.lock();
        self.read()?.ok_or(AlertmanagerError::NoConfiguration)
    }

    fn save(&self, raw: &str) -> Result<u64> {
        let _guard = self.lock.lock();
        let version = self.read()?.map_or(0, |c| c.version) + 1;
        let stored = StoredConfiguration {
            version,
            raw: raw.to_string(),
            created_at: Utc::now(),
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| storage(parent, &e))?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(&stored)?;
        fs::write(&tmp, data).map_err(|e| storage(&tmp, &e))?;
        fs::rename(&tmp, &self.path).map_err(|e| storage(&self.path, &e))?;

        debug!(path = %self.path.display(), version, "saved alerting configuration");
        Ok(version)
    }
}
