//! Local Balance Cache
//!
//! Last known balance on disk, shown before the account API answers.
//! Best effort: every failure is logged and swallowed.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cached balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBalance {
    /// Balance as last read from the account API.
    pub balance: u64,
    /// When it was read.
    pub updated_at: DateTime<Utc>,
}

/// JSON file holding one [`CachedBalance`].
#[derive(Debug, Clone)]
pub struct BalanceCache {
    path: PathBuf,
}

impl BalanceCache {
    /// Cache stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached balance, if any.
    pub fn load(&self) -> Option<CachedBalance> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read balance cache: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(cached) => Some(cached),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring corrupt balance cache: {}", e);
                None
            }
        }
    }

    /// Record `balance` as of now.
    pub fn store(&self, balance: u64) {
        self.store_record(&CachedBalance {
            balance,
            updated_at: Utc::now(),
        });
    }

    /// Write a full record.
    pub fn store_record(&self, record: &CachedBalance) {
        if let Some(parent) = self.path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), "Failed to create cache directory: {}", e);
                return;
            }
        }
        let text = match serde_json::to_string(record) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode balance cache: {}", e);
                return;
            }
        };
        match fs::write(&self.path, text) {
            Ok(()) => debug!(balance = record.balance, "Balance cached"),
            Err(e) => warn!(path = %self.path.display(), "Failed to write balance cache: {}", e),
        }
    }
}
