//! Cache store — per-signature path→entry table.
//!
//! Persists a `CacheFile` JSON document at
//! `<home>/.spirea/cache/<signature>.json`. Writes use the same atomic
//! `.tmp` + rename pattern as every other Spirea document. A missing or
//! corrupt document is recovered as an empty table, never fatal: a cold
//! start just re-parses everything.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use spirea_core::{json, CacheEntry, Signature};

use crate::error::{io_err, EngineError};

// ---------------------------------------------------------------------------
// Build mode
// ---------------------------------------------------------------------------

/// Retention and trust policy for the cache table.
///
/// Development trusts matching fingerprints and persists the table across
/// runs for warm incremental builds. Production never trusts an entry and
/// deletes the document on persist, so the next cold start is a guaranteed
/// clean rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Development,
    Production,
}

impl BuildMode {
    /// Read the mode from `SPIREA_ENV` (`"development"` ⇒ Development,
    /// anything else ⇒ Production).
    pub fn from_env() -> Self {
        match std::env::var("SPIREA_ENV").as_deref() {
            Ok("development") => BuildMode::Development,
            _ => BuildMode::Production,
        }
    }

    /// May a matching fingerprint skip the parse callback?
    pub fn trusts_cache(self) -> bool {
        matches!(self, BuildMode::Development)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// On-disk cache payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    generated_at: DateTime<Utc>,
    entries: HashMap<String, CacheEntry>,
}

/// In-memory cache table bound to one signature's document.
#[derive(Debug)]
pub struct CacheStore {
    path: PathBuf,
    mode: BuildMode,
    entries: HashMap<String, CacheEntry>,
}

/// Path to the cache document for a signature, rooted at `home`.
///
/// `~/.spirea/cache/<signature>.json`
pub fn cache_path_at(home: &Path, signature: &Signature) -> PathBuf {
    home.join(".spirea")
        .join("cache")
        .join(format!("{signature}.json"))
}

impl CacheStore {
    /// Open the store for `signature`, loading any existing table.
    ///
    /// Never fails: a missing document starts empty, a corrupt one is
    /// recovered as empty with a warning.
    pub fn open_at(home: &Path, signature: &Signature, mode: BuildMode) -> Self {
        let path = cache_path_at(home, signature);
        let entries = match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<CacheFile>(&contents) {
                Ok(file) => file.entries,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "corrupt cache document; starting with an empty table",
                    );
                    HashMap::new()
                }
            },
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "unreadable cache document; starting with an empty table",
                    );
                }
                HashMap::new()
            }
        };
        Self {
            path,
            mode,
            entries,
        }
    }

    /// `open_at` convenience wrapper using `dirs::home_dir()`.
    pub fn open(signature: &Signature, mode: BuildMode) -> Result<Self, EngineError> {
        let home = dirs::home_dir().ok_or(EngineError::HomeNotFound)?;
        Ok(Self::open_at(&home, signature, mode))
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: String, entry: CacheEntry) {
        self.entries.insert(key, entry);
    }

    pub fn delete(&mut self, key: &str) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist once per batch of changes: write the whole table in
    /// Development mode, delete the document in Production mode.
    pub fn persist(&self) -> Result<(), EngineError> {
        if self.mode.trusts_cache() {
            let file = CacheFile {
                generated_at: Utc::now(),
                entries: self.entries.clone(),
            };
            json::write_json(&self.path, &file)?;
            return Ok(());
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(&self.path, err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
