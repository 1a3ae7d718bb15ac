//! Parse/add/unlink state machine.
//!
//! Per-path lifecycle:
//!
//! ```text
//! Untracked --(add/change producing data)--> Tracked(fp)
//! Tracked(fp) --(change, same fp, dev mode)--> Tracked(fp)   [unchanged]
//! Tracked(fp) --(change, new fp)--> Tracked(fp')
//! Tracked --(unlink event OR Retract parse result)--> Untracked
//! ```
//!
//! The fingerprint hashes the file's mtime, not its contents: change
//! detection is a metadata read plus one digest, never a full read.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use spirea_core::{normalize_path, CacheEntry, ParseOutcome, Record, SourceSpec};

use crate::cache::CacheStore;
use crate::error::{io_err, EngineError};

/// Whether an operation changed the tracked state. Unchanged operations
/// suppress persist and re-render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Changed,
    Unchanged,
}

impl ProcessOutcome {
    pub fn is_changed(self) -> bool {
        matches!(self, ProcessOutcome::Changed)
    }
}

/// SHA-256 hex digest of the path's mtime in Unix milliseconds.
pub fn fingerprint(path: &Path) -> Result<String, EngineError> {
    let meta = std::fs::metadata(path).map_err(|e| io_err(path, e))?;
    let modified = meta.modified().map_err(|e| io_err(path, e))?;
    let millis = modified
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut hasher = Sha256::new();
    hasher.update(millis.to_string().as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Parse one path: fingerprint, cache-trust short circuit, callback
/// dispatch, entry replacement.
pub fn parse(
    cache: &mut CacheStore,
    source: &SourceSpec,
    path: &Path,
) -> Result<ProcessOutcome, EngineError> {
    let key = normalize_path(path);
    let fp = fingerprint(path)?;

    if cache.mode().trusts_cache() {
        if let Some(entry) = cache.get(&key) {
            if entry.fingerprint == fp {
                tracing::debug!(path = %key, "cache hit");
                source.cache_hit(entry);
                return Ok(ProcessOutcome::Unchanged);
            }
        }
    }

    let outcome = source.parse(path).map_err(|e| EngineError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;

    let data = match outcome {
        ParseOutcome::Record(data) => data,
        ParseOutcome::Empty => Record::new(),
        ParseOutcome::Retract => {
            // The path exists but now produces nothing; treat like unlink.
            tracing::debug!(path = %key, "parse retracted");
            return unlink(cache, source, path);
        }
    };

    let entry = CacheEntry::new(fp, data);
    source.cache_hit(&entry);
    cache.set(key.clone(), entry);
    tracing::debug!(path = %key, "parsed");
    Ok(ProcessOutcome::Changed)
}

/// Handle an add event. An add racing an already-tracked path is not an
/// error; it is simply unchanged.
pub fn add(
    cache: &mut CacheStore,
    source: &SourceSpec,
    path: &Path,
) -> Result<ProcessOutcome, EngineError> {
    let key = normalize_path(path);
    if cache.get(&key).is_some() {
        tracing::debug!(path = %key, "add for tracked path; nothing to do");
        return Ok(ProcessOutcome::Unchanged);
    }
    parse(cache, source, path)
}

/// Handle an unlink event: fire the descriptor's callback with the entry
/// about to be removed, then evict it.
pub fn unlink(
    cache: &mut CacheStore,
    source: &SourceSpec,
    path: &Path,
) -> Result<ProcessOutcome, EngineError> {
    let key = normalize_path(path);
    let Some(entry) = cache.delete(&key) else {
        tracing::debug!(path = %key, "unlink for untracked path; nothing to do");
        return Ok(ProcessOutcome::Unchanged);
    };
    source.unlinked(&entry);
    tracing::debug!(path = %key, "untracked");
    Ok(ProcessOutcome::Changed)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
