//! JSON document read/write helpers.
//!
//! Writes use an atomic `.tmp` sibling + rename, the same protocol every
//! Spirea document (cache table, per-file artifacts, load outputs) goes
//! through. The `.tmp` lives next to the target so the rename never
//! crosses filesystems.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{io_err, CoreError};

/// Read and deserialize a JSON document.
///
/// Returns `CoreError::Parse` with the file path on malformed JSON.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_json::from_str(&contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically serialize `value` to `path` as pretty-printed JSON.
///
/// Creates parent directories, writes to `<path>.spirea.tmp`, then renames
/// over the target. On rename failure the `.tmp` is removed so no partial
/// document is left behind.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }

    let json = serde_json::to_string_pretty(value)?;
    let tmp = PathBuf::from(format!("{}.spirea.tmp", path.display()));
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}
