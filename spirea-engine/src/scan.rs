//! Filesystem enumeration for build passes.
//!
//! Walks each watch folder (depth-limited for shallow sources), keeps
//! paths that carry the source extension and pass admission, and returns
//! them sorted lexicographically so a pass is deterministic.

use std::path::PathBuf;

use walkdir::WalkDir;

use spirea_core::{normalize_path, SourceSpec};

/// Enumerate every admitted path for `source`.
///
/// A watch folder that does not exist yet contributes nothing; unreadable
/// entries are skipped with a warning rather than failing the pass.
pub fn enumerate(source: &SourceSpec) -> Vec<PathBuf> {
    let mut matched: Vec<(String, PathBuf)> = Vec::new();

    for folder in &source.folders {
        if !folder.exists() {
            continue;
        }

        let walker = if source.deep {
            WalkDir::new(folder)
        } else {
            WalkDir::new(folder).max_depth(1)
        };

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unreadable entry during scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let normalized = normalize_path(entry.path());
            if !source.matches_ext(&normalized) || !source.admits(&normalized) {
                continue;
            }
            matched.push((normalized, entry.into_path()));
        }
    }

    matched.sort_by(|(a, _), (b, _)| a.cmp(b));
    matched.dedup_by(|(a, _), (b, _)| a == b);
    matched.into_iter().map(|(_, path)| path).collect()
}
