//! Content source descriptors.
//!
//! A source declares a glob-matched file population under a base directory
//! together with the callbacks that drive its cache lifecycle: `parse`
//! turns a path into a record, `on_cache_hit` fires with the entry on
//! every hit or fresh parse, `unlink` fires with the entry about to be
//! evicted. Callbacks receive [`LoadHandle`](crate::load::LoadHandle)
//! clones at registration time; there is no ambient registration target.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::types::{CacheEntry, ParseOutcome, SourceKind};

/// Boxed error type for user-supplied callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Parse callback: path in, [`ParseOutcome`] out.
pub type ParseFn = Box<dyn Fn(&Path, &SourceSpec) -> Result<ParseOutcome, CallbackError> + Send + Sync>;

/// Entry callback (`on_cache_hit` / `unlink`).
pub type EntryFn = Box<dyn Fn(&CacheEntry) + Send + Sync>;

/// Replace platform separators with `/`.
///
/// Cache keys, admission checks, and artifact mapping all operate on
/// normalized strings so the cache document is portable across platforms.
pub fn normalize_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}

fn segment_count(normalized: &str) -> usize {
    normalized.split('/').filter(|s| !s.is_empty()).count()
}

fn absolutize(path: PathBuf) -> Result<PathBuf, CoreError> {
    if path.is_absolute() {
        return Ok(path);
    }
    let cwd = std::env::current_dir().map_err(|e| io_err(&path, e))?;
    Ok(cwd.join(path))
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for one content source. `base`, `ext`, and `parse` are
/// required at construction; everything else is chainable.
pub struct SourceOptions {
    base: PathBuf,
    dist: Option<PathBuf>,
    folders: Option<Vec<PathBuf>>,
    ext: String,
    deep: bool,
    skip: usize,
    parse: ParseFn,
    on_cache_hit: Option<EntryFn>,
    unlink: Option<EntryFn>,
}

impl SourceOptions {
    pub fn new<F>(base: impl Into<PathBuf>, ext: impl Into<String>, parse: F) -> Self
    where
        F: Fn(&Path, &SourceSpec) -> Result<ParseOutcome, CallbackError> + Send + Sync + 'static,
    {
        Self {
            base: base.into(),
            dist: None,
            folders: None,
            ext: ext.into(),
            deep: true,
            skip: 0,
            parse: Box::new(parse),
            on_cache_hit: None,
            unlink: None,
        }
    }

    /// Destination directory for per-file artifacts (base→dist mapping).
    pub fn dist(mut self, dist: impl Into<PathBuf>) -> Self {
        self.dist = Some(dist.into());
        self
    }

    /// Watch folders, resolved relative to `base`. Defaults to `[base]`.
    pub fn folders(mut self, folders: Vec<PathBuf>) -> Self {
        self.folders = Some(folders);
        self
    }

    /// Recurse below the watch folders. Defaults to `true`.
    pub fn deep(mut self, deep: bool) -> Self {
        self.deep = deep;
        self
    }

    /// Minimum component depth below the first watch folder, exclusive.
    /// Defaults to `0` (admit everything inside the folder).
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Invoked with the entry on every cache hit and after every fresh parse.
    pub fn on_cache_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        self.on_cache_hit = Some(Box::new(f));
        self
    }

    /// Invoked with the entry about to be evicted.
    pub fn unlink<F>(mut self, f: F) -> Self
    where
        F: Fn(&CacheEntry) + Send + Sync + 'static,
    {
        self.unlink = Some(Box::new(f));
        self
    }
}

// ---------------------------------------------------------------------------
// Spec
// ---------------------------------------------------------------------------

/// A fully resolved content source.
pub struct SourceSpec {
    pub kind: SourceKind,
    /// Absolute base directory.
    pub base: PathBuf,
    /// Absolute artifact destination, if any.
    pub dist: Option<PathBuf>,
    /// Absolute watch folders; never empty, first folder anchors admission.
    pub folders: Vec<PathBuf>,
    /// Derived glob-style patterns, one per folder.
    pub patterns: Vec<String>,
    pub ext: String,
    pub deep: bool,
    pub skip: usize,
    parse: ParseFn,
    on_cache_hit: Option<EntryFn>,
    unlink: Option<EntryFn>,
}

impl fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceSpec")
            .field("kind", &self.kind)
            .field("base", &self.base)
            .field("dist", &self.dist)
            .field("folders", &self.folders)
            .field("patterns", &self.patterns)
            .field("ext", &self.ext)
            .field("deep", &self.deep)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

impl SourceSpec {
    /// Resolve options into a spec. Fails fast on misconfiguration, before
    /// any build or watch starts.
    pub fn resolve(kind: SourceKind, options: SourceOptions) -> Result<Self, CoreError> {
        if options.base.as_os_str().is_empty() {
            return Err(CoreError::EmptyBase);
        }
        if options.ext.is_empty() || !options.ext.starts_with('.') {
            return Err(CoreError::InvalidExtension { ext: options.ext });
        }

        let base = absolutize(options.base)?;
        let dist = options.dist.map(absolutize).transpose()?;
        let folders = match options.folders {
            Some(folders) => folders.into_iter().map(|f| base.join(f)).collect(),
            None => vec![base.clone()],
        };

        let patterns = folders
            .iter()
            .map(|folder| {
                let stem = if options.deep { "**/*" } else { "*" };
                format!("{}/{}{}", normalize_path(folder), stem, options.ext)
            })
            .collect();

        Ok(Self {
            kind,
            base,
            dist,
            folders,
            patterns,
            ext: options.ext,
            deep: options.deep,
            skip: options.skip,
            parse: options.parse,
            on_cache_hit: options.on_cache_hit,
            unlink: options.unlink,
        })
    }

    /// Does the normalized path carry this source's extension?
    pub fn matches_ext(&self, normalized: &str) -> bool {
        normalized.ends_with(&self.ext)
    }

    /// Admission filter: component depth below the first watch folder must
    /// strictly exceed `skip`. A file directly inside the folder has
    /// depth 1.
    pub fn admits(&self, normalized: &str) -> bool {
        let anchor = normalize_path(&self.folders[0]);
        let depth = segment_count(normalized).saturating_sub(segment_count(&anchor));
        self.skip < depth
    }

    /// Is the path inside one of the watch folders, honoring the `deep`
    /// boundary? With `deep = false`, paths below the immediate folder are
    /// out of scope.
    pub fn within_scope(&self, normalized: &str) -> bool {
        self.folders.iter().any(|folder| {
            let folder = normalize_path(folder);
            if !normalized.starts_with(&format!("{folder}/")) {
                return false;
            }
            self.deep || segment_count(normalized) == segment_count(&folder) + 1
        })
    }

    /// Artifact destination for a source path: base→dist substitution,
    /// source extension→`.json`.
    pub fn artifact_path(&self, path: &Path) -> Result<PathBuf, CoreError> {
        let Some(dist) = &self.dist else {
            return Err(CoreError::MissingDist {
                base: self.base.clone(),
            });
        };
        let relative = path.strip_prefix(&self.base).map_err(|_| {
            io_err(
                path,
                std::io::Error::other("source path is outside the base directory"),
            )
        })?;

        let name = normalize_path(relative);
        let swapped = match name.strip_suffix(&self.ext) {
            Some(stem) => format!("{stem}.json"),
            None => format!("{name}.json"),
        };
        Ok(dist.join(swapped))
    }

    /// Write `data` as the artifact for `path`.
    pub fn output<T: serde::Serialize>(&self, path: &Path, data: &T) -> Result<(), CoreError> {
        let out = self.artifact_path(path)?;
        tracing::debug!(path = %out.display(), "writing source artifact");
        crate::json::write_json(&out, data)
    }

    /// Run the parse callback.
    pub fn parse(&self, path: &Path) -> Result<ParseOutcome, CallbackError> {
        (self.parse)(path, self)
    }

    /// Fire the cache-hit callback, if registered.
    pub fn cache_hit(&self, entry: &CacheEntry) {
        if let Some(f) = &self.on_cache_hit {
            f(entry);
        }
    }

    /// Fire the unlink callback, if registered.
    pub fn unlinked(&self, entry: &CacheEntry) {
        if let Some(f) = &self.unlink {
            f(entry);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
