//! Derived load descriptors.
//!
//! A load is an aggregated JSON document built incrementally by callbacks
//! fired while sources are processed. The in-memory value sits behind a
//! mutex; callbacks hold cloned [`LoadHandle`]s and every mutation goes
//! through the lock, so concurrent application is serialized. When two
//! mutations target the same key, last write wins — that is the contract,
//! not a defect.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use crate::error::CoreError;
use crate::json;
use crate::types::LoadName;

/// Fold applied when a load's value is replaced: `(new, old) -> merged`.
/// `old` is `None` for the registration-time seed.
pub type UpdateFn = Box<dyn Fn(Value, Option<Value>) -> Value + Send + Sync>;

/// Render transform applied to a clone of the value before every output.
pub type RenderFn = Box<dyn Fn(&Value) -> Value + Send + Sync>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for one load. Only `out` is required.
pub struct LoadOptions {
    src: Option<PathBuf>,
    out: PathBuf,
    default_value: Value,
    update: Option<UpdateFn>,
    before_output: Option<RenderFn>,
}

impl LoadOptions {
    pub fn new(out: impl Into<PathBuf>) -> Self {
        Self {
            src: None,
            out: out.into(),
            default_value: Value::Object(serde_json::Map::new()),
            update: None,
            before_output: None,
        }
    }

    /// External JSON document to seed from and re-read on change.
    pub fn src(mut self, src: impl Into<PathBuf>) -> Self {
        self.src = Some(src.into());
        self
    }

    /// Seed value when no source file is present. Defaults to `{}`.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = value;
        self
    }

    /// Fold merging a replacement value into the previous one.
    pub fn update<F>(mut self, f: F) -> Self
    where
        F: Fn(Value, Option<Value>) -> Value + Send + Sync + 'static,
    {
        self.update = Some(Box::new(f));
        self
    }

    /// Transform applied to a clone of the value before every output.
    pub fn before_output<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.before_output = Some(Box::new(f));
        self
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

struct LoadInner {
    name: LoadName,
    src: Option<PathBuf>,
    out: PathBuf,
    value: Mutex<Value>,
    update: Option<UpdateFn>,
    before_output: Option<RenderFn>,
}

/// Shared handle to a registered load. Cheap to clone; callbacks capture
/// the clones they were given at registration.
#[derive(Clone)]
pub struct LoadHandle(Arc<LoadInner>);

impl fmt::Debug for LoadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadHandle")
            .field("name", &self.0.name)
            .field("src", &self.0.src)
            .field("out", &self.0.out)
            .finish_non_exhaustive()
    }
}

impl LoadHandle {
    /// Resolve options into a live handle.
    ///
    /// Seeds the value from `src` when that file exists (a malformed seed
    /// document is a fatal registration error), else from the default,
    /// then runs the fold once so the value reflects a fold result from
    /// the start.
    pub fn resolve(name: LoadName, options: LoadOptions) -> Result<Self, CoreError> {
        if options.out.as_os_str().is_empty() {
            return Err(CoreError::EmptyLoadOut { name: name.0 });
        }

        let seed = match &options.src {
            Some(src) if src.exists() => json::read_json(src)?,
            _ => options.default_value,
        };
        let value = match &options.update {
            Some(update) => update(seed, None),
            None => seed,
        };

        Ok(Self(Arc::new(LoadInner {
            name,
            src: options.src,
            out: options.out,
            value: Mutex::new(value),
            update: options.update,
            before_output: options.before_output,
        })))
    }

    pub fn name(&self) -> &LoadName {
        &self.0.name
    }

    pub fn src(&self) -> Option<&Path> {
        self.0.src.as_deref()
    }

    pub fn out(&self) -> &Path {
        &self.0.out
    }

    fn lock(&self) -> MutexGuard<'_, Value> {
        match self.0.value.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mutate the value under the lock. This is the only write path
    /// callbacks get.
    pub fn mutate(&self, f: impl FnOnce(&mut Value)) {
        f(&mut self.lock());
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> Value {
        self.lock().clone()
    }

    /// Replace the value with `new` folded against the previous value.
    pub fn fold(&self, new: Value) {
        let mut guard = self.lock();
        let old = guard.clone();
        *guard = match &self.0.update {
            Some(update) => update(new, Some(old)),
            None => new,
        };
    }

    /// The value as it would be persisted: render transform applied to a
    /// clone, the in-memory value untouched.
    pub fn rendered(&self) -> Value {
        let snapshot = self.lock().clone();
        match &self.0.before_output {
            Some(render) => render(&snapshot),
            None => snapshot,
        }
    }

    /// Write the rendered value to the declared output path.
    pub fn output(&self) -> Result<(), CoreError> {
        let rendered = self.rendered();
        tracing::debug!(load = %self.0.name, path = %self.0.out.display(), "writing load output");
        json::write_json(&self.0.out, &rendered)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
