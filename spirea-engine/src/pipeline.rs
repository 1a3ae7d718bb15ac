//! Pipeline: registered descriptors bound to one signature's cache store,
//! with the one-shot build pass and the per-event reconciliation entry the
//! watch runner drives.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use spirea_core::{normalize_path, CoreError, LoadHandle, Registrar, Signature, SourceSpec};

use crate::cache::{BuildMode, CacheStore};
use crate::error::EngineError;
use crate::process::{self, ProcessOutcome};
use crate::scan;

/// A filesystem event kind routed to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    Add,
    Change,
    Unlink,
}

impl fmt::Display for SourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceEvent::Add => write!(f, "add"),
            SourceEvent::Change => write!(f, "change"),
            SourceEvent::Unlink => write!(f, "unlink"),
        }
    }
}

/// Outcome of one full build pass.
#[derive(Debug)]
pub struct BuildSummary {
    pub signature: String,
    /// Paths parsed fresh or untracked during the pass.
    pub changed: usize,
    /// Paths satisfied from the cache.
    pub unchanged: usize,
    /// Per-path races (file vanished between enumeration and metadata
    /// read). The pass itself still succeeds.
    pub errors: Vec<(PathBuf, String)>,
    pub duration_ms: u64,
}

/// One pipeline: a signature, the frozen descriptors, and the bound cache.
///
/// Structurally immutable after creation — only cache entries and load
/// values mutate during build/watch.
#[derive(Debug)]
pub struct Pipeline {
    signature: Signature,
    sources: Vec<SourceSpec>,
    loads: Vec<LoadHandle>,
    cache: CacheStore,
}

impl Pipeline {
    /// Create a pipeline rooted at `home`: run the setup closure against a
    /// fresh [`Registrar`], freeze the descriptors, open the cache store.
    ///
    /// Registration errors surface here, before any build or watch starts.
    pub fn create_at<F>(
        home: &Path,
        signature: impl Into<Signature>,
        mode: BuildMode,
        setup: F,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce(&mut Registrar) -> Result<(), CoreError>,
    {
        let signature = signature.into();
        let mut registrar = Registrar::new();
        setup(&mut registrar)?;
        let (sources, loads) = registrar.finish();

        let cache = CacheStore::open_at(home, &signature, mode);
        tracing::debug!(
            signature = %signature,
            sources = sources.len(),
            loads = loads.len(),
            cached = cache.len(),
            "pipeline created",
        );

        Ok(Self {
            signature,
            sources,
            loads,
            cache,
        })
    }

    /// `create_at` convenience wrapper using `dirs::home_dir()`.
    pub fn create<F>(
        signature: impl Into<Signature>,
        mode: BuildMode,
        setup: F,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce(&mut Registrar) -> Result<(), CoreError>,
    {
        let home = dirs::home_dir().ok_or(EngineError::HomeNotFound)?;
        Self::create_at(&home, signature, mode, setup)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn loads(&self) -> &[LoadHandle] {
        &self.loads
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// One-shot build pass: enumerate and parse every admitted path of
    /// every source in kind order, then persist the cache and render every
    /// load.
    ///
    /// A parse callback failure aborts the pass; a vanished-path race is
    /// recorded in the summary and the pass continues.
    pub fn build(&mut self) -> Result<BuildSummary, EngineError> {
        let started = Instant::now();
        let mut changed = 0usize;
        let mut unchanged = 0usize;
        let mut errors = Vec::new();

        for source in &self.sources {
            for path in scan::enumerate(source) {
                match process::parse(&mut self.cache, source, &path) {
                    Ok(ProcessOutcome::Changed) => changed += 1,
                    Ok(ProcessOutcome::Unchanged) => unchanged += 1,
                    Err(EngineError::Io { path: p, source: io })
                        if io.kind() == std::io::ErrorKind::NotFound =>
                    {
                        tracing::warn!(path = %p.display(), "path vanished during build pass");
                        errors.push((p, io.to_string()));
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        self.cache.persist()?;
        self.render_loads()?;

        let duration = started.elapsed();
        tracing::info!(
            signature = %self.signature,
            changed,
            unchanged,
            duration_ms = duration.as_millis() as u64,
            "build",
        );

        Ok(BuildSummary {
            signature: self.signature.0.clone(),
            changed,
            unchanged,
            errors,
            duration_ms: duration.as_millis() as u64,
        })
    }

    /// Reconcile one filesystem event against the source at
    /// `source_index`.
    ///
    /// Paths that fail the extension, scope, or admission checks are
    /// rejected as unchanged. A changed outcome persists the cache,
    /// renders every load, and emits the event's success signal; an
    /// unchanged outcome suppresses re-render entirely.
    pub fn reconcile(
        &mut self,
        source_index: usize,
        event: SourceEvent,
        path: &Path,
    ) -> Result<ProcessOutcome, EngineError> {
        let source = &self.sources[source_index];
        let normalized = normalize_path(path);

        if !source.matches_ext(&normalized)
            || !source.within_scope(&normalized)
            || !source.admits(&normalized)
        {
            tracing::debug!(path = %normalized, %event, "event rejected by source filters");
            return Ok(ProcessOutcome::Unchanged);
        }

        let outcome = match event {
            SourceEvent::Add => process::add(&mut self.cache, source, path)?,
            SourceEvent::Change => process::parse(&mut self.cache, source, path)?,
            SourceEvent::Unlink => process::unlink(&mut self.cache, source, path)?,
        };

        if outcome.is_changed() {
            self.cache.persist()?;
            self.render_loads()?;
            tracing::info!(signature = %self.signature, %event, path = %normalized, "reconciled");
        }
        Ok(outcome)
    }

    /// Re-read the external source document of the load at `load_index`,
    /// fold it into the value, and render only that load.
    pub fn reload_load(&self, load_index: usize) -> Result<(), EngineError> {
        let load = &self.loads[load_index];
        let Some(src) = load.src() else {
            return Ok(());
        };

        let new = spirea_core::json::read_json(src)?;
        load.fold(new);
        load.output()?;
        tracing::info!(
            signature = %self.signature,
            load = %load.name(),
            src = %src.display(),
            "load source reloaded",
        );
        Ok(())
    }

    /// Render every load in registration order.
    fn render_loads(&self) -> Result<(), EngineError> {
        for load in &self.loads {
            load.output()?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use serde_json::json;
    use tempfile::TempDir;

    use spirea_core::{LoadOptions, ParseOutcome, Record, SourceKind, SourceOptions};

    #[test]
    fn registration_error_aborts_creation() {
        let home = TempDir::new().unwrap();
        let result = Pipeline::create_at(home.path(), "Bad", BuildMode::Development, |reg| {
            reg.source(
                SourceKind::Primary,
                SourceOptions::new("/content", "md", |_, _| Ok(ParseOutcome::Empty)),
            )
        });
        assert!(matches!(result, Err(EngineError::Core(_))));
    }

    #[test]
    fn sources_process_in_kind_order_within_a_pass() {
        let home = TempDir::new().unwrap();
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        let c = TempDir::new().unwrap();
        for dir in [&a, &b, &c] {
            std::fs::write(dir.path().join("x.md"), "x").unwrap();
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::create_at(home.path(), "Order", BuildMode::Development, |reg| {
            for (dir, kind, label) in [
                (&b, SourceKind::Secondary, "secondary"),
                (&a, SourceKind::Primary, "primary"),
                (&c, SourceKind::Tertiary, "tertiary"),
            ] {
                let order = order.clone();
                reg.source(
                    kind,
                    SourceOptions::new(dir.path(), ".md", move |_, _| {
                        order.lock().unwrap().push(label);
                        Ok(ParseOutcome::Empty)
                    }),
                )?;
            }
            Ok(())
        })
        .expect("create");

        pipeline.build().expect("build");
        assert_eq!(
            *order.lock().unwrap(),
            vec!["primary", "secondary", "tertiary"]
        );
    }

    #[test]
    fn reconcile_rejects_foreign_extension_without_dispatch() {
        let home = TempDir::new().unwrap();
        let content = TempDir::new().unwrap();
        let parses = Arc::new(AtomicUsize::new(0));

        let counter = parses.clone();
        let mut pipeline = Pipeline::create_at(home.path(), "Reject", BuildMode::Development, |reg| {
            reg.source(
                SourceKind::Primary,
                SourceOptions::new(content.path(), ".md", move |_, _| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(ParseOutcome::Empty)
                }),
            )
        })
        .expect("create");

        let txt = content.path().join("notes.txt");
        std::fs::write(&txt, "t").unwrap();
        let outcome = pipeline
            .reconcile(0, SourceEvent::Add, &txt)
            .expect("reconcile");
        assert_eq!(outcome, ProcessOutcome::Unchanged);
        assert_eq!(parses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn reconciled_unlink_rerenders_loads_without_contribution() {
        let home = TempDir::new().unwrap();
        let content = TempDir::new().unwrap();
        let out = home.path().join("meta.json");

        let out_clone = out.clone();
        let mut pipeline = Pipeline::create_at(home.path(), "Unlink", BuildMode::Development, |reg| {
            let meta = reg.load(
                "meta",
                LoadOptions::new(out_clone).default_value(json!({"chapters": {}})),
            )?;

            let on_hit = meta.clone();
            let on_gone = meta.clone();
            reg.source(
                SourceKind::Primary,
                SourceOptions::new(content.path(), ".md", |path, _| {
                    let mut data = Record::new();
                    let title = path.file_stem().unwrap().to_string_lossy().into_owned();
                    data.insert("title".into(), json!(title));
                    Ok(ParseOutcome::Record(data))
                })
                .on_cache_hit(move |entry| {
                    if let Some(title) = entry.field("title").and_then(|t| t.as_str()) {
                        on_hit.mutate(|v| v["chapters"][title] = json!({"title": title}));
                    }
                })
                .unlink(move |entry| {
                    if let Some(title) = entry.field("title").and_then(|t| t.as_str()) {
                        on_gone.mutate(|v| {
                            if let Some(chapters) = v["chapters"].as_object_mut() {
                                chapters.remove(title);
                            }
                        });
                    }
                }),
            )
        })
        .expect("create");

        let path = content.path().join("a.md");
        std::fs::write(&path, "# A").unwrap();
        pipeline.build().expect("build");

        let rendered: serde_json::Value = spirea_core::json::read_json(&out).expect("read");
        assert_eq!(rendered["chapters"]["a"]["title"], json!("a"));

        std::fs::remove_file(&path).unwrap();
        let outcome = pipeline
            .reconcile(0, SourceEvent::Unlink, &path)
            .expect("reconcile");
        assert_eq!(outcome, ProcessOutcome::Changed);
        assert!(pipeline.cache().is_empty(), "cache entry must be evicted");

        let rendered: serde_json::Value = spirea_core::json::read_json(&out).expect("read");
        assert_eq!(rendered["chapters"], json!({}));
    }

    #[test]
    fn reload_load_folds_and_renders_only_that_load() {
        let home = TempDir::new().unwrap();
        let src = home.path().join("site.json");
        let out = home.path().join("meta.json");
        std::fs::write(&src, r#"{"site": "v1"}"#).unwrap();

        let (src_clone, out_clone) = (src.clone(), out.clone());
        let pipeline = Pipeline::create_at(home.path(), "Reload", BuildMode::Development, |reg| {
            reg.load(
                "meta",
                LoadOptions::new(out_clone)
                    .src(src_clone)
                    .update(|mut new, old| {
                        new["chapters"] = old
                            .and_then(|o| o.get("chapters").cloned())
                            .unwrap_or_else(|| json!({}));
                        new
                    }),
            )?;
            Ok(())
        })
        .expect("create");

        pipeline.loads()[0].mutate(|v| v["chapters"]["A"] = json!(1));
        std::fs::write(&src, r#"{"site": "v2"}"#).unwrap();
        pipeline.reload_load(0).expect("reload");

        let rendered: serde_json::Value = spirea_core::json::read_json(&out).expect("read");
        assert_eq!(rendered["site"], json!("v2"));
        assert_eq!(rendered["chapters"]["A"], json!(1), "fold keeps accumulator");
    }
}
