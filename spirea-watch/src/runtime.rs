//! Watch runtime: notify events in, engine reconciliation out.
//!
//! One watcher covers every source folder (recursive unless the source is
//! shallow) and every load's external source document. Events are drained
//! sequentially off a single channel, so reconciliation for one watched
//! tree never interleaves. A failed reconciliation aborts only that
//! event; the session runs until shutdown.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use spirea_core::normalize_path;
use spirea_engine::{Pipeline, SourceEvent};

use crate::error::{io_err, WatchError};

/// Window within which repeated add/change events for one path collapse.
/// notify does not coalesce editor save bursts; this does.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Where an event path belongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Source(usize),
    LoadSrc(usize),
}

/// Run a watch session until the shutdown channel fires.
pub async fn watch(
    pipeline: &mut Pipeline,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), WatchError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    register_watches(&mut watcher, pipeline)?;

    tracing::info!(signature = %pipeline.signature(), "watching");

    let mut debounce = HashMap::<PathBuf, Instant>::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return Err(WatchError::ChannelClosed("watch events"));
                };
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(error = %err, "watcher event error");
                        continue;
                    }
                };
                apply_fs_event(pipeline, &mut debounce, &event.kind, &event.paths, Instant::now());
            }
        }
    }

    Ok(())
}

/// Run a watch session on a dedicated runtime, shutting down on ctrl-c.
pub fn watch_blocking(pipeline: &mut Pipeline) -> Result<(), WatchError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    runtime.block_on(async {
        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received ctrl-c, ending watch session");
                let _ = shutdown_tx.send(());
            }
        });
        watch(pipeline, shutdown_rx).await
    })
}

/// Register every source folder and load source document with the
/// watcher. Missing source folders are created so the session can pick up
/// files appearing later.
fn register_watches(
    watcher: &mut RecommendedWatcher,
    pipeline: &Pipeline,
) -> Result<(), WatchError> {
    for source in pipeline.sources() {
        let mode = if source.deep {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for folder in &source.folders {
            if !folder.exists() {
                fs::create_dir_all(folder).map_err(|e| io_err(folder, e))?;
            }
            watcher.watch(folder, mode)?;
            tracing::debug!(path = %folder.display(), recursive = source.deep, "watching folder");
        }
    }

    for load in pipeline.loads() {
        let Some(src) = load.src() else { continue };
        if !src.exists() {
            tracing::debug!(path = %src.display(), "load source absent; not watched");
            continue;
        }
        watcher.watch(src, RecursiveMode::NonRecursive)?;
        tracing::debug!(path = %src.display(), load = %load.name(), "watching load source");
    }

    Ok(())
}

/// Dispatch one batch of event paths. Split out of the select loop so the
/// reconciliation path is testable without a live watcher.
fn apply_fs_event(
    pipeline: &mut Pipeline,
    debounce: &mut HashMap<PathBuf, Instant>,
    kind: &EventKind,
    paths: &[PathBuf],
    now: Instant,
) {
    let Some(event) = map_event_kind(kind) else {
        return;
    };

    for path in paths {
        // Unlinks are never debounced: suppressing one would leave a
        // stale entry behind.
        if event != SourceEvent::Unlink
            && !should_process_event(debounce, path, now, DEBOUNCE_WINDOW)
        {
            continue;
        }

        let normalized = normalize_path(path);
        match route_for_path(pipeline, &normalized) {
            Some(Route::LoadSrc(index)) => {
                if event != SourceEvent::Change {
                    continue;
                }
                if let Err(err) = pipeline.reload_load(index) {
                    tracing::error!(path = %normalized, error = %err, "load reload failed");
                }
            }
            Some(Route::Source(index)) => {
                match pipeline.reconcile(index, event, path) {
                    Ok(_) => {}
                    // The file vanished between the event and the metadata
                    // read; a remove event follows.
                    Err(spirea_engine::EngineError::Io { path: p, source })
                        if source.kind() == std::io::ErrorKind::NotFound =>
                    {
                        tracing::warn!(path = %p.display(), %event, "path vanished; event dropped");
                    }
                    Err(err) => {
                        tracing::error!(
                            path = %normalized,
                            %event,
                            error = %err,
                            "event reconciliation failed",
                        );
                    }
                }
            }
            None => {
                tracing::debug!(path = %normalized, "event path matches no descriptor");
            }
        }
    }
}

fn map_event_kind(kind: &EventKind) -> Option<SourceEvent> {
    match kind {
        EventKind::Create(_) => Some(SourceEvent::Add),
        EventKind::Modify(_) => Some(SourceEvent::Change),
        EventKind::Remove(_) => Some(SourceEvent::Unlink),
        _ => None,
    }
}

/// A load's external source wins over source-folder containment, matching
/// the dedicated single-file subscriptions loads get.
fn route_for_path(pipeline: &Pipeline, normalized: &str) -> Option<Route> {
    for (index, load) in pipeline.loads().iter().enumerate() {
        if let Some(src) = load.src() {
            if normalize_path(src) == normalized {
                return Some(Route::LoadSrc(index));
            }
        }
    }

    pipeline
        .sources()
        .iter()
        .position(|s| s.matches_ext(normalized) && s.within_scope(normalized))
        .map(Route::Source)
}

fn should_process_event(
    debounce: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    threshold: Duration,
) -> bool {
    debounce.retain(|_, seen_at| now.duration_since(*seen_at) <= Duration::from_secs(30));
    match debounce.get(path) {
        Some(last_seen) if now.duration_since(*last_seen) < threshold => false,
        _ => {
            debounce.insert(path.to_path_buf(), now);
            true
        }
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::time::advance;

    use spirea_core::{LoadOptions, ParseOutcome, Record, SourceKind, SourceOptions};
    use spirea_engine::BuildMode;

    fn chapters_pipeline(home: &TempDir, posts: &Path) -> Pipeline {
        let out = home.path().join("meta.json");
        let posts = posts.to_path_buf();
        Pipeline::create_at(home.path(), "Watch", BuildMode::Development, move |reg| {
            let meta = reg.load(
                "meta",
                LoadOptions::new(out).default_value(json!({"chapters": {}})),
            )?;

            let on_hit = meta.clone();
            let on_gone = meta;
            reg.source(
                SourceKind::Primary,
                SourceOptions::new(posts, ".md", |path, _| {
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
                            if let Some(c) = v["chapters"].as_object_mut() {
                                c.remove(title);
                            }
                        });
                    }
                }),
            )
        })
        .expect("create pipeline")
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn debounce_coalesces_rapid_events() {
        let threshold = Duration::from_millis(100);
        let mut debounce = HashMap::<PathBuf, Instant>::new();
        let path = PathBuf::from("/posts/a.md");
        let mut triggers = 0usize;

        for _ in 0..5 {
            if should_process_event(&mut debounce, &path, Instant::now(), threshold) {
                triggers += 1;
            }
            advance(Duration::from_millis(10)).await;
        }

        advance(Duration::from_millis(150)).await;
        assert_eq!(triggers, 1, "rapid saves should collapse to one trigger");
        assert!(
            should_process_event(&mut debounce, &path, Instant::now(), threshold),
            "a later save must process again"
        );
    }

    #[test]
    fn event_kinds_map_to_engine_operations() {
        use notify::event::{CreateKind, ModifyKind, RemoveKind};

        assert_eq!(
            map_event_kind(&EventKind::Create(CreateKind::File)),
            Some(SourceEvent::Add)
        );
        assert_eq!(
            map_event_kind(&EventKind::Modify(ModifyKind::Any)),
            Some(SourceEvent::Change)
        );
        assert_eq!(
            map_event_kind(&EventKind::Remove(RemoveKind::File)),
            Some(SourceEvent::Unlink)
        );
        assert_eq!(map_event_kind(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn synthetic_events_keep_cache_and_load_consistent() {
        use notify::event::{CreateKind, RemoveKind};

        let home = TempDir::new().expect("home");
        let posts = home.path().join("posts");
        fs::create_dir_all(&posts).expect("posts dir");
        let mut pipeline = chapters_pipeline(&home, &posts);
        let mut debounce = HashMap::new();

        let path = posts.join("a.md");
        fs::write(&path, "# A").expect("write");
        apply_fs_event(
            &mut pipeline,
            &mut debounce,
            &EventKind::Create(CreateKind::File),
            &[path.clone()],
            Instant::now(),
        );
        assert_eq!(pipeline.cache().len(), 1);
        let meta: serde_json::Value =
            spirea_core::json::read_json(&home.path().join("meta.json")).expect("meta");
        assert_eq!(meta["chapters"]["a"]["title"], json!("a"));

        fs::remove_file(&path).expect("remove");
        apply_fs_event(
            &mut pipeline,
            &mut debounce,
            &EventKind::Remove(RemoveKind::File),
            &[path],
            Instant::now(),
        );
        assert!(pipeline.cache().is_empty(), "unlink must evict the entry");
        let meta: serde_json::Value =
            spirea_core::json::read_json(&home.path().join("meta.json")).expect("meta");
        assert_eq!(meta["chapters"], json!({}));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn add_event_for_cached_path_is_suppressed() {
        use notify::event::CreateKind;

        let home = TempDir::new().expect("home");
        let posts = home.path().join("posts");
        fs::create_dir_all(&posts).expect("posts dir");
        let mut pipeline = chapters_pipeline(&home, &posts);
        let mut debounce = HashMap::new();

        let path = posts.join("a.md");
        fs::write(&path, "# A").expect("write");

        apply_fs_event(
            &mut pipeline,
            &mut debounce,
            &EventKind::Create(CreateKind::File),
            &[path.clone()],
            Instant::now(),
        );
        advance(Duration::from_secs(1)).await;
        apply_fs_event(
            &mut pipeline,
            &mut debounce,
            &EventKind::Create(CreateKind::File),
            &[path],
            Instant::now(),
        );
        assert_eq!(pipeline.cache().len(), 1);
    }

    #[test]
    fn load_source_wins_routing_over_source_folders() {
        let home = TempDir::new().expect("home");
        let posts = home.path().join("posts");
        fs::create_dir_all(&posts).expect("posts dir");

        // Load source deliberately inside the watched folder with the
        // watched extension-free name; use a .json doc next to posts.
        let src = home.path().join("site.json");
        fs::write(&src, r#"{"site": "docs"}"#).expect("seed");

        let out = home.path().join("meta.json");
        let (src_clone, posts_clone) = (src.clone(), posts.clone());
        let pipeline = Pipeline::create_at(home.path(), "Route", BuildMode::Development, move |reg| {
            reg.load("meta", LoadOptions::new(out).src(src_clone))?;
            reg.source(
                SourceKind::Primary,
                SourceOptions::new(posts_clone, ".md", |_, _| Ok(ParseOutcome::Empty)),
            )
        })
        .expect("create");

        assert_eq!(
            route_for_path(&pipeline, &normalize_path(&src)),
            Some(Route::LoadSrc(0))
        );
        assert_eq!(
            route_for_path(&pipeline, &normalize_path(&posts.join("a.md"))),
            Some(Route::Source(0))
        );
        assert_eq!(route_for_path(&pipeline, "/elsewhere/b.md"), None);
    }

    #[test]
    fn register_watches_creates_missing_folders() {
        let home = TempDir::new().expect("home");
        let posts = home.path().join("posts");
        let pipeline = chapters_pipeline(&home, &posts);

        let (tx, _rx) = std::sync::mpsc::channel();
        let mut watcher = recommended_watcher(move |event| {
            let _ = tx.send(event);
        })
        .expect("watcher");
        register_watches(&mut watcher, &pipeline).expect("register");
        assert!(posts.exists(), "missing source folder must be created");
    }
}
