//! Directory watcher.
//!
//! Wires a recursive `notify` watcher to the change batcher and drains
//! changes on a background thread.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use glob::Pattern;
use notify::{RecursiveMode, Watcher as _};

use crate::batch::{ChangeBatcher, ChangeKind};
use crate::error::WatchError;
use crate::event::{ChangeEvent, ChangeReceiver, WatchHandle};

/// Paths that never trigger a reload unless the caller overrides the list.
pub const DEFAULT_IGNORE: &[&str] = &[
    ".git/**",
    "**/.git/**",
    "**/node_modules/**",
    "**/*.swp",
    "**/*.swx",
    "**/*~",
    "**/.DS_Store",
];

/// How often the drain thread wakes up to check for a finished batch.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Watch options.
#[derive(Clone, Debug)]
pub struct WatchOptions {
    /// Quiet period that closes a batch of changes.
    pub debounce: Duration,
    /// Glob patterns, relative to the root, whose changes are dropped.
    pub ignore: Vec<String>,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            ignore: DEFAULT_IGNORE.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

/// Recursive directory watcher.
pub struct Watcher;

impl Watcher {
    /// Start watching `root` recursively.
    ///
    /// Returns once the OS watch is registered. The receiver yields one
    /// [`ChangeEvent`] per debounce window in which something changed, and a
    /// final `Err` if the root becomes unreadable or the backend fails.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not a readable directory, an ignore
    /// pattern is invalid, or the OS watcher cannot be created.
    pub fn start(
        root: &Path,
        options: &WatchOptions,
    ) -> Result<(ChangeReceiver, WatchHandle), WatchError> {
        // Backends report canonical paths (e.g. /private/var on macOS)
        let root = fs::canonicalize(root).map_err(|e| WatchError::root_unavailable(root, Some(e)))?;
        if !root.is_dir() {
            return Err(WatchError::root_unavailable(root, None));
        }

        let ignore = compile_patterns(&options.ignore)?;
        let batcher = Arc::new(ChangeBatcher::new(options.debounce));

        let backend_error: BackendErrorSlot = Arc::default();

        let root_for_watcher = root.clone();
        let batcher_for_watcher = Arc::clone(&batcher);
        let error_for_watcher = Arc::clone(&backend_error);
        let mut watcher =
            notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        record_event(&event, &root_for_watcher, &ignore, &batcher_for_watcher);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "File watcher reported an error");
                        let mut slot = error_for_watcher.lock().unwrap_or_else(PoisonError::into_inner);
                        slot.get_or_insert(e);
                    }
                }
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let (event_tx, event_rx) = mpsc::channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let poll_interval = POLL_INTERVAL.min(options.debounce.max(Duration::from_millis(1)));

        std::thread::Builder::new()
            .name("swank-watch".to_owned())
            .spawn(move || {
                // Dropping the watcher (when this thread exits) unregisters the OS watch
                let _watcher_guard = watcher;
                let source = DrainSource {
                    root: &root,
                    batcher: &batcher,
                    backend_error: &backend_error,
                };
                drain_loop(&source, &event_tx, &shutdown_rx, poll_interval);
            })
            .map_err(|e| WatchError::Backend(notify::Error::io(e)))?;

        Ok((ChangeReceiver::new(event_rx), WatchHandle::new(shutdown_tx)))
    }
}

/// First error reported by the notify backend, picked up by the drain loop.
type BackendErrorSlot = Arc<Mutex<Option<notify::Error>>>;

/// What the drain loop reads from.
struct DrainSource<'a> {
    root: &'a Path,
    batcher: &'a ChangeBatcher,
    backend_error: &'a Mutex<Option<notify::Error>>,
}

/// Compile ignore globs.
fn compile_patterns(patterns: &[String]) -> Result<Vec<Pattern>, WatchError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|source| WatchError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}

/// Record a raw `notify` event into the open batch.
fn record_event(event: &notify::Event, root: &Path, ignore: &[Pattern], batcher: &ChangeBatcher) {
    let kind = match event.kind {
        notify::EventKind::Create(_) => ChangeKind::Created,
        notify::EventKind::Modify(_) => ChangeKind::Modified,
        notify::EventKind::Remove(_) => ChangeKind::Removed,
        _ => return,
    };

    let now = Instant::now();
    for path in &event.paths {
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        // The root itself is checked by the drain loop
        if relative.as_os_str().is_empty() {
            continue;
        }
        if ignore.iter().any(|pattern| pattern.matches_path(relative)) {
            continue;
        }

        batcher.record(relative.to_path_buf(), kind, now);
    }
}

/// Release finished batches until shutdown, the receiver goes away, or the
/// watch fails.
fn drain_loop(
    source: &DrainSource<'_>,
    event_tx: &mpsc::Sender<Result<ChangeEvent, WatchError>>,
    shutdown_rx: &mpsc::Receiver<()>,
    poll_interval: Duration,
) {
    loop {
        match shutdown_rx.recv_timeout(poll_interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let root = source.root;
        let backend_error = source
            .backend_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(e) = backend_error {
            let _ = event_tx.send(Err(WatchError::Backend(e)));
            return;
        }

        if let Err(e) = fs::read_dir(root) {
            tracing::error!(root = %root.display(), error = %e, "Watched directory became unreadable");
            let _ = event_tx.send(Err(WatchError::root_unavailable(root, Some(e))));
            return;
        }

        let Some(changes) = source.batcher.take_ready(Instant::now()) else {
            continue;
        };
        let paths: Vec<PathBuf> = changes
            .into_iter()
            .map(|(path, kind)| {
                tracing::debug!(path = %path.display(), ?kind, "Debounced change");
                path
            })
            .collect();

        if paths.is_empty() {
            continue;
        }

        if event_tx.send(Ok(ChangeEvent::new(paths))).is_err() {
            // Receiver dropped
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(400);

    fn fast_options() -> WatchOptions {
        WatchOptions {
            debounce: Duration::from_millis(50),
            ..WatchOptions::default()
        }
    }

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.html"), "<p>Hello, World</p>").unwrap();
        fs::create_dir(dir.path().join("css")).unwrap();
        fs::write(dir.path().join("css/site.css"), "body {}").unwrap();
        dir
    }

    #[test]
    fn test_default_options() {
        let options = WatchOptions::default();
        assert_eq!(options.debounce, Duration::from_millis(100));
        assert!(options.ignore.iter().any(|p| p == "**/node_modules/**"));
    }

    #[test]
    fn test_compile_patterns_rejects_invalid_glob() {
        let err = compile_patterns(&["[".to_owned()]).unwrap_err();
        assert!(matches!(err, WatchError::InvalidPattern { .. }));
    }

    #[test]
    fn test_default_ignore_matches() {
        let ignore = compile_patterns(&WatchOptions::default().ignore).unwrap();
        let ignored = |p: &str| ignore.iter().any(|pattern| pattern.matches_path(Path::new(p)));

        assert!(ignored(".git/HEAD"));
        assert!(ignored("node_modules/lib/index.js"));
        assert!(ignored("pages/.index.html.swp"));
        assert!(ignored("index.html~"));
        assert!(!ignored("index.html"));
        assert!(!ignored("css/site.css"));
    }

    #[test]
    fn test_start_on_missing_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = Watcher::start(&dir.path().join("missing"), &fast_options());
        assert!(matches!(result, Err(WatchError::RootUnavailable { .. })));
    }

    #[test]
    fn test_start_on_file_fails() {
        let dir = site();
        let result = Watcher::start(&dir.path().join("hello.html"), &fast_options());
        assert!(matches!(result, Err(WatchError::RootUnavailable { .. })));
    }

    #[test]
    fn test_start_does_not_emit_for_existing_tree() {
        let dir = site();
        let (changes, _handle) = Watcher::start(dir.path(), &fast_options()).unwrap();

        assert!(changes.recv_timeout(QUIET).is_none());
    }

    #[test]
    fn test_modified_file_emits_one_event() {
        let dir = site();
        let (changes, _handle) = Watcher::start(dir.path(), &fast_options()).unwrap();

        fs::write(dir.path().join("hello.html"), "<p>Hello again</p>").unwrap();

        let event = changes.recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(event.url_paths(), vec!["hello.html"]);
        assert!(changes.recv_timeout(QUIET).is_none());
    }

    #[test]
    fn test_nested_created_file_is_relative() {
        let dir = site();
        let (changes, _handle) = Watcher::start(dir.path(), &fast_options()).unwrap();

        fs::write(dir.path().join("css/print.css"), "@media print {}").unwrap();

        let event = changes.recv_timeout(WAIT).unwrap().unwrap();
        assert!(event.contains(Path::new("css/print.css")));
    }

    #[test]
    fn test_ignored_paths_do_not_emit() {
        let dir = site();
        let options = WatchOptions {
            ignore: vec!["**/*.tmp".to_owned()],
            ..fast_options()
        };
        let (changes, _handle) = Watcher::start(dir.path(), &options).unwrap();

        fs::write(dir.path().join("build.tmp"), "scratch").unwrap();

        assert!(changes.recv_timeout(QUIET).is_none());
    }

    #[test]
    fn test_removed_root_ends_with_error() {
        let dir = site();
        let root = dir.path().join("public");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("index.html"), "<html></html>").unwrap();

        let (changes, _handle) = Watcher::start(&root, &fast_options()).unwrap();
        fs::remove_dir_all(&root).unwrap();

        let error = loop {
            match changes.recv_timeout(WAIT) {
                Some(Ok(_)) => {}
                Some(Err(e)) => break e,
                None => panic!("watch ended without reporting an error"),
            }
        };
        assert!(matches!(error, WatchError::RootUnavailable { .. }));
        assert!(changes.recv_timeout(WAIT).is_none());
    }

    #[test]
    fn test_backend_error_ends_drain() {
        let dir = site();
        let batcher = ChangeBatcher::new(Duration::from_millis(10));
        let backend_error = Mutex::new(Some(notify::Error::generic("queue overflow")));
        let source = DrainSource {
            root: dir.path(),
            batcher: &batcher,
            backend_error: &backend_error,
        };
        let (event_tx, event_rx) = mpsc::channel();
        let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        drain_loop(&source, &event_tx, &shutdown_rx, Duration::from_millis(1));
        drop(event_tx);

        let events: Vec<_> = event_rx.iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(WatchError::Backend(_))));
    }

    #[test]
    fn test_stop_ends_sequence() {
        let dir = site();
        let (changes, handle) = Watcher::start(dir.path(), &fast_options()).unwrap();

        handle.stop();

        assert!(changes.recv_timeout(WAIT).is_none());
    }
}
