//! Change event types.
//!
//! Provides the values produced by [`Watcher::start`](crate::Watcher::start):
//! the [`ChangeEvent`] itself, the [`ChangeReceiver`] that yields them, and the
//! [`WatchHandle`] that keeps the watch alive.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, SystemTime};

use crate::error::WatchError;

/// A batch of file changes detected within one debounce window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Paths relative to the watched root (created, modified or removed).
    pub paths: BTreeSet<PathBuf>,
    /// When the batch was emitted.
    pub timestamp: SystemTime,
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            timestamp: SystemTime::now(),
        }
    }

    /// Check whether the batch includes `path`.
    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Paths as forward-slash strings, the form browsers expect.
    #[must_use]
    pub fn url_paths(&self) -> Vec<String> {
        self.paths.iter().map(|path| to_url_path(path)).collect()
    }
}

/// Join the normal components of a relative path with `/`.
fn to_url_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Receiver for change events.
///
/// Wraps a [`std::sync::mpsc::Receiver`] for synchronous delivery. The
/// sequence is infinite until the watch stops: after an `Err` item or after
/// the [`WatchHandle`] is dropped, no further items arrive.
pub struct ChangeReceiver {
    rx: mpsc::Receiver<Result<ChangeEvent, WatchError>>,
}

impl ChangeReceiver {
    pub(crate) fn new(rx: mpsc::Receiver<Result<ChangeEvent, WatchError>>) -> Self {
        Self { rx }
    }

    /// Wait for the next item (blocking).
    ///
    /// Returns `None` once the watch has stopped.
    #[must_use]
    pub fn recv(&self) -> Option<Result<ChangeEvent, WatchError>> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `None` on timeout or once the watch has stopped.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Result<ChangeEvent, WatchError>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Try to receive an item without blocking.
    #[must_use]
    pub fn try_recv(&self) -> Option<Result<ChangeEvent, WatchError>> {
        self.rx.try_recv().ok()
    }

    /// Returns a blocking iterator over items, ending when the watch stops.
    pub fn iter(&self) -> impl Iterator<Item = Result<ChangeEvent, WatchError>> + '_ {
        self.rx.iter()
    }
}

/// Handle to stop watching for changes.
///
/// Uses RAII: dropping the handle stops the watch. Shutdown is signalled by
/// dropping the internal channel sender.
pub struct WatchHandle {
    shutdown: Option<mpsc::Sender<()>>,
}

impl WatchHandle {
    pub(crate) fn new(shutdown: mpsc::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
        }
    }

    /// Stop watching immediately (consumes the handle).
    pub fn stop(mut self) {
        self.shutdown.take();
    }
}
