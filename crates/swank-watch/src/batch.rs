//! Change batching.
//!
//! Raw events accumulate into one batch that is released as a whole once
//! the tree has been quiet for the debounce window. Every path in a batch
//! reports its net effect over the window, so an editor save that emits
//! several events (or an atomic rename-over) counts as one modification.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A batch kept open by continuous writes is released after this many
/// debounce windows anyway.
const MAX_WINDOWS: u32 = 10;

/// Kind of raw filesystem event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Net effect of one path over a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PathState {
    /// Whether the path existed before its first event in the batch.
    existed: bool,
    /// Whether it exists after its latest event.
    exists: bool,
}

impl PathState {
    fn first(kind: ChangeKind) -> Self {
        Self {
            existed: kind != ChangeKind::Created,
            exists: kind != ChangeKind::Removed,
        }
    }

    fn then(self, kind: ChangeKind) -> Self {
        Self {
            exists: kind != ChangeKind::Removed,
            ..self
        }
    }

    /// `None` when the path came and went inside the batch.
    fn net(self) -> Option<ChangeKind> {
        match (self.existed, self.exists) {
            (false, false) => None,
            (false, true) => Some(ChangeKind::Created),
            (true, true) => Some(ChangeKind::Modified),
            (true, false) => Some(ChangeKind::Removed),
        }
    }
}

struct Batch {
    paths: BTreeMap<PathBuf, PathState>,
    opened: Instant,
    last_event: Instant,
}

/// Collects raw events into debounced batches.
///
/// Shared between the `notify` callback thread (writer) and the drain
/// thread (reader).
pub(crate) struct ChangeBatcher {
    window: Duration,
    batch: Mutex<Option<Batch>>,
}

impl ChangeBatcher {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            batch: Mutex::new(None),
        }
    }

    /// Add a raw event seen at `now`.
    pub(crate) fn record(&self, path: PathBuf, kind: ChangeKind, now: Instant) {
        let mut slot = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = slot.get_or_insert_with(|| Batch {
            paths: BTreeMap::new(),
            opened: now,
            last_event: now,
        });

        batch.last_event = now;
        batch
            .paths
            .entry(path)
            .and_modify(|state| *state = state.then(kind))
            .or_insert_with(|| PathState::first(kind));
    }

    /// Take the open batch if it is due at `now`.
    ///
    /// Returns the paths with their net change; paths that were created and
    /// removed again are left out, so a due batch may come back empty.
    pub(crate) fn take_ready(&self, now: Instant) -> Option<Vec<(PathBuf, ChangeKind)>> {
        let mut slot = self.batch.lock().unwrap_or_else(PoisonError::into_inner);
        let batch = slot.as_ref()?;

        let quiet = now.saturating_duration_since(batch.last_event) >= self.window;
        let overdue = now.saturating_duration_since(batch.opened) >= self.window * MAX_WINDOWS;
        if !quiet && !overdue {
            return None;
        }

        let batch = slot.take()?;
        Some(
            batch
                .paths
                .into_iter()
                .filter_map(|(path, state)| Some((path, state.net()?)))
                .collect(),
        )
    }
}
