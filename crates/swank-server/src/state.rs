//! Application state.
//!
//! Shared state for the static file handler.

use std::path::PathBuf;

/// Application state shared across all handlers.
pub(crate) struct AppState {
    /// Canonical root directory being served.
    pub(crate) root: PathBuf,
}

impl AppState {
    /// Create state for a root that has already been canonicalized.
    pub(crate) fn new(root: PathBuf) -> Self {
        Self { root }
    }
}
