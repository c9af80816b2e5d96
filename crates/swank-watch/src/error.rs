//! Watch error type.

use std::path::PathBuf;

/// Error raised while starting or running a directory watch.
///
/// Any of these ends the change sequence: a watch is not restartable.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watched root is missing, not a directory, or unreadable.
    #[error("watched directory is no longer readable: {}", .path.display())]
    RootUnavailable {
        /// Root directory being watched.
        path: PathBuf,
        /// Underlying I/O error, if one was observed.
        #[source]
        source: Option<std::io::Error>,
    },

    /// An ignore pattern is not a valid glob.
    #[error("invalid ignore pattern {pattern:?}: {source}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Glob parse error.
        #[source]
        source: glob::PatternError,
    },

    /// The OS watcher backend failed.
    #[error("file watcher error: {0}")]
    Backend(#[from] notify::Error),
}

impl WatchError {
    pub(crate) fn root_unavailable(path: impl Into<PathBuf>, source: Option<std::io::Error>) -> Self {
        Self::RootUnavailable {
            path: path.into(),
            source,
        }
    }
}
