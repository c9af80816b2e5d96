//! Recursive, debounced directory watching for swank.
//!
//! This crate turns raw `notify` events for a directory tree into a lazy
//! sequence of [`ChangeEvent`]s. Each event carries the set of paths (relative
//! to the watched root) that changed within one debounce window.
//!
//! # Architecture
//!
//! - [`Watcher`] registers a recursive OS watcher on the root
//! - Raw events collect into one batch per debounce window, keeping each
//!   path's net change
//! - A background thread releases finished batches into a [`ChangeReceiver`]
//! - [`WatchHandle`] stops everything when dropped
//!
//! Registering the watch never produces a change event; a successful
//! [`Watcher::start`] is the only "tree is ready" signal.
//!
//! # Example
//!
//! ```ignore
//! use std::path::Path;
//! use swank_watch::{WatchOptions, Watcher};
//!
//! let (changes, _handle) = Watcher::start(Path::new("public"), &WatchOptions::default())?;
//! for change in changes.iter() {
//!     let change = change?;
//!     println!("changed: {:?}", change.paths);
//! }
//! ```

mod batch;
mod error;
mod event;
mod watcher;

pub use error::WatchError;
pub use event::{ChangeEvent, ChangeReceiver, WatchHandle};
pub use watcher::{DEFAULT_IGNORE, WatchOptions, Watcher};
