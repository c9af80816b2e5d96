//! Live reload.
//!
//! The notifier pushes change batches to connected browsers over WebSocket;
//! the injector adds the client script to HTML pages served from the root.

mod inject;
mod notifier;
mod websocket;

pub(crate) use inject::{Snippet, inject_livereload};
pub use notifier::{ReloadMessage, ReloadNotifier};
