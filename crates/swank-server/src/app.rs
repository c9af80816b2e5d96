//! Router construction.
//!
//! Builds the static server router with its optional middleware.

use std::sync::Arc;

use axum::Router;
use axum::middleware as axum_middleware;

use crate::live_reload::{Snippet, inject_livereload};
use crate::middleware::{headers, request_log};
use crate::state::AppState;
use crate::static_files;

/// Options that decide which layers wrap the static handler.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct RouterOptions {
    /// Inject the reload snippet pointing at this notifier port.
    pub(crate) reload_port: Option<u16>,
    /// Log each request.
    pub(crate) log_enabled: bool,
}

/// Create the static server router.
///
/// Layers, outermost first: request log, script injector, cache headers,
/// static files.
pub(crate) fn create_router(state: Arc<AppState>, options: RouterOptions) -> Router {
    let mut router = static_files::static_router(state).layer(headers::cache_control_layer());

    if let Some(port) = options.reload_port {
        router = router.layer(axum_middleware::from_fn_with_state(
            Snippet::for_port(port),
            inject_livereload,
        ));
    }

    if options.log_enabled {
        router.layer(request_log::request_log_layer())
    } else {
        router
    }
}
