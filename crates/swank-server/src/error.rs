//! Error types for the HTTP server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use swank_config::ConfigError;

/// A listener could not be bound.
#[derive(Debug, thiserror::Error)]
#[error("failed to bind {what} on {addr}: {source}")]
pub struct BindError {
    /// Which listener failed (e.g. "static server").
    pub what: &'static str,
    /// Requested address.
    pub addr: String,
    /// Underlying I/O error.
    #[source]
    pub source: std::io::Error,
}

impl BindError {
    pub(crate) fn new(what: &'static str, host: &str, port: u16, source: std::io::Error) -> Self {
        Self {
            what,
            addr: format!("{host}:{port}"),
            source,
        }
    }
}

/// Fatal startup error.
///
/// Degraded conditions (tunnel unavailable, watch failure) are reported as
/// warnings on [`Startup`](crate::Startup) instead.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A listener could not be bound.
    #[error("{0}")]
    Bind(#[from] BindError),
}

/// Error while answering a static file request.
///
/// Everything else (missing files, methods, redirects) is answered by the
/// file service itself.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StaticError {
    /// Request path escapes the root.
    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl IntoResponse for StaticError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Forbidden(path) => {
                tracing::debug!(path = %path, "Refused path outside the root");
                StatusCode::FORBIDDEN
            }
        };

        let body = status.canonical_reason().unwrap_or("Error").to_owned();
        (status, body).into_response()
    }
}
