//! Response headers middleware.
//!
//! Disables browser caching so a reload always fetches fresh files.

use axum::http::{HeaderValue, header};
use tower_http::set_header::SetResponseHeaderLayer;

/// Cache-Control header value.
const CACHE_CONTROL: &str = "no-cache";

/// Create layer that adds Cache-Control header.
pub(crate) fn cache_control_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL))
}
