//! Live reload script injection.
//!
//! Rewrites successful HTML responses so the page loads the reload client
//! from the notifier port.

use std::sync::Arc;

use axum::body::{Body, HttpBody, to_bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Present in every injected snippet; pages that already carry it are
/// left alone.
const SNIPPET_MARKER: &[u8] = b"livereload.js?snipver=";

/// Largest HTML body that is buffered for injection.
const MAX_INJECT_BYTES: usize = 8 * 1024 * 1024;

/// Script tag that loads the reload client.
#[derive(Clone, Debug)]
pub(crate) struct Snippet(Arc<str>);

impl Snippet {
    /// Snippet pointing at the notifier on `port`, on whatever host served
    /// the page.
    pub(crate) fn for_port(port: u16) -> Self {
        Self(Arc::from(format!(
            "<script>(function(){{var s=document.createElement('script');\
             s.src='//'+(location.hostname||'localhost')+':{port}/livereload.js?snipver=1';\
             (document.body||document.documentElement).appendChild(s);}})();</script>"
        )))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Insert the snippet into an HTML document.
///
/// Placed before the last `</body>`, else before the last `</html>`, else
/// appended. Returns `None` if the document already carries a snippet.
pub(crate) fn inject_snippet(html: &[u8], snippet: &Snippet) -> Option<Vec<u8>> {
    if find_last(html, SNIPPET_MARKER).is_some() {
        return None;
    }

    let at = find_last(html, b"</body>")
        .or_else(|| find_last(html, b"</html>"))
        .unwrap_or(html.len());

    let mut output = Vec::with_capacity(html.len() + snippet.as_bytes().len());
    output.extend_from_slice(&html[..at]);
    output.extend_from_slice(snippet.as_bytes());
    output.extend_from_slice(&html[at..]);
    Some(output)
}

/// Last case-insensitive occurrence of `needle`.
fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .rposition(|window| window.eq_ignore_ascii_case(needle))
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .split(';')
                .next()
                .is_some_and(|essence| essence.trim().eq_ignore_ascii_case("text/html"))
        })
}

/// Middleware that injects the reload snippet into HTML responses.
///
/// Only `200` responses with a `text/html` content type and no content
/// encoding are touched. `HEAD` responses and bodies known to be larger
/// than [`MAX_INJECT_BYTES`] pass through unchanged.
pub(crate) async fn inject_livereload(
    State(snippet): State<Snippet>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::HEAD {
        return next.run(request).await;
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK
        || !is_html(response.headers())
        || response.headers().contains_key(header::CONTENT_ENCODING)
    {
        return response;
    }
    if body_length(&response).is_some_and(|length| length > MAX_INJECT_BYTES as u64) {
        tracing::debug!("HTML response too large for live reload injection");
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, MAX_INJECT_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer HTML response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let Some(injected) = inject_snippet(&bytes, &snippet) else {
        return Response::from_parts(parts, Body::from(bytes));
    };

    parts
        .headers
        .insert(header::CONTENT_LENGTH, HeaderValue::from(injected.len()));
    parts.headers.remove(header::ETAG);
    parts.headers.remove(header::ACCEPT_RANGES);
    Response::from_parts(parts, Body::from(injected))
}

/// Body length from `Content-Length`, or from the body when it is known.
fn body_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .or_else(|| response.body().size_hint().exact())
}
