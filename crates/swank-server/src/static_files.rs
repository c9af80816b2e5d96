//! Static file serving.
//!
//! Files come from [`ServeDir`] rooted at the served directory. A guard in
//! front of it refuses request paths that would leave the root, including
//! through symlinks.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use percent_encoding::percent_decode_str;
use tower_http::services::ServeDir;

use crate::error::StaticError;
use crate::state::AppState;

/// File served for directory requests.
const INDEX_FILE: &str = "index.html";

/// Create router that serves every path from the root directory.
pub(crate) fn static_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback_service(ServeDir::new(&state.root))
        .layer(middleware::from_fn_with_state(state, confine_to_root))
}

/// Reject requests whose path resolves outside the root.
async fn confine_to_root(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    match check_path(&state.root, request.uri().path()).await {
        Ok(()) => next.run(request).await,
        Err(err) => err.into_response(),
    }
}

/// Check a raw request path against the canonical root.
///
/// Paths that do not exist pass, so [`ServeDir`] can answer 404.
async fn check_path(root: &Path, uri_path: &str) -> Result<(), StaticError> {
    let Ok(decoded) = percent_decode_str(uri_path).decode_utf8() else {
        return Ok(());
    };
    let forbidden = || StaticError::Forbidden(uri_path.to_owned());

    let relative = relative_path(&decoded).ok_or_else(forbidden)?;
    let target = root.join(&relative);
    if escapes(root, &target).await {
        return Err(forbidden());
    }
    if decoded.ends_with('/') && escapes(root, &target.join(INDEX_FILE)).await {
        return Err(forbidden());
    }
    Ok(())
}

/// Whether an existing `candidate` canonicalizes to somewhere outside `root`.
async fn escapes(root: &Path, candidate: &Path) -> bool {
    tokio::fs::canonicalize(candidate)
        .await
        .is_ok_and(|canonical| !canonical.starts_with(root))
}

/// Convert a decoded URL path into a relative filesystem path.
///
/// Returns `None` for anything that could step outside the root.
fn relative_path(decoded: &str) -> Option<PathBuf> {
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_string, site};
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn router(dir: &tempfile::TempDir) -> Router {
        let root = dir.path().canonicalize().unwrap();
        static_router(Arc::new(AppState::new(root)))
    }

    async fn request(dir: &tempfile::TempDir, method: Method, uri: &str) -> Response {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        router(dir).oneshot(req).await.unwrap()
    }

    async fn get(dir: &tempfile::TempDir, uri: &str) -> Response {
        request(dir, Method::GET, uri).await
    }

    #[test]
    fn test_relative_path_normal() {
        assert_eq!(
            relative_path("/css/site.css"),
            Some(PathBuf::from("css/site.css"))
        );
        assert_eq!(relative_path("/"), Some(PathBuf::new()));
        assert_eq!(relative_path("/./a.html"), Some(PathBuf::from("a.html")));
    }

    #[test]
    fn test_relative_path_rejects_escapes() {
        assert_eq!(relative_path("/../secret"), None);
        assert_eq!(relative_path("/a/../../secret"), None);
        assert_eq!(relative_path("/a\\..\\secret"), None);
        assert_eq!(relative_path("/a\0b"), None);
    }

    #[tokio::test]
    async fn test_check_path_lets_missing_files_through() {
        let dir = site();
        let root = dir.path().canonicalize().unwrap();

        assert!(check_path(&root, "/missing.html").await.is_ok());
        assert!(check_path(&root, "/docs/").await.is_ok());
        assert!(check_path(&root, "/%2e%2e/x").await.is_err());
    }

    #[tokio::test]
    async fn test_serves_file() {
        let dir = site();
        let response = get(&dir, "/hello.html").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(body_string(response).await, "<p>Hello, World</p>");
    }

    #[tokio::test]
    async fn test_content_length_matches_body() {
        let dir = site();
        let response = get(&dir, "/css/site.css").await;

        let length: usize = response.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(length, body_string(response).await.len());
    }

    #[tokio::test]
    async fn test_png_content_type() {
        let dir = site();
        let response = get(&dir, "/image.png").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    }

    #[tokio::test]
    async fn test_root_serves_index() {
        let dir = site();
        let response = get(&dir, "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("<title>Home</title>"));
    }

    #[tokio::test]
    async fn test_directory_with_slash_serves_index() {
        let dir = site();
        let response = get(&dir, "/docs/").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<p>Docs</p>");
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let dir = site();
        let response = get(&dir, "/docs?page=2").await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(response.headers()[header::LOCATION], "/docs/?page=2");
    }

    #[tokio::test]
    async fn test_directory_without_index_is_not_found() {
        let dir = site();
        let response = get(&dir, "/css/").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = site();
        let response = get(&dir, "/missing.html").await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_percent_encoded_name() {
        let dir = site();
        std::fs::write(dir.path().join("with space.txt"), "spaced").unwrap();

        let response = get(&dir, "/with%20space.txt").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "spaced");
    }

    #[tokio::test]
    async fn test_encoded_traversal_is_forbidden() {
        let dir = site();
        let response = get(&dir, "/%2e%2e/%2e%2e/etc/passwd").await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_encoded_slash_traversal_is_forbidden() {
        let dir = site();
        let response = get(&dir, "/docs/..%2f..%2fsecret").await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_outside_root_is_forbidden() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        let dir = site();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("link.txt"))
            .unwrap();

        let response = get(&dir, "/link.txt").await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_index_outside_root_is_forbidden() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("index.html"), "secret").unwrap();
        let dir = site();
        std::fs::create_dir(dir.path().join("blog")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("index.html"),
            dir.path().join("blog/index.html"),
        )
        .unwrap();

        let response = get(&dir, "/blog/").await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_head_has_length_but_no_body() {
        let dir = site();
        let response = request(&dir, Method::HEAD, "/hello.html").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "19");
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn test_post_is_method_not_allowed() {
        let dir = site();
        let response = request(&dir, Method::POST, "/hello.html").await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "GET,HEAD");
    }
}
