//! Shared test helpers.

use std::fs;
use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use axum::body::to_bytes;
use axum::http::HeaderMap;
use axum::response::Response;
use serde_json::Value;
use ureq::Agent;

/// Site fixture with pages, a stylesheet, an image and a sub-directory.
pub(crate) fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("index.html"),
        "<html><head><title>Home</title></head><body><h1>Home</h1></body></html>",
    )
    .unwrap();
    fs::write(dir.path().join("hello.html"), "<p>Hello, World</p>").unwrap();
    fs::write(dir.path().join("image.png"), [0x89, b'P', b'N', b'G', 0x0d, 0x0a]).unwrap();
    fs::create_dir(dir.path().join("css")).unwrap();
    fs::write(dir.path().join("css/site.css"), "body { color: black; }").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs/index.html"), "<p>Docs</p>").unwrap();
    dir
}

/// A port that was free a moment ago.
pub(crate) fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Collect a response body as a string.
pub(crate) async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Response of a request made with [`http_request`].
#[derive(Debug)]
pub(crate) struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpResponse {
    fn read(mut response: ureq::http::Response<ureq::Body>) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.body_mut().read_to_string().unwrap();
        Self {
            status,
            headers,
            body,
        }
    }

    /// Header value by name.
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Client that reports every status as a response.
fn agent() -> Agent {
    Agent::config_builder()
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(10)))
        .build()
        .into()
}

/// Issue a bodiless request on the blocking pool.
pub(crate) async fn http_request(addr: SocketAddr, method: &'static str, path: &str) -> HttpResponse {
    let url = format!("http://{addr}{path}");
    tokio::task::spawn_blocking(move || {
        let agent = agent();
        let response = match method {
            "GET" => agent.get(&url).call(),
            "HEAD" => agent.head(&url).call(),
            "POST" => agent.post(&url).send_empty(),
            other => panic!("unsupported method {other}"),
        };
        HttpResponse::read(response.unwrap())
    })
    .await
    .unwrap()
}

/// `GET` a path.
pub(crate) async fn http_get(addr: SocketAddr, path: &str) -> HttpResponse {
    http_request(addr, "GET", path).await
}

/// `POST` a JSON body.
pub(crate) async fn http_post_json(addr: SocketAddr, path: &str, body: Value) -> HttpResponse {
    let url = format!("http://{addr}{path}");
    tokio::task::spawn_blocking(move || {
        HttpResponse::read(agent().post(&url).send_json(&body).unwrap())
    })
    .await
    .unwrap()
}
