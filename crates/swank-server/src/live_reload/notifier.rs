//! Reload notifier.
//!
//! A small HTTP + WebSocket server on its own port. Browsers subscribe over
//! `/livereload`; every [`ChangeEvent`] passed to [`ReloadNotifier::notify`]
//! is broadcast to all current subscribers in the order received.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use swank_watch::ChangeEvent;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::websocket;
use crate::error::BindError;

/// Messages buffered per subscriber before it starts lagging.
const CHANNEL_CAPACITY: usize = 100;

/// Client script served at `/livereload.js`.
const CLIENT_SCRIPT: &str = include_str!("livereload.js");

/// Message pushed to subscribers when files change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadMessage {
    /// Always `"reload"`.
    pub command: &'static str,
    /// First changed path.
    pub path: String,
    /// All changed paths, relative to the root.
    pub files: Vec<String>,
    /// Let the client swap stylesheets in place when only CSS changed.
    #[serde(rename = "liveCSS")]
    pub live_css: bool,
}

impl ReloadMessage {
    /// Build the reload message for a change batch.
    #[must_use]
    pub fn reload(event: &ChangeEvent) -> Self {
        let files = event.url_paths();
        Self {
            command: "reload",
            path: files.first().cloned().unwrap_or_default(),
            files,
            live_css: true,
        }
    }
}

/// State shared by the notifier's handlers.
#[derive(Clone)]
pub(super) struct NotifierState {
    pub(super) sender: broadcast::Sender<ReloadMessage>,
    pub(super) shutdown: watch::Receiver<bool>,
    script: Arc<str>,
}

struct Inner {
    local_addr: SocketAddr,
    sender: broadcast::Sender<ReloadMessage>,
    shutdown: watch::Sender<bool>,
    stopped: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running reload notifier.
///
/// Cheap to clone; all clones control the same server.
#[derive(Clone)]
pub struct ReloadNotifier {
    inner: Arc<Inner>,
}

impl ReloadNotifier {
    /// Bind the notifier and start serving.
    ///
    /// # Errors
    ///
    /// Returns [`BindError`] if the address cannot be bound.
    pub async fn start(host: &str, port: u16) -> Result<Self, BindError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| BindError::new("reload notifier", host, port, source))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError::new("reload notifier", host, port, source))?;

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let state = NotifierState {
            sender: sender.clone(),
            shutdown: shutdown_rx.clone(),
            script: Arc::from(client_script(local_addr.port())),
        };
        let app = router(state);

        let mut signal = shutdown_rx;
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = signal.wait_for(|stopped| *stopped).await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Reload notifier failed");
            }
        });

        tracing::info!(address = %local_addr, "Reload notifier listening");

        Ok(Self {
            inner: Arc::new(Inner {
                local_addr,
                sender,
                shutdown,
                stopped: AtomicBool::new(false),
                task: Mutex::new(Some(task)),
            }),
        })
    }

    /// Address the notifier is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Number of connected subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Broadcast a change batch to every current subscriber.
    ///
    /// Returns how many subscribers were notified. Zero subscribers, an empty
    /// batch, or a stopped notifier is not an error.
    pub fn notify(&self, event: &ChangeEvent) -> usize {
        if event.paths.is_empty() || self.is_stopped() {
            return 0;
        }
        self.inner
            .sender
            .send(ReloadMessage::reload(event))
            .unwrap_or(0)
    }

    /// Check whether [`stop`](Self::stop) has been called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting connections and close all subscriptions.
    ///
    /// Idempotent. Use [`wait`](Self::wait) to await the listener closing.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        tracing::info!(address = %self.inner.local_addr, "Reload notifier stopped");
    }

    /// Wait for the listener task to finish after [`stop`](Self::stop).
    pub async fn wait(&self) {
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Client script with the notifier port filled in.
fn client_script(port: u16) -> String {
    CLIENT_SCRIPT.replace("__SWANK_RELOAD_PORT__", &port.to_string())
}

fn router(state: NotifierState) -> Router {
    Router::new()
        .route("/", get(welcome))
        .route("/changed", get(changed).post(changed))
        .route("/livereload", get(websocket::ws_handler))
        .route("/livereload.js", get(script))
        .with_state(state)
}

async fn welcome() -> Json<Value> {
    Json(json!({
        "swank": "Welcome",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct ChangedQuery {
    files: Option<String>,
}

/// JSON body accepted by `POST /changed`.
#[derive(Debug, Default, Deserialize)]
struct ChangedBody {
    #[serde(default)]
    files: Vec<String>,
}

/// Trigger a reload by hand.
///
/// Files come from `?files=a.html,css/site.css` and from a JSON body
/// `{"files": ["a.html"]}`; both may be combined.
async fn changed(
    State(state): State<NotifierState>,
    Query(query): Query<ChangedQuery>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, String)> {
    let body: ChangedBody = if body.iter().all(u8::is_ascii_whitespace) {
        ChangedBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid JSON body: {e}")))?
    };

    let listed = query.files.as_deref().unwrap_or_default().split(',');
    let files = listed
        .chain(body.files.iter().map(String::as_str))
        .map(str::trim)
        .filter(|file| !file.is_empty())
        .map(PathBuf::from);
    let event = ChangeEvent::new(files);

    let clients = if event.paths.is_empty() || *state.shutdown.borrow() {
        0
    } else {
        state.sender.send(ReloadMessage::reload(&event)).unwrap_or(0)
    };

    Ok(Json(json!({
        "clients": clients,
        "files": event.url_paths(),
    })))
}

async fn script(State(state): State<NotifierState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        state.script.to_string(),
    )
}
