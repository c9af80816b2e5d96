//! Server startup and shutdown.
//!
//! Brings the components up in a fixed order:
//!
//! ```text
//! Configuring ─► StartingStaticServer ─► StartingWatchPipeline ─► StartingTunnel ─► Ready
//!      │                 │                        │
//!      └─────────────────┴────────────────────────┴──► Failed
//! ```
//!
//! Watch and tunnel phases are skipped when disabled. A failure before
//! `Ready` releases whatever was already started. Tunnel and watcher
//! problems degrade to a warning instead of failing startup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use swank_watch::{ChangeReceiver, WatchHandle, WatchOptions, Watcher};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::ServerConfig;
use crate::app::{self, RouterOptions};
use crate::error::{BindError, ServerError};
use crate::live_reload::ReloadNotifier;
use crate::state::AppState;
use crate::tunnel::{NgrokTunnel, Tunnel, TunnelProvider};

/// Startup phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Validating configuration.
    Configuring,
    /// Binding the static server.
    StartingStaticServer,
    /// Starting the reload notifier and file watcher.
    StartingWatchPipeline,
    /// Opening the public tunnel.
    StartingTunnel,
    /// Everything requested is running.
    Ready,
    /// Startup failed; started components were released.
    Failed,
}

/// Result of a successful startup.
pub struct Startup {
    /// Handle to the running server.
    pub handle: ServerHandle,
    /// Non-fatal problem encountered while starting (e.g. tunnel unavailable).
    pub warning: Option<String>,
}

/// Running static server and its helpers.
struct HttpServer {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Running watcher and the task forwarding its changes to the notifier.
struct WatchPipeline {
    handle: WatchHandle,
    forwarder: JoinHandle<()>,
}

/// Resources owned by a running server, released in reverse start order.
#[derive(Default)]
struct Resources {
    http: Option<HttpServer>,
    notifier: Option<ReloadNotifier>,
    watch: Option<WatchPipeline>,
    tunnel: Option<Tunnel>,
}

impl Resources {
    /// Release everything still held. Safe to call repeatedly.
    async fn release(&mut self) {
        if let Some(tunnel) = self.tunnel.take() {
            // Killing and reaping the process blocks
            let _ = tokio::task::spawn_blocking(move || tunnel.close()).await;
        }

        if let Some(watch) = self.watch.take() {
            watch.handle.stop();
            let _ = watch.forwarder.await;
        }

        if let Some(notifier) = self.notifier.take() {
            notifier.stop();
            notifier.wait().await;
        }

        if let Some(http) = self.http.take() {
            let _ = http.shutdown.send(());
            let _ = http.task.await;
            tracing::info!("Static server stopped");
        }
    }

    fn is_empty(&self) -> bool {
        self.http.is_none()
            && self.notifier.is_none()
            && self.watch.is_none()
            && self.tunnel.is_none()
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        // Signal only; awaiting is not possible here
        if let Some(notifier) = self.notifier.take() {
            notifier.stop();
        }
        if let Some(http) = self.http.take() {
            let _ = http.shutdown.send(());
        }
    }
}

/// Handle to a running server.
///
/// Dropping the handle signals every component to stop; call
/// [`shutdown`](Self::shutdown) to wait for them.
pub struct ServerHandle {
    url: String,
    local_addr: SocketAddr,
    reload_addr: Option<SocketAddr>,
    resources: Resources,
}

impl ServerHandle {
    /// URL to announce: the tunnel URL if one is open, else the local URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Address of the static server.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the reload notifier, if watching.
    #[must_use]
    pub fn reload_addr(&self) -> Option<SocketAddr> {
        self.reload_addr
    }

    /// Check whether the server has been shut down.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.resources.is_empty()
    }

    /// Stop the tunnel, watcher, notifier and static server, in that order.
    ///
    /// Idempotent: later calls return immediately.
    pub async fn shutdown(&mut self) {
        if self.resources.is_empty() {
            return;
        }
        self.resources.release().await;
        tracing::info!("Server stopped");
    }
}

/// Start a server with the default tunnel provider (ngrok).
///
/// # Errors
///
/// Returns [`ServerError::Config`] for an invalid configuration and
/// [`ServerError::Bind`] if a listener cannot be bound. Nothing is left
/// running on error.
pub async fn start(config: ServerConfig) -> Result<Startup, ServerError> {
    start_with_tunnel(config, Arc::new(NgrokTunnel::new())).await
}

/// Start a server with an explicit tunnel provider.
///
/// # Errors
///
/// Same as [`start`].
pub async fn start_with_tunnel(
    config: ServerConfig,
    provider: Arc<dyn TunnelProvider>,
) -> Result<Startup, ServerError> {
    Orchestrator::new(config, provider).run().await
}

/// Start a server and report the outcome through a callback.
///
/// The callback is invoked exactly once, as `(error, warning, url)`: either
/// an error alone, or an optional warning with the URL to announce.
pub async fn serve<F>(config: ServerConfig, callback: F) -> Option<ServerHandle>
where
    F: FnOnce(Option<&ServerError>, Option<&str>, Option<&str>),
{
    match start(config).await {
        Ok(startup) => {
            callback(None, startup.warning.as_deref(), Some(startup.handle.url()));
            Some(startup.handle)
        }
        Err(e) => {
            callback(Some(&e), None, None);
            None
        }
    }
}

/// Startup state machine.
struct Orchestrator {
    config: ServerConfig,
    provider: Arc<dyn TunnelProvider>,
    phase: Phase,
    resources: Resources,
    warnings: Vec<String>,
}

impl Orchestrator {
    fn new(config: ServerConfig, provider: Arc<dyn TunnelProvider>) -> Self {
        Self {
            config,
            provider,
            phase: Phase::Configuring,
            resources: Resources::default(),
            warnings: Vec::new(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Startup phase");
        self.phase = phase;
    }

    async fn run(mut self) -> Result<Startup, ServerError> {
        match self.start_components().await {
            Ok((local_addr, reload_addr, url)) => {
                self.enter(Phase::Ready);
                let warning = if self.warnings.is_empty() {
                    None
                } else {
                    Some(self.warnings.join("; "))
                };
                Ok(Startup {
                    handle: ServerHandle {
                        url,
                        local_addr,
                        reload_addr,
                        resources: std::mem::take(&mut self.resources),
                    },
                    warning,
                })
            }
            Err(e) => {
                self.enter(Phase::Failed);
                self.resources.release().await;
                tracing::error!(error = %e, "Server failed to start");
                Err(e)
            }
        }
    }

    async fn start_components(
        &mut self,
    ) -> Result<(SocketAddr, Option<SocketAddr>, String), ServerError> {
        self.config.validate()?;
        let root = std::fs::canonicalize(&self.config.root).map_err(|e| {
            swank_config::ConfigError::Validation(format!(
                "root is not a readable directory: {}: {e}",
                self.config.root.display()
            ))
        })?;

        self.enter(Phase::StartingStaticServer);
        let local_addr = self.start_static_server(root.clone()).await?;
        let local_url = format!("http://{}:{}", self.config.host, local_addr.port());

        let mut reload_addr = None;
        if self.config.watch_enabled {
            self.enter(Phase::StartingWatchPipeline);
            reload_addr = self.start_watch_pipeline(&root).await?;
        }

        let mut url = local_url;
        if self.config.tunnel_enabled {
            self.enter(Phase::StartingTunnel);
            if let Some(public_url) = self.start_tunnel(local_addr.port()).await {
                url = public_url;
            }
        }

        tracing::info!(url = %url, root = %root.display(), "Serving");
        Ok((local_addr, reload_addr, url))
    }

    async fn start_static_server(&mut self, root: PathBuf) -> Result<SocketAddr, ServerError> {
        let host = self.config.host.as_str();
        let port = self.config.port;
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|source| BindError::new("static server", host, port, source))?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| BindError::new("static server", host, port, source))?;

        let options = RouterOptions {
            reload_port: self.config.watch_enabled.then_some(self.config.reload_port),
            log_enabled: self.config.log_enabled,
        };
        let router = app::create_router(Arc::new(AppState::new(root)), options);

        let (shutdown, signal) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Static server failed");
            }
        });

        tracing::info!(address = %local_addr, "Static server listening");
        self.resources.http = Some(HttpServer { shutdown, task });
        Ok(local_addr)
    }

    /// Start the notifier, then the watcher feeding it.
    ///
    /// A notifier bind failure is fatal. A watcher failure only disables
    /// reloading: the notifier is stopped and a warning recorded.
    async fn start_watch_pipeline(
        &mut self,
        root: &Path,
    ) -> Result<Option<SocketAddr>, ServerError> {
        let notifier = ReloadNotifier::start(&self.config.host, self.config.reload_port).await?;
        let reload_addr = notifier.local_addr();
        self.resources.notifier = Some(notifier.clone());

        let options = WatchOptions {
            debounce: self.config.debounce,
            ignore: self.config.ignore.clone(),
        };
        let root = root.to_path_buf();
        let started = tokio::task::spawn_blocking(move || Watcher::start(&root, &options)).await;

        match started {
            Ok(Ok((changes, handle))) => {
                let log_enabled = self.config.log_enabled;
                let forwarder = tokio::task::spawn_blocking(move || {
                    forward_changes(&changes, &notifier, log_enabled);
                });
                self.resources.watch = Some(WatchPipeline { handle, forwarder });
                Ok(Some(reload_addr))
            }
            Ok(Err(e)) => {
                self.disable_reload(format!("live reload disabled: {e}")).await;
                Ok(None)
            }
            Err(e) => {
                self.disable_reload(format!("live reload disabled: watcher panicked: {e}"))
                    .await;
                Ok(None)
            }
        }
    }

    async fn disable_reload(&mut self, warning: String) {
        tracing::warn!("{warning}");
        if let Some(notifier) = self.resources.notifier.take() {
            notifier.stop();
            notifier.wait().await;
        }
        self.warnings.push(warning);
    }

    /// Open the tunnel; failures become warnings.
    async fn start_tunnel(&mut self, port: u16) -> Option<String> {
        let provider = Arc::clone(&self.provider);
        match tokio::task::spawn_blocking(move || provider.open(port)).await {
            Ok(Ok(tunnel)) => {
                let url = tunnel.public_url().to_owned();
                self.resources.tunnel = Some(tunnel);
                Some(url)
            }
            Ok(Err(e)) => {
                tracing::warn!(provider = self.provider.name(), error = %e, "Tunnel unavailable");
                self.warnings.push(e.to_string());
                None
            }
            Err(e) => {
                let warning = format!("{} failed: {e}", self.provider.name());
                tracing::warn!("{warning}");
                self.warnings.push(warning);
                None
            }
        }
    }
}

/// Pass watcher output to the notifier until the watch ends.
///
/// A watch error stops the notifier; static serving is unaffected.
fn forward_changes(changes: &ChangeReceiver, notifier: &ReloadNotifier, log_enabled: bool) {
    for item in changes.iter() {
        match item {
            Ok(event) => {
                if log_enabled {
                    for path in event.url_paths() {
                        tracing::info!(path = %path, "File changed");
                    }
                }
                let clients = notifier.notify(&event);
                tracing::debug!(clients, files = event.paths.len(), "Reload sent");
            }
            Err(e) => {
                tracing::error!(error = %e, "Live reload stopped");
                notifier.stop();
                break;
            }
        }
    }
}
