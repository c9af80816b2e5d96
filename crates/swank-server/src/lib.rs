//! Development HTTP server for swank.
//!
//! This crate serves a directory over HTTP and, optionally:
//! - injects a live-reload script into HTML responses
//! - runs a reload notifier that pushes file changes to connected browsers
//! - logs each request
//! - exposes the server through a public tunnel (ngrok)
//!
//! # Quick Start
//!
//! ```ignore
//! use std::path::PathBuf;
//! use swank_server::{ServerConfig, start};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig {
//!         root: PathBuf::from("public"),
//!         port: 8000,
//!         watch_enabled: true,
//!         ..ServerConfig::default()
//!     };
//!
//!     let mut startup = start(config).await.unwrap();
//!     println!("{}", startup.handle.url());
//!     tokio::signal::ctrl_c().await.unwrap();
//!     startup.handle.shutdown().await;
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! Browser ──HTTP──► static server (port)
//!    │                 │
//!    │                 ├─► request log (optional)
//!    │                 ├─► script injector (watch mode, HTML only)
//!    │                 └─► static files (root)
//!    │
//!    └──WebSocket──► reload notifier (reload port)
//!                          ▲
//!                          └── swank-watch ◄── filesystem
//! ```

mod app;
mod error;
mod live_reload;
mod middleware;
mod orchestrator;
mod state;
mod static_files;
mod tunnel;

#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::time::Duration;

use swank_config::ConfigError;

pub use error::{BindError, ServerError};
pub use live_reload::{ReloadMessage, ReloadNotifier};
pub use orchestrator::{ServerHandle, Startup, serve, start, start_with_tunnel};
pub use tunnel::{NgrokTunnel, Tunnel, TunnelError, TunnelProvider};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory to serve.
    pub root: PathBuf,
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable file watching and script injection.
    pub watch_enabled: bool,
    /// Port for the reload notifier.
    pub reload_port: u16,
    /// Quiet period before a change is announced.
    pub debounce: Duration,
    /// Glob patterns (relative to `root`) that never trigger a reload.
    pub ignore: Vec<String>,
    /// Log each request and each changed file.
    pub log_enabled: bool,
    /// Expose the server through a public tunnel.
    pub tunnel_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            host: "localhost".to_owned(),
            port: swank_config::DEFAULT_PORT,
            watch_enabled: false,
            reload_port: swank_config::DEFAULT_RELOAD_PORT,
            debounce: Duration::from_millis(swank_config::DEFAULT_DEBOUNCE_MS),
            ignore: swank_watch::DEFAULT_IGNORE
                .iter()
                .map(|p| (*p).to_owned())
                .collect(),
            log_enabled: false,
            tunnel_enabled: false,
        }
    }
}

impl ServerConfig {
    /// Check that the configuration can be started.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the root is not a directory,
    /// the host is empty, a port is zero, or both ports collide.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.is_dir() {
            return Err(ConfigError::Validation(format!(
                "root is not a readable directory: {}",
                self.root.display()
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Validation("host must not be empty".to_owned()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port must be between 1 and 65535".to_owned()));
        }
        if self.watch_enabled {
            if self.reload_port == 0 {
                return Err(ConfigError::Validation(
                    "reload port must be between 1 and 65535".to_owned(),
                ));
            }
            if self.reload_port == self.port {
                return Err(ConfigError::Validation(format!(
                    "reload port must differ from server port ({})",
                    self.port
                )));
            }
        }
        Ok(())
    }
}

/// Create server configuration from loaded swank config.
#[must_use]
pub fn server_config_from_config(config: &swank_config::Config) -> ServerConfig {
    let defaults = ServerConfig::default();

    ServerConfig {
        root: config.root_resolved.clone(),
        host: config.server.host.clone(),
        port: config.server.port,
        watch_enabled: config.live_reload.enabled,
        reload_port: config.live_reload.port,
        debounce: Duration::from_millis(config.live_reload.debounce_ms),
        ignore: config.live_reload.ignore.clone().unwrap_or(defaults.ignore),
        log_enabled: config.log.enabled,
        tunnel_enabled: config.tunnel.enabled,
    }
}
