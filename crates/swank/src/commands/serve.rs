//! `swank` serve command implementation.

use std::path::PathBuf;

use clap::Args;
use swank_config::{CliSettings, Config};
use swank_server::{Startup, server_config_from_config};

use crate::error::CliError;
use crate::output::Output;

/// Arguments for serving a directory.
#[derive(Args, Debug)]
pub(crate) struct ServeArgs {
    /// Directory to serve (default: current directory).
    #[arg(value_name = "DIR", conflicts_with = "path")]
    dir: Option<PathBuf>,

    /// Directory to serve.
    #[arg(short = 'd', long)]
    path: Option<PathBuf>,

    /// Port to listen on (default: $PORT or 8000).
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Watch for changes and reload connected browsers.
    #[arg(short, long)]
    watch: bool,

    /// Port for the live reload server (default: 35729).
    #[arg(long)]
    reload_port: Option<u16>,

    /// Disable request and file change logging.
    #[arg(long)]
    no_log: bool,

    /// Expose the server through an ngrok tunnel.
    #[arg(short, long)]
    ngrok: bool,

    /// Path to configuration file (default: auto-discover swank.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServeArgs {
    /// Whether request logging was left on.
    pub(crate) fn log_enabled(&self) -> bool {
        !self.no_log
    }

    /// CLI overrides for the loaded configuration.
    ///
    /// Flags that were not given leave the config file value in place.
    fn cli_settings(&self) -> CliSettings {
        CliSettings {
            host: self.host.clone(),
            port: self.port,
            root: self.path.clone().or_else(|| self.dir.clone()),
            watch_enabled: self.watch.then_some(true),
            reload_port: self.reload_port,
            log_enabled: self.no_log.then_some(false),
            tunnel_enabled: self.ngrok.then_some(true),
        }
    }

    /// Execute the serve command.
    ///
    /// Runs until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration fails or the server fails to start.
    pub(crate) async fn execute(self, output: &Output) -> Result<(), CliError> {
        let config = Config::load(self.config.as_deref(), Some(&self.cli_settings()))?;
        let server_config = server_config_from_config(&config);

        let Startup {
            mut handle,
            warning,
        } = swank_server::start(server_config).await?;

        if let Some(warning) = warning {
            output.warning(&warning);
        }
        output.url(handle.url());

        let signal = tokio::signal::ctrl_c().await;
        tracing::info!("Shutdown signal received, stopping server...");
        handle.shutdown().await;

        signal.map_err(CliError::from)
    }
}
