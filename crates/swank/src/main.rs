//! swank CLI - local development web server.
//!
//! Serves a directory over HTTP, optionally reloading connected browsers
//! when files change and exposing the server through an ngrok tunnel.

mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use commands::ServeArgs;
use error::CliError;
use output::Output;

/// swank - serve a directory with live reload.
#[derive(Parser)]
#[command(name = "swank", version, about)]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

/// Log filter used when neither `--verbose` nor `RUST_LOG` is given.
fn default_filter(log_enabled: bool) -> &'static str {
    if log_enabled {
        "warn,swank_server=info"
    } else {
        "warn"
    }
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    // --verbose enables INFO everywhere, otherwise RUST_LOG or the default
    let filter = if cli.serve.verbose {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.serve.log_enabled())))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = tokio::runtime::Runtime::new()
        .map_err(CliError::from)
        .and_then(|rt| rt.block_on(cli.serve.execute(&output)));

    if let Err(err) = result {
        output.error(&err.to_string());
        std::process::exit(1);
    }
}
