//! Public tunnels.
//!
//! A [`TunnelProvider`] exposes a local port under a public URL. The default
//! provider drives the `ngrok` binary and reads the URL from its local API.
//! Providers are synchronous; the orchestrator runs them on the blocking pool.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use ureq::Agent;

/// Local API that ngrok serves while running.
const NGROK_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";

/// How long to wait for ngrok to report a URL.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Delay between API polls.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Per-request timeout for API polls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Something that can expose a local port publicly.
pub trait TunnelProvider: Send + Sync {
    /// Provider name used in messages.
    fn name(&self) -> &str;

    /// Open a tunnel to `port` on the local machine.
    ///
    /// Blocks until the public URL is known.
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError`] if the provider is missing or does not come up.
    fn open(&self, port: u16) -> Result<Tunnel, TunnelError>;
}

/// Tunnel error.
///
/// Never fatal: the server keeps running locally and reports this as a
/// warning.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The provider binary is not installed.
    #[error("{provider} is optional and not installed; install it to get a public URL")]
    ProviderMissing { provider: String },

    /// The provider could not be started.
    #[error("failed to start {provider}: {source}")]
    Spawn {
        provider: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider process exited before a URL was known.
    #[error("{provider} exited before reporting a public URL ({status})")]
    Exited { provider: String, status: ExitStatus },

    /// No URL within the allotted time.
    #[error("{provider} did not report a public URL within {}s", .timeout.as_secs())]
    Timeout { provider: String, timeout: Duration },
}

/// An open tunnel.
///
/// Uses RAII: dropping the tunnel stops the provider process.
#[derive(Debug)]
pub struct Tunnel {
    public_url: String,
    process: Option<Child>,
}

impl Tunnel {
    /// Tunnel with no process to manage.
    #[must_use]
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into(),
            process: None,
        }
    }

    /// Tunnel backed by a child process that is killed on close.
    #[must_use]
    pub fn with_process(public_url: impl Into<String>, process: Child) -> Self {
        Self {
            public_url: public_url.into(),
            process: Some(process),
        }
    }

    /// Public URL that reaches the local server.
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Close the tunnel (consumes it).
    pub fn close(mut self) {
        self.terminate();
    }

    fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
            tracing::info!(url = %self.public_url, "Tunnel closed");
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Tunnel provider backed by the `ngrok` binary.
pub struct NgrokTunnel {
    program: PathBuf,
    api_url: String,
    timeout: Duration,
    agent: Agent,
}

impl Default for NgrokTunnel {
    fn default() -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            program: PathBuf::from("ngrok"),
            api_url: NGROK_API_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            agent,
        }
    }
}

impl NgrokTunnel {
    /// Provider using `ngrok` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Poll a different local API URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    /// Give up after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ask the local API for the public URL of the tunnel to `port`.
    fn fetch_public_url(&self, port: u16) -> Option<String> {
        let response = self
            .agent
            .get(&self.api_url)
            .header("Accept", "application/json")
            .call()
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        let list: TunnelList = response.into_body().read_json().ok()?;
        select_public_url(&list, port)
    }
}

impl TunnelProvider for NgrokTunnel {
    fn name(&self) -> &str {
        "ngrok"
    }

    fn open(&self, port: u16) -> Result<Tunnel, TunnelError> {
        let provider = self.name().to_owned();

        let mut process = Command::new(&self.program)
            .args(["http", &port.to_string(), "--log", "stdout"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| {
                if source.kind() == ErrorKind::NotFound {
                    TunnelError::ProviderMissing {
                        provider: provider.clone(),
                    }
                } else {
                    TunnelError::Spawn {
                        provider: provider.clone(),
                        source,
                    }
                }
            })?;

        let deadline = Instant::now() + self.timeout;
        loop {
            if let Ok(Some(status)) = process.try_wait() {
                return Err(TunnelError::Exited { provider, status });
            }

            if let Some(url) = self.fetch_public_url(port) {
                tracing::info!(url = %url, "Tunnel open");
                return Ok(Tunnel::with_process(url, process));
            }

            if Instant::now() >= deadline {
                let _ = process.kill();
                let _ = process.wait();
                return Err(TunnelError::Timeout {
                    provider,
                    timeout: self.timeout,
                });
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Response of ngrok's `/api/tunnels`.
#[derive(Debug, Deserialize)]
struct TunnelList {
    tunnels: Vec<TunnelInfo>,
}

#[derive(Debug, Deserialize)]
struct TunnelInfo {
    public_url: String,
    config: Option<TunnelTarget>,
}

#[derive(Debug, Deserialize)]
struct TunnelTarget {
    addr: String,
}

/// Pick the tunnel forwarding to `port`, preferring HTTPS.
fn select_public_url(list: &TunnelList, port: u16) -> Option<String> {
    let matching: Vec<&TunnelInfo> = list
        .tunnels
        .iter()
        .filter(|t| {
            t.config
                .as_ref()
                .is_none_or(|target| target_port(&target.addr) == Some(port))
        })
        .collect();

    matching
        .iter()
        .find(|t| t.public_url.starts_with("https://"))
        .or_else(|| matching.first())
        .map(|t| t.public_url.clone())
}

/// Port of an ngrok target such as `http://localhost:8000` or `8000`.
fn target_port(addr: &str) -> Option<u16> {
    addr.rsplit(':').next()?.trim_end_matches('/').parse().ok()
}
