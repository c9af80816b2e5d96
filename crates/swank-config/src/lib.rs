//! Configuration management for swank.
//!
//! Parses optional `swank.toml` configuration files with serde and provides
//! auto-discovery of config files in parent directories.
//!
//! Values are layered in this order, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `swank.toml` (explicit path or discovered)
//! 3. The `PORT` environment variable ([`EnvSettings`])
//! 4. Command-line flags ([`CliSettings`])
//!
//! ## Environment Variable Expansion
//!
//! String configuration values support environment variable expansion:
//!
//! - `${VAR}` - expands to the value of VAR, errors if unset
//! - `${VAR:-default}` - expands to VAR if set, otherwise uses default
//!
//! Expanded fields:
//! - `server.host`
//! - `server.root`

mod expand;

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default port for the static file server.
pub const DEFAULT_PORT: u16 = 8000;

/// Default port for the live reload notifier (the conventional livereload port).
pub const DEFAULT_RELOAD_PORT: u16 = 35729;

/// Default debounce window for file change events.
pub const DEFAULT_DEBOUNCE_MS: u64 = 100;

/// Upper bound for the debounce window.
const MAX_DEBOUNCE_MS: u64 = 10_000;

/// Configuration filename to search for.
const CONFIG_FILENAME: &str = "swank.toml";

/// Environment variable holding the default port.
const PORT_ENV: &str = "PORT";

/// CLI settings that override configuration file values.
///
/// All fields are optional. Only non-None values override the loaded config.
#[derive(Debug, Default)]
pub struct CliSettings {
    /// Override server host.
    pub host: Option<String>,
    /// Override server port.
    pub port: Option<u16>,
    /// Override the directory to serve.
    pub root: Option<PathBuf>,
    /// Override watch (live reload) enabled flag.
    pub watch_enabled: Option<bool>,
    /// Override live reload notifier port.
    pub reload_port: Option<u16>,
    /// Override request logging flag.
    pub log_enabled: Option<bool>,
    /// Override tunnel enabled flag.
    pub tunnel_enabled: Option<bool>,
}

/// Settings taken from the process environment.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct EnvSettings {
    /// Port from `PORT`.
    pub port: Option<u16>,
}

impl EnvSettings {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if `PORT` is set but not a port number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through a lookup function (used by tests).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if `PORT` is set but not a port number.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = match lookup(PORT_ENV) {
            Some(raw) if !raw.trim().is_empty() => Some(raw.trim().parse::<u16>().map_err(|_| {
                ConfigError::Validation(format!("{PORT_ENV} must be a port number, got {raw:?}"))
            })?),
            _ => None,
        };
        Ok(Self { port })
    }
}

/// Application configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Live reload configuration.
    pub live_reload: LiveReloadConfig,
    /// Request logging configuration.
    pub log: LogConfig,
    /// Public tunnel configuration.
    pub tunnel: TunnelConfig,

    /// Resolved directory to serve (set after loading).
    #[serde(skip)]
    pub root_resolved: PathBuf,
    /// Path to the config file (set after loading).
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self::default_with_base(Path::new("."))
    }
}

/// Server configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Directory to serve, relative to the config file.
    root: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: DEFAULT_PORT,
            root: None,
        }
    }
}

/// Live reload configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LiveReloadConfig {
    /// Whether watch mode (live reload) is enabled.
    pub enabled: bool,
    /// Port for the reload notifier.
    pub port: u16,
    /// Debounce window in milliseconds.
    pub debounce_ms: u64,
    /// Glob patterns (relative to the root) that never trigger a reload.
    pub ignore: Option<Vec<String>>,
}

impl Default for LiveReloadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_RELOAD_PORT,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            ignore: None,
        }
    }
}

/// Request logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Whether every request is logged.
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Public tunnel configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Whether the local port is exposed through ngrok.
    pub enabled: bool,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File not found.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// Validation error.
    #[error("Configuration error: {0}")]
    Validation(String),
    /// Environment variable error during expansion.
    #[error("Environment variable error in {field}: {message}")]
    EnvVar {
        /// Config field path (e.g., "`server.host`").
        field: String,
        /// Error message (e.g., "${`SWANK_HOST`} not set").
        message: String,
    },
}

/// Require a string field to be non-empty.
fn require_non_empty(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

/// Require a port field to be non-zero.
fn require_port(port: u16, field: &str) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::Validation(format!("{field} cannot be 0")));
    }
    Ok(())
}

impl Config {
    /// Load configuration from file, the environment and CLI settings.
    ///
    /// If `config_path` is provided, loads from that file.
    /// Otherwise, searches for `swank.toml` in current directory and parents.
    ///
    /// # Errors
    ///
    /// Returns error if explicit `config_path` doesn't exist, parsing fails,
    /// `PORT` is malformed, or the final configuration is invalid.
    pub fn load(
        config_path: Option<&Path>,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, &EnvSettings::from_env()?, cli_settings)
    }

    /// Load configuration with explicit environment settings.
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`].
    pub fn load_with_env(
        config_path: Option<&Path>,
        env: &EnvSettings,
        cli_settings: Option<&CliSettings>,
    ) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            Self::load_from_file(path)?
        } else if let Some(discovered) = Self::discover_config() {
            Self::load_from_file(&discovered)?
        } else {
            Self::default_with_cwd()
        };

        config.apply_env(env);
        if let Some(settings) = cli_settings {
            config.apply_cli_settings(settings);
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply environment settings to the configuration.
    fn apply_env(&mut self, env: &EnvSettings) {
        if let Some(port) = env.port {
            self.server.port = port;
        }
    }

    /// Apply CLI settings to the configuration.
    fn apply_cli_settings(&mut self, settings: &CliSettings) {
        if let Some(host) = &settings.host {
            self.server.host.clone_from(host);
        }
        if let Some(port) = settings.port {
            self.server.port = port;
        }
        if let Some(root) = &settings.root {
            self.root_resolved.clone_from(root);
        }
        if let Some(watch_enabled) = settings.watch_enabled {
            self.live_reload.enabled = watch_enabled;
        }
        if let Some(reload_port) = settings.reload_port {
            self.live_reload.port = reload_port;
        }
        if let Some(log_enabled) = settings.log_enabled {
            self.log.enabled = log_enabled;
        }
        if let Some(tunnel_enabled) = settings.tunnel_enabled {
            self.tunnel.enabled = tunnel_enabled;
        }
    }

    /// Search for config file in current directory and parents.
    fn discover_config() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;
        loop {
            let candidate = current.join(CONFIG_FILENAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                return None;
            }
        }
    }

    /// Create default config serving the current working directory.
    fn default_with_cwd() -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::default_with_base(&cwd)
    }

    /// Create default config serving the given base directory.
    fn default_with_base(base: &Path) -> Self {
        Self {
            server: ServerConfig::default(),
            live_reload: LiveReloadConfig::default(),
            log: LogConfig::default(),
            tunnel: TunnelConfig::default(),
            root_resolved: base.to_path_buf(),
            config_path: None,
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;

        // Expand environment variables before path resolution
        config.expand_env_vars()?;

        let config_dir = path.parent().unwrap_or(Path::new("."));
        config.resolve_paths(config_dir);
        config.config_path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// Called automatically at the end of [`Config::load`].
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if any validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_live_reload()?;
        Ok(())
    }

    /// Validate server configuration.
    fn validate_server(&self) -> Result<(), ConfigError> {
        require_non_empty(&self.server.host, "server.host")?;
        require_port(self.server.port, "server.port")?;

        if !self.root_resolved.is_dir() {
            return Err(ConfigError::Validation(format!(
                "root directory does not exist: {}",
                self.root_resolved.display()
            )));
        }

        Ok(())
    }

    /// Validate live reload configuration.
    fn validate_live_reload(&self) -> Result<(), ConfigError> {
        if !self.live_reload.enabled {
            return Ok(());
        }

        require_port(self.live_reload.port, "live_reload.port")?;
        if self.live_reload.port == self.server.port {
            return Err(ConfigError::Validation(format!(
                "live_reload.port and server.port must differ (both are {})",
                self.server.port
            )));
        }

        if self.live_reload.debounce_ms > MAX_DEBOUNCE_MS {
            return Err(ConfigError::Validation(format!(
                "live_reload.debounce_ms cannot exceed {MAX_DEBOUNCE_MS}"
            )));
        }

        for pattern in self.live_reload.ignore.iter().flatten() {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Validation(format!("live_reload.ignore: invalid pattern {pattern:?}: {e}"))
            })?;
        }

        Ok(())
    }

    /// Expand environment variable references in configuration strings.
    fn expand_env_vars(&mut self) -> Result<(), ConfigError> {
        self.server.host = expand::expand_env(&self.server.host, "server.host")?;
        if let Some(ref root) = self.server.root {
            self.server.root = Some(expand::expand_env(root, "server.root")?);
        }
        Ok(())
    }

    /// Resolve the relative root against the config file directory.
    fn resolve_paths(&mut self, config_dir: &Path) {
        self.root_resolved = config_dir.join(self.server.root.as_deref().unwrap_or("."));
    }
}
