// SPDX-License-Identifier: GPL-3.0-or-later

//! On-disk configuration: a YAML document describing where to listen, which
//! original-destination lookup backend to use, buffer sizing, logging, and
//! daemonization — the modern equivalent of the original's `getopt`-parsed
//! command-line flags plus a handful of compile-time constants.

use std::{fs, net::SocketAddr, path::Path};

use serde::Deserialize;
use thiserror::Error;

/// Default per-direction ring capacity in bytes, carried over from the
/// original implementation's `BUFSIZE` (see spec's Open Question decision
/// in `DESIGN.md`: kept at 2048 rather than made configurable-by-default).
pub const DEFAULT_BUFFER_CAPACITY: usize = 2048;

/// Default name under which [`crate::lookup::redirect::RedirectLookup`] is
/// registered and selected, matching `redirect_backend_register(NULL)`.
pub const DEFAULT_BACKEND: &str = crate::lookup::redirect::NAME;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, #[source] source: std::io::Error },

    #[error("failed to parse config file {path}: {source}")]
    Parse { path: String, #[source] source: serde_yaml::Error },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Address and port the proxy listens on.
    pub listen: SocketAddr,

    /// Per-direction ring capacity in bytes.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub daemon: DaemonConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Name of the registered [`crate::lookup::OrigDestLookup`] backend to
    /// activate, e.g. `"redirect"`. A name-based choice rather than a
    /// direct handle because it is read from this text file.
    pub backend: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self { backend: DEFAULT_BACKEND.to_string() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info"` or
    /// `"l4proxy=debug,tokio=warn"`.
    pub filter: Option<String>,

    /// If set, logs are appended to this file (rotated daily) instead of
    /// stderr — required once daemonized, since stderr no longer goes
    /// anywhere a human can see it.
    pub file: Option<String>,

    /// Emit newline-delimited JSON instead of the human-readable format.
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Double-fork into the background at startup.
    #[serde(default)]
    pub daemonize: bool,

    /// Path to the PID file locked for the process lifetime.
    pub pidfile: Option<String>,
}

fn default_buffer_capacity() -> usize {
    DEFAULT_BUFFER_CAPACITY
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::Invalid(
                "buffer_capacity must be greater than zero".to_string(),
            ));
        }
        if self.upstream.backend.is_empty() {
            return Err(ConfigError::Invalid("upstream.backend must not be empty".to_string()));
        }
        if self.daemon.daemonize && self.daemon.pidfile.is_none() {
            return Err(ConfigError::Invalid(
                "daemon.pidfile is required when daemon.daemonize is set".to_string(),
            ));
        }
        Ok(())
    }
}
