//! Configuration for the live server.
//!
//! Values come from three layers, lowest priority first: built-in defaults,
//! an optional `live-server.toml` next to the entry document, and command
//! line flags. Every field has a default so an empty file is valid.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// File name looked up in the served root when no `--config` is given.
pub const CONFIG_FILE: &str = "live-server.toml";

/// Upper bound for the debounce window. A longer window would make the page
/// feel stale, so larger values are clamped.
pub const MAX_DEBOUNCE_MS: u64 = 1000;

/// Runtime settings for the server, watcher and reload channel.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Interface to bind. Defaults to every interface.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Route that upgrades to the reload WebSocket.
    #[serde(default = "default_reload_path")]
    pub reload_path: String,

    /// Quiet window used to coalesce bursts of file events, in milliseconds.
    /// `0` broadcasts once per accepted event.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long a single reload push may take before the client is dropped.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// Pending notifications a client may lag behind before it is pruned.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            reload_path: default_reload_path(),
            debounce_ms: default_debounce_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            client_buffer: default_client_buffer(),
        }
    }
}

/// Values passed on the command line. `None` keeps the file/default value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debounce_ms: Option<u64>,
}

impl Config {
    /// Parse a config from TOML source and validate it.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: Config = toml::from_str(source)?;
        config.validated()
    }

    /// Load the config for a served root.
    ///
    /// An explicit path must exist. Without one, `live-server.toml` in `root`
    /// is used when present and defaults otherwise.
    pub fn load(root: &Path, explicit: Option<&Path>) -> Result<Self> {
        let (path, required) = match explicit {
            Some(p) => (p.to_path_buf(), true),
            None => (root.join(CONFIG_FILE), false),
        };

        match fs::read_to_string(&path) {
            Ok(source) => Self::from_toml(&source),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(Error::ConfigRead { path, source }),
        }
    }

    /// Apply command line overrides on top of this config.
    pub fn with_overrides(mut self, overrides: Overrides) -> Result<Self> {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(ms) = overrides.debounce_ms {
            self.debounce_ms = ms;
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self> {
        let route_chars = self
            .reload_path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '.'));
        if !self.reload_path.starts_with('/') || self.reload_path.len() < 2 || !route_chars {
            return Err(Error::InvalidConfig(format!(
                "reload_path must be an absolute route like \"/ws\", got {:?}",
                self.reload_path
            )));
        }
        if self.client_buffer == 0 {
            return Err(Error::InvalidConfig("client_buffer must be at least 1".into()));
        }
        if self.send_timeout_ms == 0 {
            return Err(Error::InvalidConfig("send_timeout_ms must be at least 1".into()));
        }
        self.debounce_ms = self.debounce_ms.min(MAX_DEBOUNCE_MS);
        Ok(self)
    }

    /// Socket address string in `host:port` form.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

// --- Default value providers ---

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_reload_path() -> String { "/ws".to_string() }
fn default_debounce_ms() -> u64 { 100 }
fn default_send_timeout_ms() -> u64 { 2000 }
fn default_client_buffer() -> usize { 4 }
