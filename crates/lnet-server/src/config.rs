//! Server configuration.
//!
//! Settings are layered, later sources winning:
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`)
//! 3. Environment variables
//! 4. Command-line flags
//!
//! # Environment Variables
//!
//! - `LNET_LISTEN`: Listen address. Default: `localhost:9999`
//! - `LNET_DEBUG`: Trace raw frames (`true`/`false`). Default: `false`
//! - `LNET_OUTBOUND_CAPACITY`: Per-session outbound queue size. Default: `256`
//! - `LNET_KEEPALIVE_SECS`: Keepalive period in seconds, `0` disables. Default: `0`
//! - `LNET_GREETING`: Body of the welcome message. Default: `Hello`
//!
//! # Example
//!
//! ```toml
//! listen = "0.0.0.0:9999"
//! debug = false
//! outbound_capacity = 256
//! keepalive_secs = 60
//! greeting = "Hello"
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use lnet_relay::stanza::DEFAULT_GREETING;
use lnet_relay::{RelayServerConfig, SessionConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Relay server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on
    pub listen: String,
    /// Trace raw frames in both directions
    pub debug: bool,
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,
    /// Keepalive period in seconds; 0 disables
    pub keepalive_secs: u64,
    /// Body of the welcome message
    pub greeting: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: lnet_relay::server::DEFAULT_ADDR.to_string(),
            debug: false,
            outbound_capacity: 256,
            keepalive_secs: 0,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env(|key| std::env::var(key).ok())
    }

    /// Read a TOML file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Apply `LNET_*` overrides using `lookup` to read variables.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup("LNET_LISTEN") {
            self.listen = listen;
        }
        if let Some(debug) = lookup("LNET_DEBUG") {
            self.debug = parse_env("LNET_DEBUG", &debug)?;
        }
        if let Some(capacity) = lookup("LNET_OUTBOUND_CAPACITY") {
            self.outbound_capacity = parse_env("LNET_OUTBOUND_CAPACITY", &capacity)?;
        }
        if let Some(secs) = lookup("LNET_KEEPALIVE_SECS") {
            self.keepalive_secs = parse_env("LNET_KEEPALIVE_SECS", &secs)?;
        }
        if let Some(greeting) = lookup("LNET_GREETING") {
            self.greeting = greeting;
        }
        Ok(self)
    }

    /// Apply command-line flags. `--debug` can only switch debug mode on.
    pub fn with_flags(mut self, server: Option<String>, debug: bool) -> Self {
        if let Some(server) = server {
            self.listen = server;
        }
        self.debug |= debug;
        self
    }

    /// Check values and build the library configuration.
    pub fn to_server_config(&self) -> Result<RelayServerConfig> {
        let config = RelayServerConfig {
            addr: self.listen.clone(),
            session: SessionConfig {
                debug: self.debug,
                outbound_capacity: self.outbound_capacity,
                keepalive_interval: (self.keepalive_secs > 0)
                    .then(|| Duration::from_secs(self.keepalive_secs)),
                greeting: self.greeting.clone(),
                ..Default::default()
            },
        };
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        info!(
            listen = %self.listen,
            debug = self.debug,
            outbound_capacity = self.outbound_capacity,
            keepalive_secs = self.keepalive_secs,
            "Relay configuration"
        );
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}: {:?}", key, value))
}
