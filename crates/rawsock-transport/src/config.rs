//! Provider configuration.
//!
//! Both providers read the same `ProviderConfig`. Values come from, in
//! increasing precedence: built-in defaults, an optional TOML file, and the
//! `RAWSOCK_ADDRESS` / `RAWSOCK_PORT` environment variables.
//!
//! ```toml
//! address = "0.0.0.0"
//! port = 9001
//! trusted = true
//! serializer = "json"
//! max_frame_len = 65536
//! ```

use std::path::{Path, PathBuf};

use rawsock_protocol::{SerializerKind, MAX_PAYLOAD_LEN};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listen/connect address.
pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

/// Default listen/connect port.
pub const DEFAULT_PORT: u16 = 8181;

/// Environment variable overriding the address.
pub const ADDRESS_ENV: &str = "RAWSOCK_ADDRESS";

/// Environment variable overriding the port.
pub const PORT_ENV: &str = "RAWSOCK_PORT";

/// Configuration shared by the router and client providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Address to bind (router) or dial (client).
    pub address: String,

    pub port: u16,

    /// Trust flag forwarded verbatim to every router-side transport.
    pub trusted: bool,

    /// Serializer installed on every transport.
    pub serializer: SerializerKind,

    /// Largest accepted frame payload in bytes.
    pub max_frame_len: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            trusted: false,
            serializer: SerializerKind::default(),
            max_frame_len: MAX_PAYLOAD_LEN,
        }
    }
}

impl ProviderConfig {
    /// Creates a configuration for `address:port` with default options.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Returns `address:port` in the form the socket APIs accept.
    ///
    /// Bare IPv6 addresses are bracketed, so `::1` becomes `[::1]:port`.
    pub fn socket_addr(&self) -> String {
        if self.address.contains(':') && !self.address.starts_with('[') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }

    /// Loads a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `RAWSOCK_ADDRESS` / `RAWSOCK_PORT` from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup(ADDRESS_ENV) {
            self.address = address;
        }

        if let Some(port) = lookup(PORT_ENV) {
            self.port = port.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                key: PORT_ENV.to_string(),
                value: port,
            })?;
        }

        Ok(self)
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config at {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidOverride { key: String, value: String },
}
