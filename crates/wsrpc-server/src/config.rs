//! Server configuration.
//!
//! Values are layered: built-in defaults, then a TOML file, then `WSRPC_*`
//! environment variables. Command-line flags are applied on top by the
//! binary.
//!
//! ```toml
//! threads = 4
//! queue_capacity = 1024      # 0 = unbounded
//! max_frame_bytes = 1048576
//! shutdown_timeout_ms = 5000
//!
//! [[listen]]
//! kind = "websocket"
//! address = "127.0.0.1:8080"
//! ```

use crate::transport::{TransportKind, DEFAULT_MAX_FRAME_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const ENV_THREADS: &str = "WSRPC_THREADS";
pub const ENV_QUEUE_CAPACITY: &str = "WSRPC_QUEUE_CAPACITY";
pub const ENV_LISTEN: &str = "WSRPC_LISTEN";

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid listen address {0:?}")]
    InvalidListen(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// One address to accept connections on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_kind")]
    pub kind: TransportKind,
    pub address: String,
}

fn default_kind() -> TransportKind {
    TransportKind::WebSocket
}

impl ListenConfig {
    pub fn websocket(address: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::WebSocket,
            address: address.into(),
        }
    }

    pub fn tcp(address: impl Into<String>) -> Self {
        Self {
            kind: TransportKind::Tcp,
            address: address.into(),
        }
    }

    /// Parse `ws://host:port`, `websocket://host:port`, `tcp://host:port` or
    /// a bare `host:port` (WebSocket).
    pub fn parse(spec: &str) -> ConfigResult<Self> {
        let spec = spec.trim();
        let (kind, address) = match spec.split_once("://") {
            Some(("ws" | "websocket", rest)) => (TransportKind::WebSocket, rest),
            Some(("tcp", rest)) => (TransportKind::Tcp, rest),
            Some(_) => return Err(ConfigError::InvalidListen(spec.to_string())),
            None => (TransportKind::WebSocket, spec),
        };
        let address = address.trim_end_matches('/');
        if address.is_empty() || !address.contains(':') {
            return Err(ConfigError::InvalidListen(spec.to_string()));
        }
        Ok(Self {
            kind,
            address: address.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Worker threads; must be at least 1.
    pub threads: usize,
    /// Worker queue capacity; 0 means unbounded.
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub shutdown_timeout_ms: u64,
    pub listen: Vec<ListenConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            queue_capacity: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            shutdown_timeout_ms: 5_000,
            listen: vec![ListenConfig::websocket(DEFAULT_LISTEN_ADDRESS)],
        }
    }
}

impl ServerConfig {
    /// `$XDG_CONFIG_HOME/wsrpc/server.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("wsrpc").join("server.toml"))
    }

    /// Defaults, then `path` (or the default path if it exists), then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded server config from {}", path.display());
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Apply `WSRPC_*` overrides read through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_THREADS) {
            self.threads = parse_env(ENV_THREADS, &value)?;
        }
        if let Some(value) = lookup(ENV_QUEUE_CAPACITY) {
            self.queue_capacity = parse_env(ENV_QUEUE_CAPACITY, &value)?;
        }
        if let Some(value) = lookup(ENV_LISTEN) {
            self.listen = value
                .split(',')
                .filter(|part| !part.trim().is_empty())
                .map(ListenConfig::parse)
                .collect::<ConfigResult<Vec<_>>>()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("threads must be at least 1".into()));
        }
        if self.max_frame_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_frame_bytes must be greater than 0".into(),
            ));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one listen address is required".into(),
            ));
        }
        Ok(())
    }

    /// `None` when the queue is unbounded.
    pub fn queue_capacity(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
    })
}
