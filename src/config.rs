//! Server configuration.
//!
//! Loaded from an optional YAML file (path in `HOOKLINE_CONFIG`) with
//! `BIND_ADDR`, `BIND_PORT` and `THREADS` environment overrides on top.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Worker count used when threading is enabled without an explicit count.
pub const DEFAULT_THREADS: usize = 4;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{0}` is not a valid IPv4/IPv6 address")]
    InvalidAddress(String),
    #[error("port {0} is outside 1-65535")]
    InvalidPort(u32),
    #[error("read_timeout_secs must be at least 1")]
    ZeroTimeout,
    #[error("invalid value `{value}` for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub bind_port: u32,
    /// Distribute connections over a pool of worker threads.
    pub use_threads: bool,
    /// Pool size; 0 means [`DEFAULT_THREADS`] when `use_threads` is set.
    pub num_threads: usize,
    /// Sent as the `Server` header when set.
    pub server_name: Option<String>,
    pub read_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            bind_port: 8081,
            use_threads: false,
            num_threads: 0,
            server_name: None,
            read_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Upper bound for the request line plus header block.
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl Config {
    /// Reads the file named by `HOOKLINE_CONFIG` (if set), applies
    /// environment overrides and validates the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("HOOKLINE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies `BIND_ADDR`, `BIND_PORT` and `THREADS` from `lookup`.
    ///
    /// A non-zero `THREADS` enables the worker pool with that many threads.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(addr) = lookup("BIND_ADDR") {
            self.server.bind_addr = addr;
        }
        if let Some(port) = lookup("BIND_PORT") {
            self.server.bind_port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "BIND_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(threads) = lookup("THREADS") {
            let n: usize = threads.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "THREADS",
                value: threads.clone(),
            })?;
            self.server.use_threads = n > 0;
            self.server.num_threads = n;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;
        if self.server.read_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// The validated bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self
            .server
            .bind_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.bind_addr.clone()))?;
        let port = u16::try_from(self.server.bind_port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort(self.server.bind_port))?;
        Ok(SocketAddr::new(ip, port))
    }

    /// Size of the worker pool, or `None` for single-threaded mode.
    pub fn worker_threads(&self) -> Option<usize> {
        if !self.server.use_threads {
            return None;
        }
        match self.server.num_threads {
            0 => Some(DEFAULT_THREADS),
            n => Some(n),
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.server.read_timeout_secs)
    }
}
