//! Server configuration.
//!
//! Loaded from the YAML file named by `CONDUIT_CONFIG`, falling back to
//! defaults; `LISTEN=host:port` overrides the listen address either way.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::connection::ConnectionConfig;
use crate::http::parser::ParseLimits;
use crate::server::service::DEFAULT_CONTEXT_PATH;

pub const CONFIG_ENV: &str = "CONDUIT_CONFIG";
pub const LISTEN_ENV: &str = "LISTEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub executor: ExecutorConfig,
    pub listener: ListenerConfig,
    pub session: SessionConfig,
    /// Grace period of the interrupt phase of shutdown.
    pub shutdown_grace_ms: u64,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            executor: ExecutorConfig::default(),
            listener: ListenerConfig::default(),
            session: SessionConfig::default(),
            shutdown_grace_ms: 3000,
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// `0` picks an ephemeral port.
    pub port: u16,
    pub origin_server: String,
    /// Socket read timeout; `0` disables it.
    pub so_timeout_ms: u64,
    pub tcp_nodelay: bool,
    pub max_line_length: usize,
    pub max_header_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6060,
            origin_server: "Simple-Server/1.1".to_string(),
            so_timeout_ms: 20_000,
            tcp_nodelay: true,
            max_line_length: 8192,
            max_header_count: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Runtime worker threads.
    pub core_pool_size: usize,
    /// Connections served at once; more are answered with 503.
    pub max_pool_size: usize,
    /// Idle time before a spare runtime thread exits.
    pub keep_alive: u64,
    pub keep_alive_unit: TimeUnit,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 100,
            max_pool_size: 150,
            keep_alive: 180,
            keep_alive_unit: TimeUnit::Seconds,
        }
    }
}

impl ExecutorConfig {
    pub fn keep_alive(&self) -> Duration {
        match self.keep_alive_unit {
            TimeUnit::Milliseconds => Duration::from_millis(self.keep_alive),
            TimeUnit::Seconds => Duration::from_secs(self.keep_alive),
            TimeUnit::Minutes => Duration::from_secs(self.keep_alive.saturating_mul(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub retry_reset_interval_ms: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 300,
            max_retries: 10,
            retry_reset_interval_ms: 300_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub timeout_ms: u64,
    /// Resolve a session for every request and hand its cookie back.
    pub tracking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            tracking: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WorkerConfig {
    Echo,
    Service {
        #[serde(default = "default_context_path")]
        context_path: String,
        #[serde(default)]
        services: Vec<String>,
    },
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig::Service {
            context_path: default_context_path(),
            services: vec!["Echo".to_string()],
        }
    }
}

impl WorkerConfig {
    /// Path under which services are addressed.
    pub fn context_path(&self) -> &str {
        match self {
            WorkerConfig::Echo => DEFAULT_CONTEXT_PATH,
            WorkerConfig::Service { context_path, .. } => context_path,
        }
    }
}

fn default_context_path() -> String {
    DEFAULT_CONTEXT_PATH.to_string()
}

impl Config {
    /// Configuration from `CONDUIT_CONFIG` (or defaults) with the `LISTEN`
    /// override applied, validated.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(listen) = std::env::var(LISTEN_ENV) {
            config.apply_listen(&listen)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides host and port from a `host:port` string.
    pub fn apply_listen(&mut self, listen: &str) -> Result<(), ConfigError> {
        let (host, port) = listen
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::Invalid(format!("listen address '{listen}' lacks a port")))?;
        let port = port
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid port in listen address '{listen}'")))?;
        self.server.host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        self.server.port = port;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Invalid("server.host must not be empty".into()));
        }
        if self.executor.core_pool_size == 0 || self.executor.max_pool_size == 0 {
            return Err(ConfigError::Invalid("executor pool sizes must be positive".into()));
        }
        if self.executor.core_pool_size > self.executor.max_pool_size {
            return Err(ConfigError::Invalid(format!(
                "executor.core_pool_size ({}) exceeds executor.max_pool_size ({})",
                self.executor.core_pool_size, self.executor.max_pool_size
            )));
        }
        if self.server.max_line_length == 0 || self.server.max_header_count == 0 {
            return Err(ConfigError::Invalid("parser limits must be positive".into()));
        }
        Ok(())
    }

    /// Socket address to listen on; the host must be an IP literal or `localhost`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let host = match self.server.host.as_str() {
            "localhost" => "127.0.0.1",
            host => host,
        };
        let ip = host
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("invalid server.host '{}'", self.server.host)))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            so_timeout: Duration::from_millis(self.server.so_timeout_ms),
            tcp_nodelay: self.server.tcp_nodelay,
            limits: ParseLimits {
                max_line_length: self.server.max_line_length,
                max_header_count: self.server.max_header_count,
            },
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
