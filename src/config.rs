use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::WorkStation;

/// Errors raised while loading the startup configuration. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Address of another workstation as it appears in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub ip: String,
    pub port: u16,
}

impl PeerConfig {
    pub fn to_workstation(&self) -> WorkStation {
        WorkStation::new(self.ip.clone(), self.port)
    }
}

/// Startup configuration of a single workstation.
///
/// Loaded once from a JSON file; every duration is expressed in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    pub http_port: u16,
    #[serde(default)]
    pub other_workstations: Vec<PeerConfig>,
    pub batch_size: usize,
    pub max_calculation_duration_ms: u64,
    pub max_request_repeat: u32,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub message_delay_ms: u64,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
    #[serde(default = "default_start_running")]
    pub start_running: bool,
}

fn default_health_check_interval_ms() -> u64 {
    1000
}

fn default_heartbeat_interval_ms() -> u64 {
    500
}

fn default_retry_backoff_ms() -> u64 {
    50
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

fn default_start_running() -> bool {
    true
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_string(),
            port: 50051,
            http_port: 8080,
            other_workstations: Vec::new(),
            batch_size: 4,
            max_calculation_duration_ms: 30_000,
            max_request_repeat: 3,
            health_check_interval_ms: default_health_check_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            message_delay_ms: 0,
            retry_backoff_ms: default_retry_backoff_ms(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            start_running: default_start_running(),
        }
    }
}

impl NodeConfig {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.other_workstations.push(PeerConfig {
            ip: ip.into(),
            port,
        });
        self
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading configuration");

        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NodeConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip.trim().is_empty() {
            return Err(ConfigError::Invalid("ip must not be empty".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batchSize must be positive".to_string()));
        }
        if self.max_request_repeat == 0 {
            return Err(ConfigError::Invalid(
                "maxRequestRepeat must be positive".to_string(),
            ));
        }
        if self.max_calculation_duration_ms == 0
            || self.health_check_interval_ms == 0
            || self.heartbeat_interval_ms == 0
            || self.rpc_timeout_ms == 0
        {
            return Err(ConfigError::Invalid(
                "timeouts and intervals must be positive".to_string(),
            ));
        }

        let me = self.identity();
        let mut seen = HashSet::new();
        for peer in &self.other_workstations {
            let ws = peer.to_workstation();
            if ws == me {
                return Err(ConfigError::Invalid(format!(
                    "workstation {} lists itself as a peer",
                    ws
                )));
            }
            if !seen.insert(ws.clone()) {
                return Err(ConfigError::Invalid(format!("duplicate peer {}", ws)));
            }
        }
        Ok(())
    }

    pub fn identity(&self) -> WorkStation {
        WorkStation::new(self.ip.clone(), self.port)
    }

    pub fn peers(&self) -> Vec<WorkStation> {
        self.other_workstations
            .iter()
            .map(PeerConfig::to_workstation)
            .collect()
    }

    pub fn rpc_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.ip, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad RPC address: {}", e)))
    }

    pub fn http_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.ip, self.http_port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("bad HTTP address: {}", e)))
    }

    pub fn max_calculation_duration(&self) -> Duration {
        Duration::from_millis(self.max_calculation_duration_ms)
    }
}
