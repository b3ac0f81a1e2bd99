//! Centralized configuration for the plugin server.
//!
//! This module provides the protocol constants announced in the handshake,
//! the port selection defaults, and the runtime `ServeConfig`.

use crate::{PluginError, Result};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Handshake protocol constants.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const CORE_PROTOCOL_VERSION: u32 = 1;
    pub const APP_PROTOCOL_VERSION: u32 = 1;
    pub const NETWORK: &'static str = "tcp";
    pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;
}

/// Port selection defaults.
pub struct PortConfig;

impl PortConfig {
    pub const RANGE_START: u16 = 20000;
    pub const RANGE_END: u16 = 60000;
    /// Port used by the legacy single-instance mode.
    pub const LEGACY_FIXED_PORT: u16 = 50051;
}

/// Server limits.
pub struct ServerConfig;

impl ServerConfig {
    pub const WORKER_POOL_SIZE: usize = 10;
    pub const MAX_CONNECTIONS: usize = 64;
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const SHUTDOWN_GRACE: Duration = Duration::ZERO;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Environment variable names.
pub struct EnvConfig;

impl EnvConfig {
    /// Selects the announced plugin protocol (`rpc` or `grpc`).
    pub const PLUGIN_TYPE_ENV: &'static str = "HRP_PLUGIN_TYPE";
}

/// Service kind announced as the last handshake field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PluginProtocol {
    #[default]
    Grpc,
    NetRpc,
}

impl PluginProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginProtocol::Grpc => "grpc",
            PluginProtocol::NetRpc => "netrpc",
        }
    }

    /// Read the protocol from `HRP_PLUGIN_TYPE`; only `rpc` selects net/rpc.
    pub fn from_env() -> Self {
        match std::env::var(EnvConfig::PLUGIN_TYPE_ENV) {
            Ok(value) => Self::from_plugin_type(&value),
            Err(_) => Self::default(),
        }
    }

    fn from_plugin_type(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("rpc") {
            PluginProtocol::NetRpc
        } else {
            PluginProtocol::Grpc
        }
    }
}

impl fmt::Display for PluginProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for PluginProtocol {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "grpc" => Ok(PluginProtocol::Grpc),
            "netrpc" | "rpc" => Ok(PluginProtocol::NetRpc),
            other => Err(PluginError::Config {
                message: format!("unknown plugin protocol: {}", other),
            }),
        }
    }
}

/// Inclusive range of candidate ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            usize::from(self.end - self.start) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(PortConfig::RANGE_START, PortConfig::RANGE_END)
    }
}

/// How the listening port is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortSelection {
    /// Try random ports in the range until a free one is found.
    Random(PortRange),
    /// Always use the given port. Only one instance per host.
    Fixed(u16),
}

impl Default for PortSelection {
    fn default() -> Self {
        PortSelection::Random(PortRange::default())
    }
}

impl PortSelection {
    /// The single well-known port of the legacy mode.
    pub fn legacy() -> Self {
        PortSelection::Fixed(PortConfig::LEGACY_FIXED_PORT)
    }
}

/// Runtime configuration for serving a registry.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub port: PortSelection,
    pub workers: usize,
    pub max_connections: usize,
    pub max_message_size: usize,
    pub protocol: PluginProtocol,
    pub shutdown_grace: Duration,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: PortSelection::default(),
            workers: ServerConfig::WORKER_POOL_SIZE,
            max_connections: ServerConfig::MAX_CONNECTIONS,
            max_message_size: ServerConfig::MAX_MESSAGE_SIZE,
            protocol: PluginProtocol::default(),
            shutdown_grace: ServerConfig::SHUTDOWN_GRACE,
        }
    }
}

impl ServeConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default values, with the protocol taken from `HRP_PLUGIN_TYPE`.
    pub fn from_env() -> Self {
        Self::default().with_protocol(PluginProtocol::from_env())
    }

    pub fn with_port(mut self, port: PortSelection) -> Self {
        self.port = port;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_protocol(mut self, protocol: PluginProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let PortSelection::Random(range) = self.port {
            if range.is_empty() || range.start == 0 {
                return Err(PluginError::Config {
                    message: format!("invalid port range {}-{}", range.start, range.end),
                });
            }
        }
        if self.workers == 0 {
            return Err(PluginError::Config {
                message: "worker pool size must be at least 1".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(PluginError::Config {
                message: "max connections must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
