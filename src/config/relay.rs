//! Relay configuration types

use super::TcpConfig;
use crate::cipher::{DEFAULT_KEY, MAX_KEY_BYTES};
use crate::helper::{split_host_port, DEFAULT_CONNECT_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default listen address of the SOCKS5 agent
pub const DEFAULT_AGENT_ADDR: &str = "0.0.0.0:8181";

/// Default listen address of the tunnel server
pub const DEFAULT_TUNNEL_SERVER_ADDR: &str = "0.0.0.0:2484";

/// Root configuration structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Relay configuration
    pub relay: RelayConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Role of this process
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// SOCKS5 server connecting straight to destinations
    #[default]
    Direct,
    /// SOCKS5 server forwarding sessions through the tunnel server
    TunnelClient,
    /// Endpoint of the encrypted tunnel performing the real connections
    TunnelServer,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Direct => write!(f, "direct"),
            Mode::TunnelClient => write!(f, "tunnel-client"),
            Mode::TunnelServer => write!(f, "tunnel-server"),
        }
    }
}

fn default_key() -> String {
    DEFAULT_KEY.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Relay configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RelayConfig {
    /// Operating mode
    #[serde(default)]
    pub mode: Mode,

    /// Address to accept connections on; defaults depend on the mode
    #[serde(default)]
    pub listen_addr: Option<String>,

    /// Tunnel server `host:port`, required in tunnel-client mode
    #[serde(default)]
    pub tunnel_server: Option<String>,

    /// Shared tunnel cipher key
    #[serde(default = "default_key")]
    pub key: String,

    /// Outbound connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            mode: Mode::default(),
            listen_addr: None,
            tunnel_server: None,
            key: default_key(),
            connect_timeout: default_connect_timeout(),
            tcp: TcpConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Effective listen address
    pub fn listen_addr(&self) -> &str {
        match (&self.listen_addr, self.mode) {
            (Some(addr), _) => addr,
            (None, Mode::TunnelServer) => DEFAULT_TUNNEL_SERVER_ADDR,
            (None, _) => DEFAULT_AGENT_ADDR,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() || self.key.len() > MAX_KEY_BYTES {
            return Err(format!(
                "Cipher key must be 1..={} bytes, got {}",
                MAX_KEY_BYTES,
                self.key.len()
            ));
        }

        if self.listen_addr().parse::<SocketAddr>().is_err() {
            return Err(format!("Invalid listen address: {}", self.listen_addr()));
        }

        if self.connect_timeout == 0 {
            return Err("connect_timeout must be greater than zero".to_string());
        }

        match (&self.tunnel_server, self.mode) {
            (Some(server), _) if split_host_port(server).is_none() => {
                Err(format!("Invalid tunnel server address: {}", server))
            }
            (None, Mode::TunnelClient) => {
                Err("tunnel-client mode requires tunnel_server".to_string())
            }
            _ => Ok(()),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Default filter directive, e.g. `info` or `lksocks=debug`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON formatted records
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: default_log_level(),
            json: false,
        }
    }
}
