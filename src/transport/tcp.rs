//! Outbound TCP connections

use super::SocketOpts;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::helper::{duration_from_secs, DEFAULT_CONNECT_TIMEOUT_SECS};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens upstream sockets with a timeout and configured socket options
#[derive(Debug, Clone)]
pub struct Connector {
    /// Socket options to apply to connections
    socket_opts: SocketOpts,
    /// Connection timeout
    connect_timeout: Duration,
}

impl Connector {
    /// Create a connector with default options
    pub fn with_defaults() -> Self {
        Connector {
            socket_opts: SocketOpts::default(),
            connect_timeout: duration_from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    /// Create a connector from relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Connector {
            socket_opts: SocketOpts::from_tcp_config(&config.tcp),
            connect_timeout: duration_from_secs(config.connect_timeout),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Socket options applied by this connector
    pub fn socket_opts(&self) -> &SocketOpts {
        &self.socket_opts
    }

    /// Connect to `addr`, failing with [`RelayError::Connect`]
    pub async fn connect(&self, addr: SocketAddr) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RelayError::Connect {
                addr: addr.to_string(),
                source: io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
            })?
            .map_err(|source| RelayError::Connect {
                addr: addr.to_string(),
                source,
            })?;

        self.socket_opts.hint(&stream);

        tracing::debug!("TCP connection established to {}", addr);

        Ok(stream)
    }
}
