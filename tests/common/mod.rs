//! Test utilities for lksocks
//!
//! This module provides common test utilities used across integration tests.

#![allow(dead_code)]

use lksocks::config::{Mode, RelayConfig};
use lksocks::server::Server;
use lksocks::session::SessionRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

/// Create a test TCP listener on an available port
pub async fn create_test_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Start an echo server, returning its address
pub async fn start_echo_server() -> SocketAddr {
    let (listener, addr) = create_test_listener().await;
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut r, mut w) = stream.split();
                let _ = tokio::io::copy(&mut r, &mut w).await;
            });
        }
    });
    addr
}

/// A relay running on an ephemeral port
pub struct RunningRelay {
    /// Listener address
    pub addr: SocketAddr,
    /// Live sessions
    pub registry: Arc<SessionRegistry>,
    /// Sends the shutdown signal
    pub shutdown_tx: broadcast::Sender<bool>,
}

/// Start a relay with the given configuration on 127.0.0.1:0
pub async fn start_relay(mut config: RelayConfig) -> RunningRelay {
    config.listen_addr = Some("127.0.0.1:0".to_string());
    let server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let registry = Arc::clone(server.registry());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(server.run(shutdown_rx));

    RunningRelay {
        addr,
        registry,
        shutdown_tx,
    }
}

/// Test configuration builder
#[derive(Default)]
pub struct TestConfigBuilder {
    mode: Mode,
    tunnel_server: Option<String>,
    key: Option<String>,
}

impl TestConfigBuilder {
    /// Create a new test config builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the tunnel server address
    pub fn tunnel_server(mut self, addr: SocketAddr) -> Self {
        self.tunnel_server = Some(addr.to_string());
        self
    }

    /// Set the tunnel key
    pub fn key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    /// Build the configuration
    pub fn build(self) -> RelayConfig {
        let mut config = RelayConfig {
            mode: self.mode,
            tunnel_server: self.tunnel_server,
            ..Default::default()
        };
        if let Some(key) = self.key {
            config.key = key;
        }
        config
    }
}

/// Connect to a SOCKS5 agent and complete the no-auth greeting
pub async fn socks5_greet(agent: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(agent).await.unwrap();
    stream.write_all(&[5, 1, 0]).await.unwrap();
    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [5, 0]);
    stream
}

/// Send a CONNECT request for an IPv4 target, returning the 10-byte reply
pub async fn socks5_connect_ipv4(stream: &mut TcpStream, target: SocketAddr) -> [u8; 10] {
    let mut request = vec![5, 1, 0, 1];
    match target {
        SocketAddr::V4(v4) => request.extend_from_slice(&v4.ip().octets()),
        SocketAddr::V6(_) => panic!("IPv4 target expected"),
    }
    request.extend_from_slice(&target.port().to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}

/// Send a CONNECT request for a domain target, returning the 10-byte reply
pub async fn socks5_connect_domain(stream: &mut TcpStream, host: &str, port: u16) -> [u8; 10] {
    let mut request = vec![5, 1, 0, 3, host.len() as u8];
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    stream.read_exact(&mut reply).await.unwrap();
    reply
}
