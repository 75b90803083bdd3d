//! Host name resolution

use crate::error::{RelayError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Turns a SOCKS5 destination into a concrete socket address
#[async_trait]
pub trait Resolver: Debug + Send + Sync + 'static {
    /// Resolve `host:port`, failing with [`RelayError::Resolution`]
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr>;
}

/// Resolver backed by the operating system via `tokio::net::lookup_host`
///
/// Only IPv4 results are returned; IPv6 destinations are not relayed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)));
        }

        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| RelayError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        let resolved = addrs
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| RelayError::Resolution {
                host: host.to_string(),
                reason: "no IPv4 address found".to_string(),
            })?;

        tracing::trace!("Resolved {} to {}", host, resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_ipv4_literal() {
        let addr = SystemResolver.resolve("10.0.0.1", 8080).await.unwrap();
        assert_eq!(addr, "10.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = SystemResolver.resolve("localhost", 80).await.unwrap();
        assert!(addr.is_ipv4());
        assert_eq!(addr.port(), 80);
    }

    #[tokio::test]
    async fn test_resolve_failure() {
        let result = SystemResolver.resolve("nonexistent.invalid", 80).await;
        assert!(matches!(result, Err(RelayError::Resolution { .. })));
    }
}
