//! Helper utilities for lksocks

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Maximum bytes moved per pump read
pub const MAX_BUF_SIZE: usize = 65535;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Parse duration from seconds
pub fn duration_from_secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// Split `host:port` into its parts
///
/// The host may not be empty and the port must be a valid `u16`. Bracketed
/// IPv6 literals are not accepted.
pub fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    if host.is_empty() || host.contains(':') {
        return None;
    }
    let port = port.parse().ok()?;
    Some((host, port))
}

/// IPv4 address to report in a SOCKS5 reply
///
/// Non-IPv4 or missing addresses are reported as `0.0.0.0:0`.
pub fn bound_ipv4(addr: Option<SocketAddr>) -> SocketAddrV4 {
    match addr {
        Some(SocketAddr::V4(v4)) => v4,
        _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};

    #[test]
    fn test_constants() {
        assert_eq!(MAX_BUF_SIZE, 65535);
        assert_eq!(DEFAULT_CONNECT_TIMEOUT_SECS, 10);
    }

    #[test]
    fn test_duration_from_secs() {
        assert_eq!(duration_from_secs(5), Duration::from_secs(5));
        assert_eq!(duration_from_secs(0), Duration::from_secs(0));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:2484"),
            Some(("example.com", 2484))
        );
        assert_eq!(split_host_port("127.0.0.1:80"), Some(("127.0.0.1", 80)));
        assert_eq!(split_host_port("example.com"), None);
        assert_eq!(split_host_port(":80"), None);
        assert_eq!(split_host_port("host:99999"), None);
        assert_eq!(split_host_port("host:"), None);
        assert_eq!(split_host_port("::1:80"), None);
    }

    #[test]
    fn test_bound_ipv4() {
        let v4 = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 5555);
        assert_eq!(
            bound_ipv4(Some(v4)),
            SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 5555)
        );

        let v6 = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 5555);
        assert_eq!(
            bound_ipv4(Some(v6)),
            SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)
        );
        assert_eq!(bound_ipv4(None), SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
    }
}
