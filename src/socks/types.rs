//! SOCKS5 type definitions

use super::consts::*;
use crate::error::{RelayError, Result};
use std::fmt;
use std::net::Ipv4Addr;

/// SOCKS5 command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocksCommand {
    /// TCP CONNECT - establish a TCP connection to target
    Connect,
    /// TCP BIND (not implemented)
    Bind,
    /// UDP ASSOCIATE (not implemented)
    UdpAssociate,
}

impl SocksCommand {
    /// Parse a command byte into SocksCommand
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            SOCKS5_CMD_TCP_CONNECT => Some(SocksCommand::Connect),
            SOCKS5_CMD_TCP_BIND => Some(SocksCommand::Bind),
            SOCKS5_CMD_UDP_ASSOCIATE => Some(SocksCommand::UdpAssociate),
            _ => None,
        }
    }

    /// Convert SocksCommand to byte
    pub fn to_byte(self) -> u8 {
        match self {
            SocksCommand::Connect => SOCKS5_CMD_TCP_CONNECT,
            SocksCommand::Bind => SOCKS5_CMD_TCP_BIND,
            SocksCommand::UdpAssociate => SOCKS5_CMD_UDP_ASSOCIATE,
        }
    }
}

impl fmt::Display for SocksCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocksCommand::Connect => write!(f, "CONNECT"),
            SocksCommand::Bind => write!(f, "BIND"),
            SocksCommand::UdpAssociate => write!(f, "UDP ASSOCIATE"),
        }
    }
}

/// Destination address encodings this relay accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    /// Four-byte IPv4 address
    Ipv4,
    /// Length-prefixed domain name
    DomainName,
}

impl AddressType {
    /// ATYP byte on the wire
    pub fn to_byte(self) -> u8 {
        match self {
            AddressType::Ipv4 => SOCKS5_ADDR_TYPE_IPV4,
            AddressType::DomainName => SOCKS5_ADDR_TYPE_DOMAIN,
        }
    }
}

/// A fully parsed SOCKS5 connection request
///
/// `host` is a dotted IPv4 string or a domain name; `port` is in host order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Socks5Request {
    /// Requested command (always CONNECT once parsed)
    pub command: SocksCommand,
    /// How the destination was encoded
    pub address_type: AddressType,
    /// Destination host
    pub host: String,
    /// Destination port
    pub port: u16,
}

impl Socks5Request {
    /// CONNECT request to a domain name
    pub fn domain(host: impl Into<String>, port: u16) -> Self {
        Socks5Request {
            command: SocksCommand::Connect,
            address_type: AddressType::DomainName,
            host: host.into(),
            port,
        }
    }

    /// CONNECT request to an IPv4 address
    pub fn ipv4(ip: Ipv4Addr, port: u16) -> Self {
        Socks5Request {
            command: SocksCommand::Connect,
            address_type: AddressType::Ipv4,
            host: ip.to_string(),
            port,
        }
    }

    /// Re-encode as `[VER][CMD][RSV][ATYP][ADDR][PORT]`
    ///
    /// This is the body of the tunnel "open" packet. A host that does not fit
    /// its address type (an unparsable IPv4 string, or a domain that is empty
    /// or longer than 255 bytes) is [`RelayError::MalformedInput`].
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![
            SOCKS5_VERSION,
            self.command.to_byte(),
            SOCKS5_RESERVED,
            self.address_type.to_byte(),
        ];

        match self.address_type {
            AddressType::Ipv4 => {
                let ip: Ipv4Addr = self.host.parse().map_err(|_| {
                    RelayError::MalformedInput(format!("not an IPv4 address: {}", self.host))
                })?;
                bytes.extend_from_slice(&ip.octets());
            }
            AddressType::DomainName => {
                let len = u8::try_from(self.host.len())
                    .ok()
                    .filter(|len| *len > 0)
                    .ok_or_else(|| {
                        RelayError::MalformedInput(format!(
                            "domain name must be 1..=255 bytes, got {}",
                            self.host.len()
                        ))
                    })?;
                bytes.push(len);
                bytes.extend_from_slice(self.host.as_bytes());
            }
        }
        bytes.extend_from_slice(&self.port.to_be_bytes());

        Ok(bytes)
    }
}

impl fmt::Display for Socks5Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
