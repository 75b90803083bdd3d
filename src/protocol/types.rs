//! Tunnel packet type definitions
//!
//! Both tunnel endpoints must agree on [`PROTO_VERSION`] and the opcode
//! values below.

use bytes::Bytes;
use std::fmt;

/// Current tunnel protocol version
pub const PROTO_VERSION: u32 = 20180517;

/// Length of the plaintext packet header in bytes
///
/// version, command/result, id, flags, encrypted body length
pub const HEADER_LEN: usize = 20;

/// Largest encrypted body a receiver accepts
pub const MAX_ENCRYPTED_BODY: usize = 4 * 1024 * 1024;

/// Largest plaintext body a receiver inflates a packet to
pub const MAX_DECOMPRESSED_BODY: usize = 4 * 1024 * 1024;

/// Generic success result
pub const OP_OK: u32 = 0;
/// Generic failure result; body carries one SOCKS5 reply byte
pub const OP_ERROR: u32 = 1;
/// No-op command
pub const OP_NOPE: u32 = 1025;
/// Diagnostic: the server echoes the URL body back
pub const OP_GET_URL: u32 = 1026;
/// Open a relay (first packet) or carry a relayed chunk
pub const OP_SOCKS_CONNECT: u32 = 1027;

/// Tunnel opcodes, both client commands and server results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Success result
    Ok,
    /// Failure result
    Error,
    /// No-op
    Nope,
    /// URL echo diagnostic
    GetUrl,
    /// SOCKS5 relay
    SocksConnect,
}

impl Opcode {
    /// Parse a wire value
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            OP_OK => Some(Opcode::Ok),
            OP_ERROR => Some(Opcode::Error),
            OP_NOPE => Some(Opcode::Nope),
            OP_GET_URL => Some(Opcode::GetUrl),
            OP_SOCKS_CONNECT => Some(Opcode::SocksConnect),
            _ => None,
        }
    }

    /// Wire value
    pub fn to_u32(self) -> u32 {
        match self {
            Opcode::Ok => OP_OK,
            Opcode::Error => OP_ERROR,
            Opcode::Nope => OP_NOPE,
            Opcode::GetUrl => OP_GET_URL,
            Opcode::SocksConnect => OP_SOCKS_CONNECT,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Opcode::Ok => write!(f, "OK"),
            Opcode::Error => write!(f, "ERROR"),
            Opcode::Nope => write!(f, "NOPE"),
            Opcode::GetUrl => write!(f, "GET_URL"),
            Opcode::SocksConnect => write!(f, "SOCKS_CONNECT"),
        }
    }
}

/// One unit exchanged between tunnel client and tunnel server
///
/// `id` and `flags` are reserved; they are written as zero and ignored on
/// receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelPacket {
    /// Protocol version
    pub version: u32,
    /// Command (client to server) or result (server to client)
    pub command: u32,
    /// Reserved
    pub id: u32,
    /// Reserved
    pub flags: u32,
    /// Plaintext body
    pub body: Bytes,
}

impl TunnelPacket {
    /// Create a packet for the current version with zeroed reserved fields
    pub fn new(opcode: Opcode, body: impl Into<Bytes>) -> Self {
        TunnelPacket {
            version: PROTO_VERSION,
            command: opcode.to_u32(),
            id: 0,
            flags: 0,
            body: body.into(),
        }
    }

    /// Decoded opcode, if known
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u32(self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_values() {
        assert_eq!(OP_OK, 0);
        assert_eq!(OP_ERROR, 1);
        assert_eq!(OP_GET_URL, 1026);
        assert_eq!(OP_SOCKS_CONNECT, 1027);
    }

    #[test]
    fn test_opcode_from_u32() {
        assert_eq!(Opcode::from_u32(0), Some(Opcode::Ok));
        assert_eq!(Opcode::from_u32(1025), Some(Opcode::Nope));
        assert_eq!(Opcode::from_u32(1027), Some(Opcode::SocksConnect));
        assert_eq!(Opcode::from_u32(2), None);
        assert_eq!(Opcode::from_u32(u32::MAX), None);
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(format!("{}", Opcode::GetUrl), "GET_URL");
        assert_eq!(format!("{}", Opcode::SocksConnect), "SOCKS_CONNECT");
    }

    #[test]
    fn test_packet_new_zeroes_reserved_fields() {
        let packet = TunnelPacket::new(Opcode::SocksConnect, &b"data"[..]);
        assert_eq!(packet.version, PROTO_VERSION);
        assert_eq!(packet.command, OP_SOCKS_CONNECT);
        assert_eq!(packet.id, 0);
        assert_eq!(packet.flags, 0);
        assert_eq!(packet.opcode(), Some(Opcode::SocksConnect));
    }
}
