//! Error types for lksocks
//!
//! Core layers (cipher, compression, packet codec, SOCKS5 parsing, resolution)
//! return [`RelayError`] so callers can match on the failure class. Session
//! and server orchestration wrap these in `anyhow` with context.

use crate::socks::{
    SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
    SOCKS5_REPLY_CONNECTION_NOT_ALLOWED, SOCKS5_REPLY_CONNECTION_REFUSED,
    SOCKS5_REPLY_GENERAL_FAILURE, SOCKS5_REPLY_HOST_UNREACHABLE,
};
use std::io;
use thiserror::Error;

/// Result alias used by the core layers
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Features that are recognised on the wire but deliberately not implemented
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unsupported {
    /// SOCKS5 command other than CONNECT
    #[error("SOCKS5 command: {0:#04x}")]
    Command(u8),
    /// SOCKS5 address type other than IPv4 or domain name
    #[error("SOCKS5 address type: {0:#04x}")]
    AddressType(u8),
    /// Tunnel opcode the server does not handle
    #[error("tunnel opcode: {0}")]
    Opcode(u32),
}

/// Failure classes for a relay session
#[derive(Error, Debug)]
pub enum RelayError {
    /// Unexpected SOCKS version or protocol byte
    #[error("Unexpected SOCKS protocol byte: {0:#04x}")]
    ProtocolVersion(u8),

    /// IPv6 destinations, BIND, UDP ASSOCIATE and unknown commands
    #[error("Unsupported {0}")]
    Unsupported(Unsupported),

    /// The transport closed before delivering the required bytes
    #[error("Short read while reading {stage}")]
    ShortRead {
        /// Which read stage was cut short
        stage: &'static str,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Non block-aligned or otherwise corrupt cipher/codec input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Compression or decompression failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Name resolution failed
    #[error("Failed to resolve {host}: {reason}")]
    Resolution {
        /// Host that was being resolved
        host: String,
        /// Resolver failure description
        reason: String,
    },

    /// Outbound connection failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        /// Address that was being connected
        addr: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Cipher key outside the accepted 1..=56 byte range
    #[error("Invalid cipher key length: {0} (expected 1..=56 bytes)")]
    InvalidKey(usize),

    /// Tunnel peer speaks a different protocol version
    #[error("Tunnel protocol version mismatch: got {0}")]
    TunnelVersion(u32),
}

impl RelayError {
    /// Map an `UnexpectedEof` from `read_exact` to [`RelayError::ShortRead`]
    pub fn from_read(err: io::Error, stage: &'static str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            RelayError::ShortRead { stage }
        } else {
            RelayError::Io(err)
        }
    }

    /// SOCKS5 `REP` byte describing this failure to the client
    pub fn reply_code(&self) -> u8 {
        match self {
            RelayError::Unsupported(Unsupported::AddressType(_)) => {
                SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED
            }
            RelayError::Unsupported(Unsupported::Command(_)) => SOCKS5_REPLY_COMMAND_NOT_SUPPORTED,
            RelayError::Resolution { .. } => SOCKS5_REPLY_HOST_UNREACHABLE,
            RelayError::Connect { source, .. } => io_error_to_reply_code(source),
            _ => SOCKS5_REPLY_GENERAL_FAILURE,
        }
    }
}

/// Convert IO error to SOCKS5 reply code
pub fn io_error_to_reply_code(error: &io::Error) -> u8 {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => SOCKS5_REPLY_CONNECTION_REFUSED,
        io::ErrorKind::TimedOut => SOCKS5_REPLY_HOST_UNREACHABLE,
        io::ErrorKind::AddrNotAvailable => SOCKS5_REPLY_HOST_UNREACHABLE,
        io::ErrorKind::PermissionDenied => SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
        _ => SOCKS5_REPLY_GENERAL_FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_read_maps_eof_to_short_read() {
        let err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let mapped = RelayError::from_read(err, "header length");
        assert!(matches!(
            mapped,
            RelayError::ShortRead {
                stage: "header length"
            }
        ));

        let err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(matches!(
            RelayError::from_read(err, "body"),
            RelayError::Io(_)
        ));
    }

    #[test]
    fn test_reply_code_mapping() {
        let err = RelayError::Unsupported(Unsupported::Command(0x02));
        assert_eq!(err.reply_code(), SOCKS5_REPLY_COMMAND_NOT_SUPPORTED);

        let err = RelayError::Unsupported(Unsupported::AddressType(0x04));
        assert_eq!(err.reply_code(), SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED);

        let err = RelayError::Unsupported(Unsupported::Opcode(9));
        assert_eq!(err.reply_code(), SOCKS5_REPLY_GENERAL_FAILURE);

        let err = RelayError::Resolution {
            host: "nowhere.invalid".to_string(),
            reason: "no records".to_string(),
        };
        assert_eq!(err.reply_code(), SOCKS5_REPLY_HOST_UNREACHABLE);

        let err = RelayError::Connect {
            addr: "127.0.0.1:9".to_string(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(err.reply_code(), SOCKS5_REPLY_CONNECTION_REFUSED);

        assert_eq!(
            RelayError::ProtocolVersion(4).reply_code(),
            SOCKS5_REPLY_GENERAL_FAILURE
        );
    }

    #[test]
    fn test_io_error_to_reply_code() {
        let cases = vec![
            (
                io::ErrorKind::ConnectionRefused,
                SOCKS5_REPLY_CONNECTION_REFUSED,
            ),
            (io::ErrorKind::TimedOut, SOCKS5_REPLY_HOST_UNREACHABLE),
            (
                io::ErrorKind::AddrNotAvailable,
                SOCKS5_REPLY_HOST_UNREACHABLE,
            ),
            (
                io::ErrorKind::PermissionDenied,
                SOCKS5_REPLY_CONNECTION_NOT_ALLOWED,
            ),
            (io::ErrorKind::Other, SOCKS5_REPLY_GENERAL_FAILURE),
        ];

        for (kind, expected) in cases {
            assert_eq!(io_error_to_reply_code(&io::Error::from(kind)), expected);
        }
    }

    #[test]
    fn test_relay_error_display() {
        assert_eq!(
            format!("{}", RelayError::ProtocolVersion(4)),
            "Unexpected SOCKS protocol byte: 0x04"
        );
        assert_eq!(
            format!("{}", RelayError::Unsupported(Unsupported::AddressType(4))),
            "Unsupported SOCKS5 address type: 0x04"
        );
        assert_eq!(
            format!("{}", RelayError::ShortRead { stage: "body" }),
            "Short read while reading body"
        );
        assert_eq!(
            format!("{}", RelayError::InvalidKey(0)),
            "Invalid cipher key length: 0 (expected 1..=56 bytes)"
        );
        assert_eq!(
            format!("{}", RelayError::TunnelVersion(7)),
            "Tunnel protocol version mismatch: got 7"
        );
    }

    #[test]
    fn test_relay_error_from_io() {
        let err: RelayError = io::Error::new(io::ErrorKind::Other, "io").into();
        assert!(matches!(err, RelayError::Io(_)));
    }
}
