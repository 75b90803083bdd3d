//! Sans-IO SOCKS5 handshake state machine
//!
//! The machine never touches a socket. A driver asks [`Handshake::wants`] how
//! many bytes the current state needs, reads exactly that many, and feeds them
//! to [`Handshake::advance`]. The same machine parses live client streams and
//! the request body carried inside a tunnel "open" packet.

use super::consts::*;
use super::types::{AddressType, Socks5Request, SocksCommand};
use crate::error::{RelayError, Result, Unsupported};
use std::net::Ipv4Addr;

/// Position in the greeting / request grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Waiting for `[VER][NMETHODS]`
    AwaitGreeting,
    /// Waiting for the method list
    AwaitMethods {
        /// Number of method bytes announced
        count: usize,
    },
    /// Greeting reply is pending
    Negotiated,
    /// Waiting for `[VER][CMD][RSV][ATYP]`
    AwaitRequestHeader,
    /// Waiting for 4 address bytes and the port
    AwaitIpv4,
    /// Waiting for the domain length byte
    AwaitDomainLen,
    /// Waiting for the domain bytes and the port
    AwaitDomainBody {
        /// Domain length
        len: usize,
    },
    /// A request has been produced
    Complete,
}

impl HandshakeState {
    /// Human readable stage, used for short read reporting
    pub fn stage(&self) -> &'static str {
        match self {
            HandshakeState::AwaitGreeting => "greeting",
            HandshakeState::AwaitMethods { .. } => "auth methods",
            HandshakeState::Negotiated => "greeting reply",
            HandshakeState::AwaitRequestHeader => "request header",
            HandshakeState::AwaitIpv4 => "IPv4 address",
            HandshakeState::AwaitDomainLen => "domain length",
            HandshakeState::AwaitDomainBody { .. } => "domain name",
            HandshakeState::Complete => "complete request",
        }
    }
}

/// Outcome of feeding one chunk to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More input is needed
    Continue,
    /// These bytes must be written to the client before continuing
    Reply([u8; 2]),
    /// The request is complete
    Request(Socks5Request),
}

/// SOCKS5 greeting and request parser
#[derive(Debug, Clone)]
pub struct Handshake {
    state: HandshakeState,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    /// Machine for a fresh client connection
    pub fn new() -> Self {
        Handshake {
            state: HandshakeState::AwaitGreeting,
        }
    }

    /// Machine that starts at the request header (greeting done elsewhere)
    pub fn for_request() -> Self {
        Handshake {
            state: HandshakeState::AwaitRequestHeader,
        }
    }

    /// Current state
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Exact number of bytes the next [`Handshake::advance`] expects
    pub fn wants(&self) -> usize {
        match self.state {
            HandshakeState::AwaitGreeting => 2,
            HandshakeState::AwaitMethods { count } => count,
            HandshakeState::AwaitRequestHeader => 4,
            HandshakeState::AwaitIpv4 => 6,
            HandshakeState::AwaitDomainLen => 1,
            HandshakeState::AwaitDomainBody { len } => len + 2,
            HandshakeState::Negotiated | HandshakeState::Complete => 0,
        }
    }

    /// Acknowledge that the greeting reply was written
    pub fn reply_sent(&mut self) {
        if self.state == HandshakeState::Negotiated {
            self.state = HandshakeState::AwaitRequestHeader;
        }
    }

    /// Consume exactly [`Handshake::wants`] bytes
    pub fn advance(&mut self, input: &[u8]) -> Result<Step> {
        if input.len() != self.wants() {
            return Err(RelayError::MalformedInput(format!(
                "{} expects {} bytes, got {}",
                self.state.stage(),
                self.wants(),
                input.len()
            )));
        }

        match self.state {
            HandshakeState::AwaitGreeting => {
                if input[0] != SOCKS5_VERSION {
                    return Err(RelayError::ProtocolVersion(input[0]));
                }
                let count = input[1] as usize;
                if count == 0 {
                    self.state = HandshakeState::Negotiated;
                    return Ok(Step::Reply(SOCKS5_GREETING_REPLY));
                }
                self.state = HandshakeState::AwaitMethods { count };
                Ok(Step::Continue)
            }

            // method list is ignored, "no authentication" is always selected
            HandshakeState::AwaitMethods { .. } => {
                self.state = HandshakeState::Negotiated;
                Ok(Step::Reply(SOCKS5_GREETING_REPLY))
            }

            HandshakeState::AwaitRequestHeader => {
                let (version, command, address_type) = (input[0], input[1], input[3]);
                if version != SOCKS5_VERSION {
                    return Err(RelayError::ProtocolVersion(version));
                }
                if SocksCommand::from_byte(command) != Some(SocksCommand::Connect) {
                    return Err(RelayError::Unsupported(Unsupported::Command(command)));
                }
                self.state = match address_type {
                    SOCKS5_ADDR_TYPE_IPV4 => HandshakeState::AwaitIpv4,
                    SOCKS5_ADDR_TYPE_DOMAIN => HandshakeState::AwaitDomainLen,
                    SOCKS5_ADDR_TYPE_IPV6 => {
                        return Err(RelayError::Unsupported(Unsupported::AddressType(
                            address_type,
                        )))
                    }
                    other => return Err(RelayError::ProtocolVersion(other)),
                };
                Ok(Step::Continue)
            }

            HandshakeState::AwaitIpv4 => {
                let ip = Ipv4Addr::new(input[0], input[1], input[2], input[3]);
                let port = u16::from_be_bytes([input[4], input[5]]);
                self.state = HandshakeState::Complete;
                Ok(Step::Request(Socks5Request::ipv4(ip, port)))
            }

            HandshakeState::AwaitDomainLen => {
                let len = input[0] as usize;
                if len == 0 {
                    return Err(RelayError::MalformedInput(
                        "empty domain name".to_string(),
                    ));
                }
                self.state = HandshakeState::AwaitDomainBody { len };
                Ok(Step::Continue)
            }

            HandshakeState::AwaitDomainBody { len } => {
                let host = std::str::from_utf8(&input[..len]).map_err(|_| {
                    RelayError::MalformedInput("domain name is not valid UTF-8".to_string())
                })?;
                let port = u16::from_be_bytes([input[len], input[len + 1]]);
                self.state = HandshakeState::Complete;
                Ok(Step::Request(Socks5Request::domain(host, port)))
            }

            HandshakeState::Negotiated | HandshakeState::Complete => {
                Err(RelayError::MalformedInput(format!(
                    "no input expected in state {}",
                    self.state.stage()
                )))
            }
        }
    }
}

/// Parse a complete request (`[VER][CMD][RSV][ATYP][ADDR][PORT]`) from a slice
///
/// Missing bytes are a [`RelayError::ShortRead`] for the stage that ran dry;
/// trailing bytes are [`RelayError::MalformedInput`].
pub fn parse_request(bytes: &[u8]) -> Result<Socks5Request> {
    let mut machine = Handshake::for_request();
    let mut rest = bytes;

    loop {
        let wanted = machine.wants();
        if rest.len() < wanted {
            return Err(RelayError::ShortRead {
                stage: machine.state().stage(),
            });
        }
        let (chunk, tail) = rest.split_at(wanted);
        rest = tail;

        if let Step::Request(request) = machine.advance(chunk)? {
            if !rest.is_empty() {
                return Err(RelayError::MalformedInput(format!(
                    "{} trailing bytes after request",
                    rest.len()
                )));
            }
            return Ok(request);
        }
    }
}
