//! SOCKS5 negotiation
//!
//! A transport-independent state machine for the greeting and CONNECT request
//! grammar, async drivers that run it over a stream, and the reply encoder.
//! Only the "no authentication" method and the CONNECT command with IPv4 or
//! domain-name destinations are implemented.

mod consts;
mod handshake;
mod machine;
mod reply;
mod types;

pub use consts::*;
pub use handshake::{negotiate, read_request};
pub use machine::{parse_request, Handshake, HandshakeState, Step};
pub use reply::{build_reply, reply_bytes};
pub use types::{AddressType, Socks5Request, SocksCommand};
