//! Encrypted tunnel protocol
//!
//! Packets exchanged between a tunnel client and tunnel server. Bodies are
//! zlib-compressed then encrypted; headers are encrypted only.

mod codec;
mod compress;
mod types;

pub use codec::{decode_packet, encode_packet, write_packet, STAGE_HEADER_LENGTH};
pub use compress::{compress, decompress};
pub use types::{
    Opcode, TunnelPacket, HEADER_LEN, MAX_DECOMPRESSED_BODY, MAX_ENCRYPTED_BODY, OP_ERROR,
    OP_GET_URL, OP_NOPE, OP_OK, OP_SOCKS_CONNECT, PROTO_VERSION,
};
