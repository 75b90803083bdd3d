//! SOCKS5 reply builder

use super::consts::*;
use crate::error::Result;
use crate::helper::bound_ipv4;
use std::net::{SocketAddr, SocketAddrV4};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Encode a reply
///
/// ```text
/// +----+-----+-------+------+----------+----------+
/// |VER | REP |  RSV  | ATYP | BND.ADDR | BND.PORT |
/// +----+-----+-------+------+----------+----------+
/// | 1  |  1  | X'00' | X'01'|    4     |    2     |
/// +----+-----+-------+------+----------+----------+
/// ```
pub fn reply_bytes(reply_code: u8, bound: SocketAddrV4) -> [u8; SOCKS5_REPLY_LEN] {
    let mut reply = [0u8; SOCKS5_REPLY_LEN];
    reply[0] = SOCKS5_VERSION;
    reply[1] = reply_code;
    reply[2] = SOCKS5_RESERVED;
    reply[3] = SOCKS5_ADDR_TYPE_IPV4;
    reply[4..8].copy_from_slice(&bound.ip().octets());
    reply[8..10].copy_from_slice(&bound.port().to_be_bytes());
    reply
}

/// Build and send a SOCKS5 reply
///
/// Only IPv4 bound addresses are reported; anything else (or `None`) is sent
/// as `0.0.0.0:0`.
pub async fn build_reply<S>(
    stream: &mut S,
    reply_code: u8,
    bind_addr: Option<SocketAddr>,
) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reply = reply_bytes(reply_code, bound_ipv4(bind_addr));
    stream.write_all(&reply).await?;
    stream.flush().await?;
    Ok(())
}
