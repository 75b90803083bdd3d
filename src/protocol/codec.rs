//! Tunnel packet codec
//!
//! ```text
//! Packet := u16(header_len) || encrypt(header) || encrypt(compress(body))
//! header := u32(version) || u32(cmd_or_result) || u32(id) || u32(flags) || u32(encrypted_body_len)
//! ```
//!
//! Integers are little-endian. Header and body are encrypted independently
//! under the same key schedule; only the body is compressed.

use super::compress::{compress, decompress};
use super::types::{
    TunnelPacket, HEADER_LEN, MAX_DECOMPRESSED_BODY, MAX_ENCRYPTED_BODY, PROTO_VERSION,
};
use crate::cipher::Cipher;
use crate::error::{RelayError, Result};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Read stage reported when the stream ends before a packet starts
pub const STAGE_HEADER_LENGTH: &str = "packet header length";

/// Serialize a packet into its wire form
pub fn encode_packet(cipher: &Cipher, packet: &TunnelPacket) -> Result<Vec<u8>> {
    let encrypted_body = cipher.encrypt(&compress(&packet.body)?);

    let body_len = u32::try_from(encrypted_body.len()).map_err(|_| {
        RelayError::MalformedInput(format!(
            "packet body of {} bytes is too large",
            encrypted_body.len()
        ))
    })?;

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&packet.version.to_le_bytes());
    header.extend_from_slice(&packet.command.to_le_bytes());
    header.extend_from_slice(&packet.id.to_le_bytes());
    header.extend_from_slice(&packet.flags.to_le_bytes());
    header.extend_from_slice(&body_len.to_le_bytes());
    let encrypted_header = cipher.encrypt(&header);

    let mut out = Vec::with_capacity(2 + encrypted_header.len() + encrypted_body.len());
    out.extend_from_slice(&(encrypted_header.len() as u16).to_le_bytes());
    out.extend_from_slice(&encrypted_header);
    out.extend_from_slice(&encrypted_body);

    Ok(out)
}

/// Parsed plaintext header
struct Header {
    version: u32,
    command: u32,
    id: u32,
    flags: u32,
    body_len: usize,
}

fn parse_header(plain: &[u8]) -> Result<Header> {
    if plain.len() < HEADER_LEN {
        return Err(RelayError::MalformedInput(format!(
            "packet header has {} bytes, expected {}",
            plain.len(),
            HEADER_LEN
        )));
    }

    let word = |i: usize| u32::from_le_bytes([plain[i], plain[i + 1], plain[i + 2], plain[i + 3]]);

    Ok(Header {
        version: word(0),
        command: word(4),
        id: word(8),
        flags: word(12),
        body_len: word(16) as usize,
    })
}

/// Read one complete packet from `reader`
///
/// Reads the 2-byte header length, the encrypted header, then the encrypted
/// body. Each stage fails with [`RelayError::ShortRead`] if the transport
/// closes early; no partial packet is ever returned.
pub async fn decode_packet<R>(reader: &mut R, cipher: &Cipher) -> Result<TunnelPacket>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| RelayError::from_read(e, STAGE_HEADER_LENGTH))?;
    let header_len = u16::from_le_bytes(len_buf) as usize;

    let mut encrypted_header = vec![0u8; header_len];
    reader
        .read_exact(&mut encrypted_header)
        .await
        .map_err(|e| RelayError::from_read(e, "packet header"))?;
    let header = parse_header(&cipher.decrypt(&encrypted_header)?)?;

    if header.version != PROTO_VERSION {
        return Err(RelayError::TunnelVersion(header.version));
    }
    if header.body_len > MAX_ENCRYPTED_BODY {
        return Err(RelayError::MalformedInput(format!(
            "packet body length {} exceeds limit {}",
            header.body_len, MAX_ENCRYPTED_BODY
        )));
    }

    let mut encrypted_body = vec![0u8; header.body_len];
    reader
        .read_exact(&mut encrypted_body)
        .await
        .map_err(|e| RelayError::from_read(e, "packet body"))?;
    let body = decompress(&cipher.decrypt(&encrypted_body)?, MAX_DECOMPRESSED_BODY)?;

    trace!(
        "Decoded packet cmd={} body={} bytes (wire {} bytes)",
        header.command,
        body.len(),
        2 + header_len + header.body_len
    );

    Ok(TunnelPacket {
        version: header.version,
        command: header.command,
        id: header.id,
        flags: header.flags,
        body: Bytes::from(body),
    })
}

/// Encode a packet and write it to `writer`
pub async fn write_packet<W>(writer: &mut W, cipher: &Cipher, packet: &TunnelPacket) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let buf = encode_packet(cipher, packet)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
