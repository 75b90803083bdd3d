//! Full-duplex byte pump
//!
//! Two pumps run concurrently, one per direction. The first one to finish,
//! on EOF or on error, ends the relay; the other is dropped without issuing
//! another read and both streams are closed.

use crate::cipher::Cipher;
use crate::error::{RelayError, Result, Unsupported};
use crate::helper::MAX_BUF_SIZE;
use crate::protocol::{decode_packet, write_packet, Opcode, TunnelPacket, STAGE_HEADER_LENGTH};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// How one direction moves bytes
#[derive(Debug, Clone, Copy)]
pub enum Framing<'a> {
    /// Copy bytes unchanged
    Raw,
    /// Wrap every chunk read into a tunnel packet
    Encode {
        /// Tunnel cipher
        cipher: &'a Cipher,
        /// Opcode stamped on each packet
        opcode: Opcode,
    },
    /// Read tunnel packets and forward only their bodies
    Decode {
        /// Tunnel cipher
        cipher: &'a Cipher,
        /// Opcode every data packet must carry; `NOPE` packets are skipped
        expect: Opcode,
    },
}

/// Relay direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted side towards the outbound side
    ClientToUpstream,
    /// Outbound side towards the accepted side
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToUpstream => write!(f, "client->upstream"),
            Direction::UpstreamToClient => write!(f, "upstream->client"),
        }
    }
}

/// How a relay ended, reported once per session
#[derive(Debug)]
pub struct RelayOutcome {
    /// Direction that finished first
    pub ended_by: Direction,
    /// Payload bytes moved from client to upstream
    pub client_to_upstream: u64,
    /// Payload bytes moved from upstream to client
    pub upstream_to_client: u64,
    /// Failure that ended the relay, `None` on clean EOF
    pub error: Option<RelayError>,
}

impl RelayOutcome {
    /// Whether the relay ended on a clean EOF
    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Move data from `from` to `to` until EOF or failure
///
/// `moved` counts payload bytes, i.e. bodies rather than packet framing.
pub async fn pump<R, W>(
    from: &mut R,
    to: &mut W,
    framing: Framing<'_>,
    moved: &AtomicU64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Framing::Decode { cipher, expect } = framing {
        loop {
            let packet = match decode_packet(from, cipher).await {
                Ok(packet) => packet,
                // closed between packets
                Err(RelayError::ShortRead { stage }) if stage == STAGE_HEADER_LENGTH => {
                    return Ok(())
                }
                Err(e) => return Err(e),
            };

            match packet.opcode() {
                Some(op) if op == expect => {}
                Some(Opcode::Nope) => continue,
                _ => return Err(RelayError::Unsupported(Unsupported::Opcode(packet.command))),
            }

            if packet.body.is_empty() {
                continue;
            }
            to.write_all(&packet.body).await?;
            to.flush().await?;
            moved.fetch_add(packet.body.len() as u64, Ordering::Relaxed);
            trace!("Forwarded {} byte packet body", packet.body.len());
        }
    }

    let mut buf = vec![0u8; MAX_BUF_SIZE];
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        match framing {
            Framing::Encode { cipher, opcode } => {
                let packet = TunnelPacket::new(opcode, buf[..n].to_vec());
                write_packet(to, cipher, &packet).await?;
            }
            _ => to.write_all(&buf[..n]).await?,
        }
        moved.fetch_add(n as u64, Ordering::Relaxed);
        trace!("Forwarded {} byte chunk", n);
    }
}

/// Run both pumps until the first one finishes
///
/// Consumes both streams; they are closed when this returns.
pub async fn relay<A, B>(
    client: A,
    upstream: B,
    outbound: Framing<'_>,
    inbound: Framing<'_>,
) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let sent = AtomicU64::new(0);
    let received = AtomicU64::new(0);

    let (ended_by, result) = tokio::select! {
        result = pump(&mut client_read, &mut upstream_write, outbound, &sent) => {
            (Direction::ClientToUpstream, result)
        }
        result = pump(&mut upstream_read, &mut client_write, inbound, &received) => {
            (Direction::UpstreamToClient, result)
        }
    };

    RelayOutcome {
        ended_by,
        client_to_upstream: sent.load(Ordering::Relaxed),
        upstream_to_client: received.load(Ordering::Relaxed),
        error: result.err(),
    }
}
