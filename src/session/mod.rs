//! Relay sessions
//!
//! A [`Session`] owns the accepted stream, runs the SOCKS5 negotiation (or, on
//! the tunnel server, reads the tunnel "open" packet), opens the upstream
//! socket and then pumps bytes in both directions until either side closes.
//! Each session builds its own cipher key schedule.

mod pump;
pub mod registry;

pub use pump::{pump, relay, Direction, Framing, RelayOutcome};
pub use registry::{SessionGuard, SessionHandle, SessionId, SessionRegistry};

use crate::cipher::Cipher;
use crate::config::{Mode, RelayConfig};
use crate::error::{RelayError, Unsupported};
use crate::helper::{bound_ipv4, split_host_port};
use crate::protocol::{decode_packet, write_packet, Opcode, TunnelPacket};
use crate::socks::{
    build_reply, negotiate, parse_request, read_request, Socks5Request,
    SOCKS5_REPLY_GENERAL_FAILURE, SOCKS5_REPLY_SUCCEEDED,
};
use crate::transport::{Connector, Resolver, SystemResolver};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Lifecycle of a session after the SOCKS5 handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Negotiating SOCKS5 or reading the tunnel open packet
    Handshake,
    /// Upstream address is known
    Resolved,
    /// Upstream connect in flight
    Connecting,
    /// Upstream socket is open
    Connected,
    /// Pumping bytes
    Relaying,
    /// Both sockets closed
    Closed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Handshake => "handshake",
            Phase::Resolved => "resolved",
            Phase::Connecting => "connecting",
            Phase::Connected => "connected",
            Phase::Relaying => "relaying",
            Phase::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Settings shared by every session of one listener
#[derive(Debug)]
pub struct SessionContext {
    /// Operating mode
    pub mode: Mode,
    /// Raw tunnel key; each session expands its own schedule from it
    pub key: Vec<u8>,
    /// Tunnel server host and port (tunnel-client mode)
    pub tunnel_server: Option<(String, u16)>,
    /// Destination resolver
    pub resolver: Arc<dyn Resolver>,
    /// Upstream connector
    pub connector: Connector,
}

impl SessionContext {
    /// Context with default key, connector and system resolver
    pub fn new(mode: Mode) -> Self {
        SessionContext {
            mode,
            key: crate::cipher::DEFAULT_KEY.as_bytes().to_vec(),
            tunnel_server: None,
            resolver: Arc::new(SystemResolver),
            connector: Connector::with_defaults(),
        }
    }

    /// Build the context from validated relay configuration
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let tunnel_server = match &config.tunnel_server {
            Some(addr) => {
                let (host, port) = split_host_port(addr)
                    .ok_or_else(|| anyhow!("Invalid tunnel server address: {}", addr))?;
                Some((host.to_string(), port))
            }
            None => None,
        };

        // fail at startup rather than per session
        Cipher::new(config.key.as_bytes()).context("Invalid tunnel key")?;

        Ok(SessionContext {
            mode: config.mode,
            key: config.key.as_bytes().to_vec(),
            tunnel_server,
            resolver: Arc::new(SystemResolver),
            connector: Connector::from_config(config),
        })
    }

    /// Set the tunnel server endpoint
    pub fn with_tunnel_server(mut self, host: impl Into<String>, port: u16) -> Self {
        self.tunnel_server = Some((host.into(), port));
        self
    }

    /// Set the tunnel key
    pub fn with_key(mut self, key: &[u8]) -> Self {
        self.key = key.to_vec();
        self
    }

    /// Replace the resolver
    pub fn with_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.resolver = resolver;
        self
    }
}

/// One accepted connection and, once known, its upstream socket
pub struct Session<S> {
    id: SessionId,
    peer: SocketAddr,
    client: S,
    ctx: Arc<SessionContext>,
    cipher: Cipher,
    phase: Phase,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session, expanding its own key schedule
    pub fn new(id: SessionId, peer: SocketAddr, client: S, ctx: Arc<SessionContext>) -> Result<Self> {
        let cipher = Cipher::new(&ctx.key).context("Invalid tunnel key")?;
        Ok(Session {
            id,
            peer,
            client,
            ctx,
            cipher,
            phase: Phase::Handshake,
        })
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("Session {} {} -> {}", self.id, self.phase, phase);
        self.phase = phase;
    }

    /// Drive the session to completion
    pub async fn run(self) -> Result<()> {
        debug!("Session {} started for {} in {} mode", self.id, self.peer, self.ctx.mode);
        match self.ctx.mode {
            Mode::Direct => self.run_direct().await,
            Mode::TunnelClient => self.run_tunnel_client().await,
            Mode::TunnelServer => self.run_tunnel_server().await,
        }
    }

    async fn run_direct(mut self) -> Result<()> {
        let request = self.handshake().await?;

        let upstream = match self.connect_upstream(&request.host, request.port).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.reject(e).await.context(format!("Failed to reach {}", request))),
        };

        build_reply(&mut self.client, SOCKS5_REPLY_SUCCEEDED, upstream.local_addr().ok())
            .await
            .context("Failed to send SOCKS5 reply")?;

        info!("Relaying {} <-> {}", self.peer, request);
        self.enter(Phase::Relaying);

        let Session { id, client, .. } = self;
        let outcome = relay(client, upstream, Framing::Raw, Framing::Raw).await;
        log_outcome(id, &outcome);
        Ok(())
    }

    async fn run_tunnel_client(mut self) -> Result<()> {
        let request = self.handshake().await?;
        let open = match request.to_bytes() {
            Ok(bytes) => TunnelPacket::new(Opcode::SocksConnect, bytes),
            Err(e) => return Err(self.reject(e).await.context("Cannot forward SOCKS5 request")),
        };

        let (host, port) = match self.ctx.tunnel_server.clone() {
            Some(endpoint) => endpoint,
            None => {
                if let Err(e) =
                    build_reply(&mut self.client, SOCKS5_REPLY_GENERAL_FAILURE, None).await
                {
                    debug!("Failed to send SOCKS5 failure reply: {}", e);
                }
                return Err(anyhow!("No tunnel server configured"));
            }
        };

        let mut upstream = match self.connect_upstream(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self
                    .reject(e)
                    .await
                    .context(format!("Failed to reach tunnel server {}:{}", host, port)))
            }
        };

        let answer = match self.open_tunnel(&mut upstream, &open).await {
            Ok(answer) => answer,
            Err(e) => return Err(self.reject(e).await.context("Tunnel open failed")),
        };

        match answer.opcode() {
            Some(Opcode::Ok) => {
                debug!("Tunnel server bound {:?} for {}", &answer.body[..], request);
            }
            Some(Opcode::Error) => {
                let code = answer
                    .body
                    .first()
                    .copied()
                    .unwrap_or(SOCKS5_REPLY_GENERAL_FAILURE);
                if let Err(e) = build_reply(&mut self.client, code, None).await {
                    debug!("Failed to send SOCKS5 failure reply: {}", e);
                }
                return Err(anyhow!(
                    "Tunnel server refused {} with reply code {:#04x}",
                    request,
                    code
                ));
            }
            _ => {
                let err = RelayError::Unsupported(Unsupported::Opcode(answer.command));
                return Err(self.reject(err).await.context("Unexpected tunnel answer"));
            }
        }

        build_reply(&mut self.client, SOCKS5_REPLY_SUCCEEDED, upstream.local_addr().ok())
            .await
            .context("Failed to send SOCKS5 reply")?;

        info!("Relaying {} <-> {} via tunnel {}:{}", self.peer, request, host, port);
        self.enter(Phase::Relaying);

        let Session {
            id, client, cipher, ..
        } = self;
        let outcome = relay(
            client,
            upstream,
            Framing::Encode {
                cipher: &cipher,
                opcode: Opcode::SocksConnect,
            },
            Framing::Decode {
                cipher: &cipher,
                expect: Opcode::Ok,
            },
        )
        .await;
        log_outcome(id, &outcome);
        Ok(())
    }

    async fn run_tunnel_server(mut self) -> Result<()> {
        let packet = decode_packet(&mut self.client, &self.cipher)
            .await
            .context("Failed to read tunnel request")?;

        match packet.opcode() {
            Some(Opcode::GetUrl) => {
                info!("GET_URL {}", String::from_utf8_lossy(&packet.body));
                let echo = TunnelPacket::new(Opcode::Ok, packet.body);
                write_packet(&mut self.client, &self.cipher, &echo)
                    .await
                    .context("Failed to answer GET_URL")?;
                self.enter(Phase::Closed);
                Ok(())
            }
            Some(Opcode::Nope) => {
                write_packet(&mut self.client, &self.cipher, &TunnelPacket::new(Opcode::Ok, Vec::new()))
                    .await
                    .context("Failed to answer NOPE")?;
                self.enter(Phase::Closed);
                Ok(())
            }
            Some(Opcode::SocksConnect) => self.serve_socks_connect(&packet.body).await,
            _ => {
                let err = RelayError::Unsupported(Unsupported::Opcode(packet.command));
                Err(self.refuse(err).await.context("Unknown tunnel request"))
            }
        }
    }

    async fn serve_socks_connect(mut self, body: &[u8]) -> Result<()> {
        let request = match parse_request(body) {
            Ok(request) => request,
            Err(e) => return Err(self.refuse(e).await.context("Invalid tunneled SOCKS5 request")),
        };
        info!("Tunnel CONNECT to {}", request);

        let upstream = match self.connect_upstream(&request.host, request.port).await {
            Ok(stream) => stream,
            Err(e) => return Err(self.refuse(e).await.context(format!("Failed to reach {}", request))),
        };

        let bound = bound_ipv4(upstream.local_addr().ok());
        let mut answer = bound.ip().octets().to_vec();
        answer.extend_from_slice(&bound.port().to_be_bytes());
        write_packet(&mut self.client, &self.cipher, &TunnelPacket::new(Opcode::Ok, answer))
            .await
            .context("Failed to answer tunnel open")?;

        info!("Relaying tunnel {} <-> {}", self.peer, request);
        self.enter(Phase::Relaying);

        let Session {
            id, client, cipher, ..
        } = self;
        let outcome = relay(
            client,
            upstream,
            Framing::Decode {
                cipher: &cipher,
                expect: Opcode::SocksConnect,
            },
            Framing::Encode {
                cipher: &cipher,
                opcode: Opcode::Ok,
            },
        )
        .await;
        log_outcome(id, &outcome);
        Ok(())
    }

    /// Greeting plus request, replying on request errors where possible
    async fn handshake(&mut self) -> Result<Socks5Request> {
        let mut machine = negotiate(&mut self.client)
            .await
            .context("SOCKS5 greeting failed")?;

        match read_request(&mut self.client, &mut machine).await {
            Ok(request) => {
                info!("SOCKS5 CONNECT to {}", request);
                Ok(request)
            }
            Err(e) => Err(self.reject(e).await.context("Failed to read SOCKS5 request")),
        }
    }

    async fn connect_upstream(&mut self, host: &str, port: u16) -> Result<TcpStream, RelayError> {
        let addr = self.ctx.resolver.resolve(host, port).await?;
        self.enter(Phase::Resolved);

        self.enter(Phase::Connecting);
        let stream = self.ctx.connector.connect(addr).await?;
        self.enter(Phase::Connected);

        Ok(stream)
    }

    async fn open_tunnel(
        &self,
        upstream: &mut TcpStream,
        open: &TunnelPacket,
    ) -> Result<TunnelPacket, RelayError> {
        write_packet(upstream, &self.cipher, open).await?;
        decode_packet(upstream, &self.cipher).await
    }

    /// Send a SOCKS5 failure reply when the stream is still usable
    async fn reject(&mut self, err: RelayError) -> anyhow::Error {
        if replyable(&err) {
            if let Err(e) = build_reply(&mut self.client, err.reply_code(), None).await {
                debug!("Failed to send SOCKS5 failure reply: {}", e);
            }
        }
        self.enter(Phase::Closed);
        err.into()
    }

    /// Send a tunnel ERROR packet when the stream is still usable
    async fn refuse(&mut self, err: RelayError) -> anyhow::Error {
        if replyable(&err) {
            let packet = TunnelPacket::new(Opcode::Error, vec![err.reply_code()]);
            if let Err(e) = write_packet(&mut self.client, &self.cipher, &packet).await {
                debug!("Failed to send tunnel ERROR packet: {}", e);
            }
        }
        self.enter(Phase::Closed);
        err.into()
    }
}

/// Whether the peer can still receive a failure answer
fn replyable(err: &RelayError) -> bool {
    !matches!(err, RelayError::ShortRead { .. } | RelayError::Io(_))
}

fn log_outcome(id: SessionId, outcome: &RelayOutcome) {
    match &outcome.error {
        None => info!(
            "Session {} closed by {} ({} bytes up, {} bytes down)",
            id, outcome.ended_by, outcome.client_to_upstream, outcome.upstream_to_client
        ),
        Some(e) => warn!(
            "Session {} ended by {} error: {} ({} bytes up, {} bytes down)",
            id, outcome.ended_by, e, outcome.client_to_upstream, outcome.upstream_to_client
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socks::{SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED, SOCKS5_REPLY_COMMAND_NOT_SUPPORTED};
    use async_trait::async_trait;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    #[derive(Debug)]
    struct FailingResolver;

    #[async_trait]
    impl Resolver for FailingResolver {
        async fn resolve(&self, host: &str, _port: u16) -> crate::error::Result<SocketAddr> {
            Err(RelayError::Resolution {
                host: host.to_string(),
                reason: "test resolver".to_string(),
            })
        }
    }

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut r, mut w) = stream.split();
                    let _ = tokio::io::copy(&mut r, &mut w).await;
                });
            }
        });
        addr
    }

    fn connect_request(addr: SocketAddr) -> Vec<u8> {
        let mut request = vec![5, 1, 0, 1];
        if let SocketAddr::V4(v4) = addr {
            request.extend_from_slice(&v4.ip().octets());
        }
        request.extend_from_slice(&addr.port().to_be_bytes());
        request
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Relaying.to_string(), "relaying");
        assert_eq!(Phase::Closed.to_string(), "closed");
    }

    #[test]
    fn test_context_from_config() {
        let config = RelayConfig {
            mode: Mode::TunnelClient,
            tunnel_server: Some("relay.example.com:2484".to_string()),
            ..Default::default()
        };
        let ctx = SessionContext::from_config(&config).unwrap();
        assert_eq!(ctx.mode, Mode::TunnelClient);
        assert_eq!(
            ctx.tunnel_server,
            Some(("relay.example.com".to_string(), 2484))
        );
        assert_eq!(ctx.key, b"@@abort();");
    }

    #[test]
    fn test_session_rejects_invalid_key() {
        let ctx = Arc::new(SessionContext::new(Mode::Direct).with_key(b""));
        let (_, server) = duplex(64);
        assert!(Session::new(1, peer(), server, ctx).is_err());
    }

    #[tokio::test]
    async fn test_direct_session_relays() {
        let target = echo_server().await;
        let ctx = Arc::new(SessionContext::new(Mode::Direct));
        let (mut client, server) = duplex(4096);

        let session = Session::new(1, peer(), server, ctx).unwrap();
        assert_eq!(session.phase(), Phase::Handshake);
        let task = tokio::spawn(session.run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(greeting, [5, 0]);

        client.write_all(&connect_request(target)).await.unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[..4], &[5, SOCKS5_REPLY_SUCCEEDED, 0, 1]);
        assert_eq!(&reply[4..8], &[127, 0, 0, 1]);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_direct_session_resolution_failure_replies() {
        let ctx = Arc::new(
            SessionContext::new(Mode::Direct).with_resolver(Arc::new(FailingResolver)),
        );
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(2, peer(), server, ctx).unwrap().run());

        client.write_all(&[5, 1, 0]).await.unwrap();
        let mut greeting = [0u8; 2];
        client.read_exact(&mut greeting).await.unwrap();

        let mut request = vec![5, 1, 0, 3, 7];
        request.extend_from_slice(b"example");
        request.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], crate::socks::SOCKS5_REPLY_HOST_UNREACHABLE);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn test_direct_session_unsupported_replies() {
        let cases = [
            (vec![5u8, 2, 0, 1], SOCKS5_REPLY_COMMAND_NOT_SUPPORTED),
            (vec![5u8, 1, 0, 4], SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED),
        ];

        for (header, expected) in cases {
            let ctx = Arc::new(SessionContext::new(Mode::Direct));
            let (mut client, server) = duplex(4096);
            let task = tokio::spawn(Session::new(3, peer(), server, ctx).unwrap().run());

            client.write_all(&[5, 1, 0]).await.unwrap();
            let mut greeting = [0u8; 2];
            client.read_exact(&mut greeting).await.unwrap();

            client.write_all(&header).await.unwrap();
            let mut reply = [0u8; 10];
            client.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply[1], expected);

            assert!(task.await.unwrap().is_err());
        }
    }

    #[tokio::test]
    async fn test_tunnel_server_get_url_echo() {
        let ctx = Arc::new(SessionContext::new(Mode::TunnelServer));
        let cipher = Cipher::new(&ctx.key).unwrap();
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(4, peer(), server, ctx).unwrap().run());

        let url = b"http://example.com/ping";
        write_packet(&mut client, &cipher, &TunnelPacket::new(Opcode::GetUrl, url.to_vec()))
            .await
            .unwrap();
        let answer = decode_packet(&mut client, &cipher).await.unwrap();
        assert_eq!(answer.opcode(), Some(Opcode::Ok));
        assert_eq!(&answer.body[..], url);

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_server_unknown_opcode() {
        let ctx = Arc::new(SessionContext::new(Mode::TunnelServer));
        let cipher = Cipher::new(&ctx.key).unwrap();
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(5, peer(), server, ctx).unwrap().run());

        let mut packet = TunnelPacket::new(Opcode::Ok, b"?".to_vec());
        packet.command = 4242;
        write_packet(&mut client, &cipher, &packet).await.unwrap();

        let answer = decode_packet(&mut client, &cipher).await.unwrap();
        assert_eq!(answer.opcode(), Some(Opcode::Error));
        assert_eq!(&answer.body[..], &[SOCKS5_REPLY_GENERAL_FAILURE]);

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelayError>(),
            Some(RelayError::Unsupported(Unsupported::Opcode(4242)))
        ));
    }

    #[tokio::test]
    async fn test_tunnel_server_connect_and_relay() {
        let target = echo_server().await;
        let ctx = Arc::new(SessionContext::new(Mode::TunnelServer));
        let cipher = Cipher::new(&ctx.key).unwrap();
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(6, peer(), server, ctx).unwrap().run());

        let open = TunnelPacket::new(Opcode::SocksConnect, connect_request(target));
        write_packet(&mut client, &cipher, &open).await.unwrap();

        let answer = decode_packet(&mut client, &cipher).await.unwrap();
        assert_eq!(answer.opcode(), Some(Opcode::Ok));
        assert_eq!(answer.body.len(), 6);
        assert_eq!(&answer.body[..4], &[127, 0, 0, 1]);

        let data = TunnelPacket::new(Opcode::SocksConnect, b"ping".to_vec());
        write_packet(&mut client, &cipher, &data).await.unwrap();
        let echoed = decode_packet(&mut client, &cipher).await.unwrap();
        assert_eq!(echoed.opcode(), Some(Opcode::Ok));
        assert_eq!(&echoed.body[..], b"ping");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_tunnel_server_rejects_ipv6_request() {
        let ctx = Arc::new(SessionContext::new(Mode::TunnelServer));
        let cipher = Cipher::new(&ctx.key).unwrap();
        let (mut client, server) = duplex(4096);
        let task = tokio::spawn(Session::new(7, peer(), server, ctx).unwrap().run());

        let mut body = vec![5, 1, 0, 4];
        body.extend_from_slice(&[0u8; 18]);
        write_packet(&mut client, &cipher, &TunnelPacket::new(Opcode::SocksConnect, body))
            .await
            .unwrap();

        let answer = decode_packet(&mut client, &cipher).await.unwrap();
        assert_eq!(answer.opcode(), Some(Opcode::Error));
        assert_eq!(&answer.body[..], &[SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED]);
        assert!(task.await.unwrap().is_err());
    }
}
