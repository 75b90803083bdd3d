//! Listener and accept loop
//!
//! Every accepted connection is registered, wrapped in a tracing span and
//! handed to its own task. Shutdown stops accepting and aborts the sessions
//! that are still live.

use crate::cipher::Cipher;
use crate::config::{Mode, RelayConfig};
use crate::helper::split_host_port;
use crate::protocol::{decode_packet, write_packet, Opcode, TunnelPacket};
use crate::session::{Session, SessionContext, SessionRegistry};
use crate::transport::SocketOpts;
use anyhow::{anyhow, bail, Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Bound relay listener
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    socket_opts: SocketOpts,
}

impl Server {
    /// Bind the listener described by the configuration
    pub async fn bind(config: &RelayConfig) -> Result<Self> {
        let ctx = SessionContext::from_config(config)?;
        let listener = TcpListener::bind(config.listen_addr())
            .await
            .with_context(|| format!("Failed to listen on {}", config.listen_addr()))?;

        Ok(Self::from_parts(
            listener,
            ctx,
            SocketOpts::from_tcp_config(&config.tcp),
        ))
    }

    /// Assemble a server from an already bound listener
    pub fn from_parts(listener: TcpListener, ctx: SessionContext, socket_opts: SocketOpts) -> Self {
        Server {
            listener,
            ctx: Arc::new(ctx),
            registry: SessionRegistry::new(),
            socket_opts,
        }
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Registry of live sessions
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Accept connections until shutdown
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
        info!(
            "Listening on {} in {} mode",
            self.local_addr()?,
            self.ctx.mode
        );

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        let aborted = self.registry.shutdown_all();
        info!("Server stopped, aborted {} live sessions", aborted);
        Ok(())
    }

    fn spawn_session(&self, stream: TcpStream, peer: SocketAddr) {
        self.socket_opts.hint(&stream);

        let guard = self.registry.register(peer);
        let id = guard.id();
        let ctx = Arc::clone(&self.ctx);
        debug!("Accepted {} as session {}", peer, id);

        let span = info_span!("session", id, %peer);
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                let session = match Session::new(id, peer, stream, ctx) {
                    Ok(session) => session,
                    Err(e) => {
                        error!("Failed to start session: {:#}", e);
                        return;
                    }
                };
                if let Err(e) = session.run().await {
                    warn!("Session failed: {:#}", e);
                }
            }
            .instrument(span),
        );

        self.registry.attach_abort(id, task.abort_handle());
    }
}

/// Bind and run the relay described by the configuration
pub async fn run_server(config: RelayConfig, shutdown_rx: broadcast::Receiver<bool>) -> Result<()> {
    Server::bind(&config).await?.run(shutdown_rx).await
}

/// Send a GET_URL probe to the tunnel server and return the echoed text
pub async fn probe(config: &RelayConfig, url: &str) -> Result<String> {
    if config.mode != Mode::TunnelClient {
        bail!("GET_URL probe requires tunnel-client mode");
    }
    let server = config
        .tunnel_server
        .as_deref()
        .ok_or_else(|| anyhow!("No tunnel server configured"))?;
    let (host, port) =
        split_host_port(server).ok_or_else(|| anyhow!("Invalid tunnel server address: {}", server))?;

    let ctx = SessionContext::from_config(config)?;
    let addr = ctx.resolver.resolve(host, port).await?;
    let mut stream = ctx.connector.connect(addr).await?;
    let cipher = Cipher::new(&ctx.key)?;

    write_packet(
        &mut stream,
        &cipher,
        &TunnelPacket::new(Opcode::GetUrl, url.as_bytes().to_vec()),
    )
    .await
    .context("Failed to send GET_URL")?;

    let answer = decode_packet(&mut stream, &cipher)
        .await
        .context("Failed to read GET_URL answer")?;
    match answer.opcode() {
        Some(Opcode::Ok) => Ok(String::from_utf8_lossy(&answer.body).into_owned()),
        _ => bail!("Tunnel server answered GET_URL with opcode {}", answer.command),
    }
}
