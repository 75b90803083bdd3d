//! # lksocks - SOCKS5 relay with an encrypted tunnel
//!
//! lksocks accepts SOCKS5 clients and relays their CONNECT requests, either
//! directly or through a tunnel server. Tunnel traffic is framed as packets
//! whose header and zlib-compressed body are Blowfish encrypted with a shared
//! key.
//!
//! ## Modes
//!
//! - **Direct**: SOCKS5 agent that connects to destinations itself
//! - **Tunnel client**: SOCKS5 agent that forwards each request to a tunnel server
//! - **Tunnel server**: accepts tunnel packets and connects on behalf of clients
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lksocks::config::load_config;
//! use lksocks::server::run_server;
//! use tokio::sync::broadcast;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config("lksocks.toml")?;
//!     let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
//!
//!     run_server(config.relay, shutdown_rx).await
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! SOCKS5 Client -> lksocks (tunnel-client) => lksocks (tunnel-server) -> Target
//! SOCKS5 Client -> lksocks (direct) -> Target
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cipher;
pub mod config;
pub mod error;
pub mod helper;
pub mod protocol;
pub mod server;
pub mod session;
pub mod socks;
pub mod transport;

// Re-export commonly used items
pub use config::{load_config, Config};
pub use error::{RelayError, Unsupported};
pub use server::{probe, run_server, Server};

/// Version of the lksocks library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the application
pub const NAME: &str = env!("CARGO_PKG_NAME");
