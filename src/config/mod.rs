//! Configuration module for lksocks
//!
//! TOML configuration for the relay and its logging.

mod relay;
mod transport;

pub use relay::{
    Config, LogConfig, Mode, RelayConfig, DEFAULT_AGENT_ADDR, DEFAULT_TUNNEL_SERVER_ADDR,
};
pub use transport::TcpConfig;

use anyhow::{anyhow, Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse configuration")?;

    config
        .relay
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    Ok(config)
}
