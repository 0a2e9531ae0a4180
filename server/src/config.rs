//! Runtime settings for the relay server

use shared::DEFAULT_PORT;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max connections must be at least 1")]
    NoConnectionsAllowed,

    #[error("outbound buffer must hold at least one message")]
    EmptyOutboundBuffer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind, e.g. `0.0.0.0` or `::1`
    pub host: String,
    pub port: u16,
    /// Websocket upgrades are only accepted on this path
    pub path: String,
    pub max_connections: usize,
    /// Per-connection queue depth before payloads are skipped for that peer
    pub outbound_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            path: "/".to_string(),
            max_connections: 1024,
            outbound_buffer: 256,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::NoConnectionsAllowed);
        }
        if self.outbound_buffer == 0 {
            return Err(ConfigError::EmptyOutboundBuffer);
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Upgrade path with a guaranteed leading slash
    pub fn upgrade_path(&self) -> String {
        if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        }
    }
}
