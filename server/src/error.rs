use crate::config::ConfigError;
use shared::ProtocolError;
use std::net::SocketAddr;

/// Errors surfaced by server setup and by individual datagram sends.
///
/// Send failures are per recipient and never abort a broadcast; the caller
/// logs them and moves on to the next address.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode packet: {0}")]
    Encode(#[from] ProtocolError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
