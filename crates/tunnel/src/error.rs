//! Tunnel error types

use protocol::ProtocolError;
use thiserror::Error;

/// Errors that end a single tunnel connection, or keep the proxy from starting
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The 20-byte target header was malformed
    #[error(transparent)]
    InvalidHeader(#[from] ProtocolError),

    /// Target host name did not resolve
    #[error("Failed to resolve '{host}': {reason}")]
    Resolve { host: String, reason: String },

    /// TCP connection to the target was refused or failed
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS configuration or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rustls::Error> for TunnelError {
    fn from(err: rustls::Error) -> Self {
        TunnelError::Tls(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
