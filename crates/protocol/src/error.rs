//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Tunnel header could not be decoded
    #[error("Invalid tunnel header: {0}")]
    InvalidHeader(String),

    /// Target host does not fit the fixed-size header
    #[error("Tunnel header too long: {len} bytes (max: {max})")]
    HeaderTooLong { len: usize, max: usize },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
