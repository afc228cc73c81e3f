//! Tunnel wire contract
//!
//! A client opening a session with the local TLS proxy first sends exactly
//! [`HEADER_LEN`] bytes of ASCII naming the target host, right-padded with
//! spaces (NUL padding is accepted too). Every byte after the header is
//! USB/IP traffic and is relayed unmodified.

use crate::error::{ProtocolError, Result};

/// Port the remote USB/IP daemon listens on
pub const USBIP_PORT: u16 = 3240;

/// Port the local TLS proxy listens on
pub const PROXY_PORT: u16 = 3241;

/// Fixed size of the target-host header
pub const HEADER_LEN: usize = 20;

/// Decoded target-host header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHeader {
    host: String,
}

impl TunnelHeader {
    /// Build a header for `host`
    pub fn new(host: impl Into<String>) -> Result<Self> {
        let host = host.into();
        Self::validate(&host)?;
        Ok(Self { host })
    }

    /// Target host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Decode the fixed-size header read from the inbound socket
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        if !bytes.is_ascii() {
            return Err(ProtocolError::InvalidHeader(
                "header contains non-ASCII bytes".to_string(),
            ));
        }

        let text = String::from_utf8_lossy(bytes);
        let host = text
            .trim_matches(|c: char| c.is_ascii_whitespace() || c == '\0')
            .to_string();

        Self::new(host)
    }

    /// Encode as exactly [`HEADER_LEN`] bytes, right-padded with spaces
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [b' '; HEADER_LEN];
        buf[..self.host.len()].copy_from_slice(self.host.as_bytes());
        buf
    }

    fn validate(host: &str) -> Result<()> {
        if host.is_empty() {
            return Err(ProtocolError::InvalidHeader("empty target host".to_string()));
        }
        if !host.is_ascii() {
            return Err(ProtocolError::InvalidHeader(
                "target host is not ASCII".to_string(),
            ));
        }
        if host.len() > HEADER_LEN {
            return Err(ProtocolError::HeaderTooLong {
                len: host.len(),
                max: HEADER_LEN,
            });
        }
        if host.chars().any(|c| c.is_ascii_whitespace() || c.is_ascii_control()) {
            return Err(ProtocolError::InvalidHeader(format!(
                "target host '{}' contains whitespace or control characters",
                host.escape_debug()
            )));
        }
        Ok(())
    }
}
