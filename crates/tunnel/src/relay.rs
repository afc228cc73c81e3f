//! Full-duplex byte relay between the inbound client and the upstream server

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Read buffer per direction
pub const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Longest the relay waits on idle sockets before re-checking shutdown
pub const LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Which event ended a relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    /// Inbound client closed or failed
    Client,
    /// Upstream server closed or failed
    Upstream,
    /// Shutdown was requested
    Shutdown,
}

impl fmt::Display for ClosedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Upstream => f.write_str("upstream"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the client to the server
    pub to_upstream: u64,
    /// Bytes copied from the server to the client
    pub to_client: u64,
    pub closed_by: ClosedBy,
}

/// Copy bytes both ways until either side closes or shutdown is requested
///
/// Both streams are shut down and dropped before returning, so the peer of
/// each side observes the close.
pub async fn relay<I, O>(inbound: I, outbound: O, mut shutdown: watch::Receiver<bool>) -> RelayStats
where
    I: AsyncRead + AsyncWrite,
    O: AsyncRead + AsyncWrite,
{
    let (mut client_rx, mut client_tx) = split(inbound);
    let (mut server_rx, mut server_tx) = split(outbound);
    let mut client_buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut server_buf = vec![0u8; RELAY_BUFFER_SIZE];

    let mut to_upstream = 0u64;
    let mut to_client = 0u64;
    let mut watching = true;

    let closed_by = loop {
        if *shutdown.borrow() {
            break ClosedBy::Shutdown;
        }

        tokio::select! {
            read = client_rx.read(&mut client_buf) => match read {
                Ok(0) => break ClosedBy::Client,
                Ok(n) => {
                    if let Err(e) = server_tx.write_all(&client_buf[..n]).await {
                        debug!("Write to upstream failed: {}", e);
                        break ClosedBy::Upstream;
                    }
                    to_upstream += n as u64;
                }
                Err(e) => {
                    debug!("Read from client failed: {}", e);
                    break ClosedBy::Client;
                }
            },
            read = server_rx.read(&mut server_buf) => match read {
                Ok(0) => break ClosedBy::Upstream,
                Ok(n) => {
                    if let Err(e) = client_tx.write_all(&server_buf[..n]).await {
                        debug!("Write to client failed: {}", e);
                        break ClosedBy::Client;
                    }
                    to_client += n as u64;
                }
                Err(e) => {
                    debug!("Read from upstream failed: {}", e);
                    break ClosedBy::Upstream;
                }
            },
            changed = shutdown.changed(), if watching => {
                if changed.is_err() {
                    // Sender gone; no shutdown can be requested anymore
                    watching = false;
                }
            }
            _ = tokio::time::sleep(LIVENESS_INTERVAL) => {
                trace!("Relay idle");
            }
        }
    };

    let _ = client_tx.shutdown().await;
    let _ = server_tx.shutdown().await;

    RelayStats {
        to_upstream,
        to_client,
        closed_by,
    }
}
