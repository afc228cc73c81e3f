//! Local relay listener
//!
//! Each accepted client goes through handshake (read the target header),
//! connecting (TCP then TLS to the target's control port), relaying, and
//! closed. Connections are independent tasks; a failure ends only its own
//! connection.

use crate::error::{Result, TunnelError};
use crate::relay::{RelayStats, relay};
use crate::tls;
use protocol::{HEADER_LEN, TunnelHeader};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

/// Opens the upstream side of a tunnel
pub trait UpstreamConnector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn connect(
        &self,
        host: &str,
        port: u16,
    ) -> impl Future<Output = Result<Self::Stream>> + Send;
}

/// TCP connection wrapped in a TLS client session
#[derive(Clone)]
pub struct TlsUpstream {
    connector: TlsConnector,
}

impl TlsUpstream {
    pub fn new(config: rustls::ClientConfig) -> Self {
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

impl UpstreamConnector for TlsUpstream {
    type Stream = TlsStream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TunnelError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?
            .collect();
        if addrs.is_empty() {
            return Err(TunnelError::Resolve {
                host: host.to_string(),
                reason: "no addresses".to_string(),
            });
        }

        let tcp = TcpStream::connect(&addrs[..])
            .await
            .map_err(|source| TunnelError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        tcp.set_nodelay(true)?;

        let stream = self
            .connector
            .connect(tls::server_name(host)?, tcp)
            .await
            .map_err(|e| TunnelError::Tls(format!("Handshake with {} failed: {}", host, e)))?;

        debug!("TLS session with {}:{} established", host, port);
        Ok(stream)
    }
}

/// Run one tunnel connection to completion
pub async fn handle_connection<S, C>(
    mut inbound: S,
    connector: &C,
    control_port: u16,
    shutdown: watch::Receiver<bool>,
) -> Result<RelayStats>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: UpstreamConnector,
{
    let mut raw = [0u8; HEADER_LEN];
    inbound.read_exact(&mut raw).await?;
    let header = match TunnelHeader::decode(&raw) {
        Ok(header) => header,
        Err(e) => {
            let _ = inbound.shutdown().await;
            return Err(e.into());
        }
    };
    info!("Proxy target: {}", header.host());

    let outbound = match connector.connect(header.host(), control_port).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = inbound.shutdown().await;
            return Err(e);
        }
    };
    info!("Connected to {}:{}", header.host(), control_port);

    let stats = relay(inbound, outbound, shutdown).await;
    info!(
        "Connection with {} closed by {} ({} bytes up, {} bytes down)",
        header.host(),
        stats.closed_by,
        stats.to_upstream,
        stats.to_client
    );
    Ok(stats)
}

/// Listener spawning one task per tunnel connection
pub struct TunnelServer<C> {
    listener: TcpListener,
    connector: Arc<C>,
    control_port: u16,
}

impl<C: UpstreamConnector> TunnelServer<C> {
    pub async fn bind(addr: SocketAddr, connector: C, control_port: u16) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            connector: Arc::new(connector),
            control_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until shutdown
    ///
    /// Open connections are cancelled on shutdown; this returns once they
    /// are gone.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("TLS proxy listening on {}", self.local_addr()?);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept error: {}", e);
                            continue;
                        }
                    };
                    info!("New proxy connection from {}", peer);

                    let connector = Arc::clone(&self.connector);
                    let control_port = self.control_port;
                    let shutdown = shutdown.clone();
                    connections.spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, connector.as_ref(), control_port, shutdown).await
                        {
                            warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("TLS proxy shutting down, closing {} connection(s)", connections.len());
        // Dropping a connection task closes both of its sockets
        connections.shutdown().await;
        Ok(())
    }
}
