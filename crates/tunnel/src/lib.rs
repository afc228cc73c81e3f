//! TLS tunnel for USB/IP
//!
//! A local USB/IP client connects to the proxy, sends a 20-byte header naming
//! the server, and from then on talks USB/IP as usual. The proxy opens a TLS
//! session to the server's control port and relays bytes unmodified in both
//! directions.
//!
//! # Example
//!
//! ```no_run
//! use tunnel::{TlsUpstream, TunnelConfig, TunnelServer, tls};
//!
//! # async fn example() -> tunnel::Result<()> {
//! let config = TunnelConfig::default();
//! let upstream = TlsUpstream::new(tls::client_config(&config.tls)?);
//! let server = TunnelServer::bind(config.proxy.listen, upstream, config.proxy.control_port).await?;
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod relay;
pub mod server;
pub mod tls;

pub use config::{ProxySettings, TlsSettings, TunnelConfig};
pub use error::{Result, TunnelError};
pub use relay::{ClosedBy, LIVENESS_INTERVAL, RELAY_BUFFER_SIZE, RelayStats, relay};
pub use server::{TlsUpstream, TunnelServer, UpstreamConnector, handle_connection};
