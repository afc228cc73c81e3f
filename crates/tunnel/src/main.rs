//! usbip-tls-proxy
//!
//! Local relay that carries USB/IP sessions to remote servers over TLS.

use anyhow::{Context, Result};
use clap::Parser;
use common::{service, setup_logging};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tunnel::{TlsUpstream, TunnelConfig, TunnelServer, tls};

#[derive(Parser, Debug)]
#[command(name = "usbip-tls-proxy")]
#[command(author, version, about = "TLS relay for USB/IP sessions")]
#[command(long_about = "
Accepts local USB/IP clients, reads a 20-byte header naming the target server,
then relays the session to the server's USB/IP port over TLS.

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/usbip-autoredir/tls-proxy.toml
    3. /etc/usbip-autoredir/tls-proxy.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen address (default: 127.0.0.1:3241)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Send systemd readiness and watchdog notifications
    #[arg(long)]
    service: bool,

    /// Save default configuration to the default location and exit
    #[arg(long)]
    save_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let path = TunnelConfig::default_path();
        TunnelConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        TunnelConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        TunnelConfig::load_or_default()
    };
    if let Some(listen) = args.listen {
        config.proxy.listen = listen;
    }
    config.proxy.service_mode |= args.service;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.proxy.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbip-tls-proxy v{}", env!("CARGO_PKG_VERSION"));

    let tls_config = tls::client_config(&config.tls).context("Failed to set up TLS")?;
    let server = TunnelServer::bind(
        config.proxy.listen,
        TlsUpstream::new(tls_config),
        config.proxy.control_port,
    )
    .await
    .with_context(|| format!("Failed to listen on {}", config.proxy.listen))?;

    let watchdog = if config.proxy.service_mode {
        let watchdog = service::spawn_watchdog_task();
        service::notify_ready().context("Failed to notify systemd ready")?;
        service::notify_status(&format!("Relaying on {}", config.proxy.listen))
            .context("Failed to send status to systemd")?;
        watchdog
    } else {
        None
    };

    server.run(shutdown_signal()).await?;

    if config.proxy.service_mode {
        service::notify_stopping().context("Failed to notify systemd stopping")?;
    }
    if let Some(handle) = watchdog {
        handle.abort();
    }

    info!("Shutdown complete");
    Ok(())
}

/// Shutdown channel flipped to true on Ctrl+C
fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
            Err(e) => error!("Error waiting for Ctrl+C: {}", e),
        }
        let _ = tx.send(true);
    });
    rx
}
