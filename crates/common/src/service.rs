//! Systemd service integration
//!
//! This module provides integration with systemd's sd-notify protocol,
//! enabling proper service lifecycle management, watchdog support, and
//! status notifications. Every call is a no-op outside systemd.

use std::env;
use std::os::unix::net::UnixDatagram;
use std::time::Duration;
use tracing::{debug, error, info};

fn send(message: &str) -> crate::Result<bool> {
    let Ok(socket_path) = env::var("NOTIFY_SOCKET") else {
        return Ok(false);
    };
    let socket = UnixDatagram::unbound()?;
    socket.send_to(message.as_bytes(), &socket_path)?;
    Ok(true)
}

/// Notify systemd that the service is ready
///
/// Only has effect when running under systemd with Type=notify.
pub fn notify_ready() -> crate::Result<()> {
    if send("READY=1")? {
        info!("Notified systemd: service ready");
    } else {
        debug!("NOTIFY_SOCKET not set, skipping systemd notification");
    }
    Ok(())
}

/// Notify systemd that the service is stopping
pub fn notify_stopping() -> crate::Result<()> {
    if send("STOPPING=1")? {
        info!("Notified systemd: service stopping");
    }
    Ok(())
}

/// Send watchdog keepalive to systemd
pub fn notify_watchdog() -> crate::Result<()> {
    send("WATCHDOG=1").map(|_| ())
}

/// Send a status line, visible in `systemctl status`
pub fn notify_status(status: &str) -> crate::Result<()> {
    if send(&format!("STATUS={}", status))? {
        debug!("Notified systemd: status = {}", status);
    }
    Ok(())
}

/// Watchdog timeout configured by systemd
///
/// Returns None if watchdog is not enabled or not running under systemd.
pub fn watchdog_timeout() -> Option<Duration> {
    env::var("WATCHDOG_USEC")
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_micros)
}

/// Check if running under systemd
pub fn is_systemd() -> bool {
    env::var("NOTIFY_SOCKET").is_ok()
}

/// Spawn a task sending WATCHDOG=1 at half the configured watchdog interval
///
/// Returns None if watchdog is not enabled.
pub fn spawn_watchdog_task() -> Option<tokio::task::JoinHandle<()>> {
    let Some(timeout) = watchdog_timeout() else {
        debug!("Systemd watchdog not enabled, skipping watchdog task");
        return None;
    };

    let interval = (timeout / 2).max(Duration::from_secs(1));
    info!(
        "Systemd watchdog enabled, interval: {:?} (timeout: {:?})",
        interval, timeout
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = notify_watchdog() {
                error!("Failed to send watchdog keepalive: {}", e);
            }
        }
    }))
}
