//! usbip-autoredir
//!
//! Automatic USB/IP redirection daemon. Binds local devices for export or
//! attaches devices exported by remote hosts, as allowed by filter rules.

use anyhow::{Context, Result, anyhow};
use autoredir::{
    AutoRedirConfig, AutoRedirEngine, ExportAction, ImportAction, RegistryStore, ServerRegistry,
    UsbipAction, action::AutoAction,
};
use clap::{Parser, Subcommand};
use common::{load_rules_file, load_rules_or_empty, service, setup_logging};
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usbip-autoredir")]
#[command(author, version, about = "Automatic USB/IP device redirection")]
#[command(long_about = "
Watches USB devices and redirects them over USB/IP according to filter rules.

EXAMPLES:
    # Export allowed local devices as they are plugged in
    usbip-autoredir autobind

    # Import allowed devices from all configured servers
    usbip-autoredir autoattach

    # Register a server; it imports nothing until rules are set
    usbip-autoredir add-server lab 10.0.0.5
    usbip-autoredir set-rules lab ./lab.rules

RULES:
    One rule per line, first match wins, unmatched devices are skipped:
        + hid          allow by interface class
        + 1050:04??    allow by VID:PID glob
        - *            forbid everything else

CONFIGURATION:
    1. Path specified with --config
    2. ~/.config/usbip-autoredir/autoredir.toml
    3. /etc/usbip-autoredir/autoredir.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Filter rules file
    #[arg(short, long, value_name = "PATH")]
    rules: Option<PathBuf>,

    /// Server list file
    #[arg(short, long, value_name = "PATH")]
    servers: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Send systemd readiness and watchdog notifications
    #[arg(long)]
    service: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bind allowed local devices whenever the device set settles
    Autobind,
    /// Unbind every local device
    Unbind,
    /// Attach allowed remote devices whenever a server's device set settles
    Autoattach,
    /// Detach every device imported from configured servers
    Detach,
    /// Register a server
    AddServer {
        name: String,
        address: String,
        /// Rules file for this server (default: forbid everything)
        #[arg(long, value_name = "PATH")]
        rules: Option<PathBuf>,
    },
    /// Unregister a server
    RemoveServer { name: String },
    /// Replace a server's rules with the contents of a rules file
    SetRules { name: String, rules: PathBuf },
    /// Print configured servers
    ListServers,
    /// Save default configuration to the default location and exit
    SaveConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::SaveConfig = args.command {
        let path = AutoRedirConfig::default_path();
        AutoRedirConfig::default()
            .save(&path)
            .context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let mut config = if let Some(ref path) = args.config {
        AutoRedirConfig::load(Some(path.clone())).context("Failed to load configuration")?
    } else {
        AutoRedirConfig::load_or_default()
    };
    if let Some(rules) = args.rules {
        config.paths.rules = rules;
    }
    if let Some(servers) = args.servers {
        config.paths.servers = servers;
    }
    config.daemon.service_mode |= args.service;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.daemon.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usbip-autoredir v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Autobind => run_auto(AutoAction::Export, &config).await,
        Command::Autoattach => run_auto(AutoAction::Import, &config).await,
        Command::Unbind => cancel_all(AutoAction::Export, &config).await,
        Command::Detach => cancel_all(AutoAction::Import, &config).await,
        Command::AddServer {
            name,
            address,
            rules,
        } => {
            let rules = rules
                .map(|path| load_rules_file(&path))
                .transpose()
                .context("Failed to read server rules")?;
            let mut registry = open_registry(&config)?;
            registry
                .add_endpoint(&name, &address, rules)
                .await
                .with_context(|| format!("Failed to add server '{}'", name))?;
            println!("Server '{}' ({}) added", name, address);
            Ok(())
        }
        Command::RemoveServer { name } => {
            let mut registry = open_registry(&config)?;
            registry
                .remove_endpoint(&name)
                .with_context(|| format!("Failed to remove server '{}'", name))?;
            println!("Server '{}' removed", name);
            Ok(())
        }
        Command::SetRules { name, rules } => {
            let rules = load_rules_file(&rules).context("Failed to read rules")?;
            let mut registry = open_registry(&config)?;
            registry
                .set_rules(&name, rules)
                .with_context(|| format!("Failed to set rules of server '{}'", name))?;
            println!("Rules of server '{}' updated", name);
            Ok(())
        }
        Command::ListServers => list_servers(&config),
        Command::SaveConfig => Ok(()),
    }
}

fn open_registry(config: &AutoRedirConfig) -> Result<ServerRegistry> {
    let path = config.paths.servers_path();
    let store = RegistryStore::open(&path)
        .with_context(|| format!("Failed to open server list {}", path.display()))?;
    Ok(ServerRegistry::new(store))
}

fn list_servers(config: &AutoRedirConfig) -> Result<()> {
    let path = config.paths.servers_path();
    let mut store = RegistryStore::open(&path)
        .with_context(|| format!("Failed to open server list {}", path.display()))?;
    let endpoints = store.load().context("Failed to read server list")?;

    if endpoints.is_empty() {
        println!("No servers configured.");
        return Ok(());
    }

    println!("{} server(s):\n", endpoints.len());
    for endpoint in endpoints {
        println!("  {} ({})", endpoint.name, endpoint.address);
        for rule in endpoint.rules.iter() {
            println!("      {}", rule);
        }
    }
    Ok(())
}

async fn run_auto(kind: AutoAction, config: &AutoRedirConfig) -> Result<()> {
    let rules = load_rules_or_empty(&config.paths.rules_path());
    let runner = config.usbip.runner().quiet();
    let tools = config.usbip.utilities();
    let settings = config.daemon.engine_settings();

    match kind {
        AutoAction::Export => {
            let action = ExportAction::new(runner, tools);
            run_engine(AutoRedirEngine::new(action, rules, settings), config).await
        }
        AutoAction::Import => {
            let registry = open_registry(config)?;
            let action = ImportAction::new(runner, tools, registry)
                .with_reconcile_interval(config.daemon.reconcile_interval);
            run_engine(AutoRedirEngine::new(action, rules, settings), config).await
        }
    }
}

async fn cancel_all(kind: AutoAction, config: &AutoRedirConfig) -> Result<()> {
    let runner = config.usbip.runner().quiet();
    let tools = config.usbip.utilities();
    let settings = config.daemon.engine_settings();

    let report = match kind {
        AutoAction::Export => {
            let action = ExportAction::new(runner, tools);
            AutoRedirEngine::new(action, Default::default(), settings)
                .cancel_all()
                .await
        }
        AutoAction::Import => {
            let action = ImportAction::new(runner, tools, open_registry(config)?);
            AutoRedirEngine::new(action, Default::default(), settings)
                .cancel_all()
                .await
        }
    }
    .with_context(|| format!("Failed to list devices for {}", kind))?;

    info!(
        "{} device(s) processed, {} succeeded, {} failed",
        report.attempted, report.succeeded, report.failed
    );
    if report.failed > 0 {
        return Err(anyhow!("{} device(s) could not be released", report.failed));
    }
    Ok(())
}

async fn run_engine<A: UsbipAction>(
    mut engine: AutoRedirEngine<A>,
    config: &AutoRedirConfig,
) -> Result<()> {
    let service_mode = config.daemon.service_mode;
    let shutdown = shutdown_signal();

    let watchdog = if service_mode {
        if service::is_systemd() {
            info!("Running under systemd");
        }
        let watchdog = service::spawn_watchdog_task();
        service::notify_ready().context("Failed to notify systemd ready")?;
        service::notify_status(&format!("Running automatic {}", engine.action().name()))
            .context("Failed to send status to systemd")?;
        watchdog
    } else {
        None
    };

    info!("Press Ctrl+C to shutdown");
    engine.run(shutdown).await;

    if service_mode {
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
