//! Daemon configuration management

use crate::action::Utilities;
use crate::engine::EngineSettings;
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutoRedirConfig {
    #[serde(default)]
    pub daemon: DaemonSettings,
    #[serde(default)]
    pub usbip: UsbipSettings,
    #[serde(default)]
    pub paths: PathSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "DaemonSettings::default_log_level")]
    pub log_level: String,
    /// Interval between device set probes
    #[serde(
        default = "DaemonSettings::default_poll_interval",
        with = "common::duration"
    )]
    pub poll_interval: Duration,
    /// Quiet period required after a change before acting
    #[serde(
        default = "DaemonSettings::default_settle_delay",
        with = "common::duration"
    )]
    pub settle_delay: Duration,
    /// Interval between endpoint list reloads (import only)
    #[serde(
        default = "DaemonSettings::default_reconcile_interval",
        with = "common::duration"
    )]
    pub reconcile_interval: Duration,
    /// Send sd-notify readiness and watchdog messages
    #[serde(default)]
    pub service_mode: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            poll_interval: Self::default_poll_interval(),
            settle_delay: Self::default_settle_delay(),
            reconcile_interval: Self::default_reconcile_interval(),
            service_mode: false,
        }
    }
}

impl DaemonSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_poll_interval() -> Duration {
        Duration::from_secs(1)
    }

    fn default_settle_delay() -> Duration {
        Duration::from_secs(2)
    }

    fn default_reconcile_interval() -> Duration {
        crate::action::DEFAULT_RECONCILE_INTERVAL
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: self.poll_interval,
            settle_delay: self.settle_delay,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbipSettings {
    #[serde(default = "UsbipSettings::default_usbip")]
    pub usbip: String,
    #[serde(default = "UsbipSettings::default_lsusb")]
    pub lsusb: String,
    /// Privilege helper prepended to every command, e.g. `["sudo", "-n"]`
    #[serde(default)]
    pub privilege_prefix: Vec<String>,
    /// Kill commands that run longer than this; `"off"` disables the limit
    #[serde(
        default = "UsbipSettings::default_command_timeout",
        with = "common::duration::option"
    )]
    pub command_timeout: Option<Duration>,
}

impl Default for UsbipSettings {
    fn default() -> Self {
        Self {
            usbip: Self::default_usbip(),
            lsusb: Self::default_lsusb(),
            privilege_prefix: Vec::new(),
            command_timeout: Self::default_command_timeout(),
        }
    }
}

impl UsbipSettings {
    fn default_usbip() -> String {
        "usbip".to_string()
    }

    fn default_lsusb() -> String {
        "lsusb".to_string()
    }

    fn default_command_timeout() -> Option<Duration> {
        Some(Duration::from_secs(30))
    }

    pub fn utilities(&self) -> Utilities {
        Utilities {
            usbip: self.usbip.clone(),
            lsusb: self.lsusb.clone(),
        }
    }

    pub fn runner(&self) -> common::SystemRunner {
        common::SystemRunner::new()
            .with_prefix(self.privilege_prefix.iter().cloned())
            .with_timeout(self.command_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Global filter rules file
    #[serde(default = "PathSettings::default_rules")]
    pub rules: PathBuf,
    /// Endpoint list for import
    #[serde(default = "PathSettings::default_servers")]
    pub servers: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            rules: Self::default_rules(),
            servers: Self::default_servers(),
        }
    }
}

impl PathSettings {
    fn default_rules() -> PathBuf {
        AutoRedirConfig::config_dir().join("filter.rules")
    }

    fn default_servers() -> PathBuf {
        AutoRedirConfig::config_dir().join("servers.toml")
    }

    /// Rules path with `~` expanded
    pub fn rules_path(&self) -> PathBuf {
        expand(&self.rules)
    }

    /// Servers path with `~` expanded
    pub fn servers_path(&self) -> PathBuf {
        expand(&self.servers)
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

impl AutoRedirConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            expand(&p)
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-autoredir/autoredir.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: AutoRedirConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("usbip-autoredir"))
            .unwrap_or_else(|| PathBuf::from(".config/usbip-autoredir"))
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("autoredir.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.daemon.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.daemon.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.daemon.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval must be greater than 0"));
        }
        if self.daemon.reconcile_interval.is_zero() {
            return Err(anyhow!("reconcile_interval must be greater than 0"));
        }

        if self.usbip.usbip.trim().is_empty() || self.usbip.lsusb.trim().is_empty() {
            return Err(anyhow!("Utility paths must not be empty"));
        }

        Ok(())
    }
}
