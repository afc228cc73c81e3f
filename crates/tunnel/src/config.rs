//! TLS proxy configuration management

use anyhow::{Context, Result, anyhow};
use protocol::{PROXY_PORT, USBIP_PORT};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelConfig {
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub tls: TlsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Address the local relay accepts USB/IP clients on
    #[serde(default = "ProxySettings::default_listen")]
    pub listen: SocketAddr,
    /// Port of the remote USB/IP daemon behind TLS
    #[serde(default = "ProxySettings::default_control_port")]
    pub control_port: u16,
    #[serde(default = "ProxySettings::default_log_level")]
    pub log_level: String,
    /// Send sd-notify readiness and watchdog messages
    #[serde(default)]
    pub service_mode: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            control_port: Self::default_control_port(),
            log_level: Self::default_log_level(),
            service_mode: false,
        }
    }
}

impl ProxySettings {
    fn default_listen() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, PROXY_PORT))
    }

    fn default_control_port() -> u16 {
        USBIP_PORT
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSettings {
    /// Extra PEM bundle of trusted CAs, e.g. a private CA signing the servers
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    /// Trust the operating system's root store
    #[serde(default = "TlsSettings::default_native_roots")]
    pub native_roots: bool,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            ca_file: None,
            native_roots: Self::default_native_roots(),
        }
    }
}

impl TlsSettings {
    fn default_native_roots() -> bool {
        true
    }

    /// CA file path with `~` expanded
    pub fn ca_file_path(&self) -> Option<PathBuf> {
        self.ca_file
            .as_deref()
            .map(|p| PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()))
    }
}

impl TunnelConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref())
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usbip-autoredir/tls-proxy.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: TunnelConfig = toml::from_str(&content)
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

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("usbip-autoredir"))
            .unwrap_or_else(|| PathBuf::from(".config/usbip-autoredir"))
            .join("tls-proxy.toml")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.proxy.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.proxy.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        if self.proxy.control_port == 0 {
            return Err(anyhow!("control_port must be greater than 0"));
        }

        if !self.tls.native_roots && self.tls.ca_file.is_none() {
            return Err(anyhow!(
                "No trust anchors: enable native_roots or set ca_file"
            ));
        }

        Ok(())
    }
}
