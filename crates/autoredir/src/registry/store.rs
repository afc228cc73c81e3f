//! On-disk endpoint list
//!
//! ```toml
//! [main]
//! servers = ["lab", "office"]
//!
//! [endpoints.lab]
//! address = "10.0.0.5"
//! rules = ["+ hid", "- *"]
//! ```
//!
//! Only names listed in `main.servers` are configured. Entries that are
//! missing or malformed are skipped individually.

use super::{DEFAULT_ENDPOINT_RULES, EndpointConfig};
use common::{RuleList, parse_rules};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize endpoint list: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    main: MainSection,
    #[serde(default)]
    endpoints: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MainSection {
    #[serde(default)]
    servers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EndpointRecord {
    address: String,
    #[serde(default = "default_rule_lines")]
    rules: Vec<String>,
}

fn default_rule_lines() -> Vec<String> {
    DEFAULT_ENDPOINT_RULES.iter().map(|s| s.to_string()).collect()
}

/// Endpoint list persisted as TOML
#[derive(Debug)]
pub struct RegistryStore {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl RegistryStore {
    /// Open the store, creating an empty document when the file is missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let mut store = Self {
            path: path.into(),
            last_modified: None,
        };

        if !store.path.exists() {
            if let Some(parent) = store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            store.write_document(&Document::default())?;
            info!("Created endpoint list {}", store.path.display());
            // Force the first load_if_changed to read the new file
            store.last_modified = None;
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all configured endpoints
    pub fn load(&mut self) -> Result<Vec<EndpointConfig>, StoreError> {
        let modified = self.modified_time()?;
        let content = fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let document: Document = toml::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        self.last_modified = modified;

        let mut endpoints = Vec::with_capacity(document.main.servers.len());
        for name in &document.main.servers {
            let Some(value) = document.endpoints.get(name) else {
                warn!("Endpoint '{}' is listed but has no [endpoints.{}] table", name, name);
                continue;
            };
            match value.clone().try_into::<EndpointRecord>() {
                Ok(record) => endpoints.push(EndpointConfig {
                    name: name.clone(),
                    address: record.address,
                    rules: parse_rules(&record.rules),
                }),
                Err(e) => warn!("Skipping malformed endpoint '{}': {}", name, e),
            }
        }

        debug!(
            "Loaded {} endpoint(s) from {}",
            endpoints.len(),
            self.path.display()
        );
        Ok(endpoints)
    }

    /// Like [`load`](Self::load), but `None` when the file is unchanged since the last read
    pub fn load_if_changed(&mut self) -> Result<Option<Vec<EndpointConfig>>, StoreError> {
        let modified = self.modified_time()?;
        if modified.is_some() && modified == self.last_modified {
            return Ok(None);
        }
        self.load().map(Some)
    }

    /// Replace the stored endpoint list
    pub fn save(&mut self, endpoints: &[EndpointConfig]) -> Result<(), StoreError> {
        let mut document = Document::default();
        for endpoint in endpoints {
            document.main.servers.push(endpoint.name.clone());
            let record = EndpointRecord {
                address: endpoint.address.clone(),
                rules: endpoint.rules.to_lines(),
            };
            document
                .endpoints
                .insert(endpoint.name.clone(), toml::Value::try_from(record)?);
        }

        self.write_document(&document)?;
        self.last_modified = self.modified_time()?;
        Ok(())
    }

    /// Serialize, write a sibling temporary file, fsync, rename over the target
    fn write_document(&self, document: &Document) -> Result<(), StoreError> {
        let content = toml::to_string_pretty(document)?;
        let tmp_path = self.tmp_path();
        let io_err = |source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        };

        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(content.as_bytes()).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);

        fs::rename(&tmp_path, &self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "servers".to_string());
        self.path.with_file_name(format!(".{}.tmp", file_name))
    }

    fn modified_time(&self) -> Result<Option<SystemTime>, StoreError> {
        let metadata = fs::metadata(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(metadata.modified().ok())
    }
}

/// Rules installed on an endpoint that was configured without any
pub fn default_endpoint_rules() -> RuleList {
    parse_rules(DEFAULT_ENDPOINT_RULES)
}
