//! Remote endpoint registry
//!
//! Tracks the hosts devices are imported from. The configured list lives in a
//! [`RegistryStore`]; the registry keeps runtime state per endpoint (last
//! listing, availability, device cache) and reconciles it against the store.
//! Reconciliation updates surviving endpoints in place so their cached state
//! outlives unrelated edits.

mod store;

pub use store::{RegistryStore, StoreError, default_endpoint_rules};

use common::RuleList;
use protocol::{DeviceId, USBIP_PORT, UsbDevice};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Rules a new endpoint receives when none are given: deny everything
pub const DEFAULT_ENDPOINT_RULES: &[&str] = &["- *"];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("An endpoint named '{0}' already exists")]
    DuplicateName(String),

    #[error("Address '{0}' is already used by another endpoint")]
    DuplicateAddress(String),

    #[error("Invalid address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Endpoint '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// An endpoint as configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    pub name: String,
    pub address: String,
    pub rules: RuleList,
}

/// A configured endpoint plus its runtime state
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub name: String,
    pub address: String,
    pub rules: RuleList,
    /// False after the last listing attempt failed
    pub available: bool,
    /// Raw output of the last `usbip list -r`, used as a change fingerprint
    pub last_snapshot: String,
    /// Allowed devices from the last full listing
    pub devices: Vec<UsbDevice>,
}

impl ServerEndpoint {
    fn from_config(config: EndpointConfig) -> Self {
        Self {
            name: config.name,
            address: config.address,
            rules: config.rules,
            available: true,
            last_snapshot: String::new(),
            devices: Vec::new(),
        }
    }

    /// Does this endpoint's device cache cover `id`
    pub fn owns(&self, id: DeviceId) -> bool {
        match (self.devices.first(), self.devices.last()) {
            (Some(first), Some(last)) => first.id <= id && id <= last.id,
            _ => false,
        }
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub updated: Vec<String>,
}

impl ReconcileSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

pub struct ServerRegistry {
    store: RegistryStore,
    endpoints: BTreeMap<String, ServerEndpoint>,
}

impl ServerRegistry {
    /// Empty registry backed by `store`; call [`refresh`](Self::refresh) to load it
    pub fn new(store: RegistryStore) -> Self {
        Self {
            store,
            endpoints: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Endpoints in name order
    pub fn endpoints(&self) -> impl Iterator<Item = &ServerEndpoint> {
        self.endpoints.values()
    }

    pub fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut ServerEndpoint> {
        self.endpoints.values_mut()
    }

    pub fn endpoint(&self, name: &str) -> Option<&ServerEndpoint> {
        self.endpoints.get(name)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Endpoint whose device cache covers `id`, and the device itself
    pub fn owner_of(&self, id: DeviceId) -> Option<(&ServerEndpoint, &UsbDevice)> {
        self.endpoints
            .values()
            .filter(|endpoint| endpoint.owns(id))
            .find_map(|endpoint| {
                endpoint
                    .devices
                    .iter()
                    .find(|d| d.id == id)
                    .map(|device| (endpoint, device))
            })
    }

    /// Reload the store if it changed on disk and reconcile
    ///
    /// A store that cannot be read leaves the registry untouched.
    pub fn refresh(&mut self) -> Option<ReconcileSummary> {
        match self.store.load_if_changed() {
            Ok(Some(configured)) => Some(self.reconcile(configured)),
            Ok(None) => None,
            Err(e) => {
                warn!("{}, keeping current endpoints", e);
                None
            }
        }
    }

    /// Bring runtime endpoints in line with `configured`
    pub fn reconcile(&mut self, configured: Vec<EndpointConfig>) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();
        let mut configured: BTreeMap<String, EndpointConfig> = configured
            .into_iter()
            .map(|config| (config.name.clone(), config))
            .collect();

        self.endpoints.retain(|name, _| {
            let keep = configured.contains_key(name);
            if !keep {
                summary.removed.push(name.clone());
            }
            keep
        });

        for (name, endpoint) in self.endpoints.iter_mut() {
            let Some(config) = configured.remove(name) else {
                continue;
            };
            if endpoint.address != config.address || endpoint.rules != config.rules {
                endpoint.address = config.address;
                endpoint.rules = config.rules;
                summary.updated.push(name.clone());
            }
        }

        for (name, config) in configured {
            summary.added.push(name.clone());
            self.endpoints.insert(name, ServerEndpoint::from_config(config));
        }

        if summary.is_empty() {
            debug!("Endpoint registry unchanged");
        } else {
            info!(
                "Endpoint registry reconciled: added {:?}, removed {:?}, updated {:?}",
                summary.added, summary.removed, summary.updated
            );
        }
        summary
    }

    /// Persist a new endpoint and reconcile
    ///
    /// `rules` defaults to [`DEFAULT_ENDPOINT_RULES`].
    pub async fn add_endpoint(
        &mut self,
        name: &str,
        address: &str,
        rules: Option<RuleList>,
    ) -> Result<ReconcileSummary, RegistryError> {
        let mut configured = self.store.load()?;

        if configured.iter().any(|e| e.name == name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        if configured.iter().any(|e| e.address == address) {
            return Err(RegistryError::DuplicateAddress(address.to_string()));
        }
        validate_address(address).await?;

        configured.push(EndpointConfig {
            name: name.to_string(),
            address: address.to_string(),
            rules: rules.unwrap_or_else(default_endpoint_rules),
        });
        self.persist_and_reconcile(configured)
    }

    /// Persist removal of an endpoint and reconcile
    pub fn remove_endpoint(&mut self, name: &str) -> Result<ReconcileSummary, RegistryError> {
        let mut configured = self.store.load()?;
        let before = configured.len();
        configured.retain(|e| e.name != name);
        if configured.len() == before {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        self.persist_and_reconcile(configured)
    }

    /// Persist new rules for an endpoint and reconcile
    pub fn set_rules(
        &mut self,
        name: &str,
        rules: RuleList,
    ) -> Result<ReconcileSummary, RegistryError> {
        let mut configured = self.store.load()?;
        let endpoint = configured
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?;
        endpoint.rules = rules;
        self.persist_and_reconcile(configured)
    }

    fn persist_and_reconcile(
        &mut self,
        configured: Vec<EndpointConfig>,
    ) -> Result<ReconcileSummary, RegistryError> {
        self.store.save(&configured)?;
        Ok(self.reconcile(configured))
    }
}

/// The address must be a single non-empty token that resolves
async fn validate_address(address: &str) -> Result<(), RegistryError> {
    let invalid = |reason: String| RegistryError::InvalidAddress {
        address: address.to_string(),
        reason,
    };

    if address.is_empty() {
        return Err(invalid("address is empty".to_string()));
    }
    if address.chars().any(char::is_whitespace) {
        return Err(invalid("address contains whitespace".to_string()));
    }

    let mut resolved = tokio::net::lookup_host((address, USBIP_PORT))
        .await
        .map_err(|e| invalid(e.to_string()))?;
    if resolved.next().is_none() {
        return Err(invalid("address did not resolve".to_string()));
    }
    Ok(())
}
