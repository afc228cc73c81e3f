//! Remote import: attach devices exported by registry endpoints

use super::{ALREADY_ATTACHED, ActionError, UsbipAction, Utilities};
use crate::registry::ServerRegistry;
use common::{CommandRunner, command_line, filter_devices};
use futures_util::future::join_all;
use protocol::{DeviceId, UsbDevice, find_port, parse_port_table, parse_remote_listing};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default interval between endpoint list reloads
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

pub struct ImportAction<R> {
    runner: R,
    tools: Utilities,
    registry: ServerRegistry,
    reconcile_interval: Duration,
    last_reconcile: Option<Instant>,
}

impl<R: CommandRunner> ImportAction<R> {
    pub fn new(runner: R, tools: Utilities, registry: ServerRegistry) -> Self {
        Self {
            runner,
            tools,
            registry,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            last_reconcile: None,
        }
    }

    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ServerRegistry {
        &mut self.registry
    }

    /// Reload the endpoint list when the reconcile interval elapsed
    ///
    /// Returns true when endpoints were added, removed or updated.
    fn maybe_reconcile(&mut self) -> bool {
        let now = Instant::now();
        let due = self
            .last_reconcile
            .is_none_or(|last| now.duration_since(last) >= self.reconcile_interval);
        if !due {
            return false;
        }
        self.last_reconcile = Some(now);
        self.registry
            .refresh()
            .is_some_and(|summary| !summary.is_empty())
    }

    async fn attach(&self, address: &str, device: &UsbDevice) -> Result<(), ActionError> {
        let args = ["attach", "-r", address, "-b", device.bus_id.as_str()];
        let output = self.runner.run(&self.tools.usbip, &args).await?;

        if output.success() {
            info!("Device {} from {} attached", device, address);
            Ok(())
        } else if output.diagnostics_contain(ALREADY_ATTACHED) {
            debug!("Device {} from {} already attached", device, address);
            Ok(())
        } else {
            Err(ActionError::failed(
                command_line(&self.tools.usbip, &args),
                &output,
            ))
        }
    }

    /// Detach by virtual port, found through the live port table
    async fn detach(&self, address: &str, device: &UsbDevice) -> Result<(), ActionError> {
        let output = self.runner.run(&self.tools.usbip, &["port"]).await?;
        if !output.success() {
            return Err(ActionError::failed(
                command_line(&self.tools.usbip, &["port"]),
                &output,
            ));
        }

        let table = parse_port_table(&output.stdout);
        let entry = find_port(&table, &device.bus_id, Some(address)).ok_or_else(|| {
            ActionError::NotFound(format!("Bus id {} in the port table", device.bus_id))
        })?;

        let verb = self.action_verb(false);
        let args = [verb, "-p", entry.port.as_str()];
        let output = self.runner.run(&self.tools.usbip, &args).await?;
        if output.success() {
            info!(
                "Device {} from {} detached from port {}",
                device, address, entry.port
            );
            Ok(())
        } else {
            Err(ActionError::failed(
                command_line(&self.tools.usbip, &args),
                &output,
            ))
        }
    }
}

impl<R: CommandRunner> UsbipAction for ImportAction<R> {
    fn name(&self) -> &'static str {
        "import"
    }

    fn action_verb(&self, enable: bool) -> &'static str {
        if enable { "attach" } else { "detach" }
    }

    async fn device_set_changed(&mut self) -> Result<bool, ActionError> {
        let mut changed = self.maybe_reconcile();

        // Listings run concurrently; results come back in registry order
        let addresses: Vec<String> = self
            .registry
            .endpoints()
            .map(|endpoint| endpoint.address.clone())
            .collect();
        let runner = &self.runner;
        let usbip = self.tools.usbip.as_str();
        let results = join_all(addresses.iter().map(|address| async move {
            runner.run(usbip, &["list", "-r", address.as_str()]).await
        }))
        .await;

        for (endpoint, result) in self.registry.endpoints_mut().zip(results) {
            let listing = match result {
                Ok(output) if output.success() => {
                    if !endpoint.available {
                        info!("Endpoint '{}' is available again", endpoint.name);
                    }
                    endpoint.available = true;
                    output.stdout
                }
                Ok(_) | Err(_) => {
                    if endpoint.available {
                        warn!(
                            "Endpoint '{}' ({}) is unavailable",
                            endpoint.name, endpoint.address
                        );
                    }
                    endpoint.available = false;
                    String::new()
                }
            };

            if endpoint.last_snapshot != listing {
                debug!("Device listing of '{}' changed", endpoint.name);
                endpoint.last_snapshot = listing;
                changed = true;
            }
        }

        Ok(changed)
    }

    async fn list_devices(&mut self) -> Result<Vec<UsbDevice>, ActionError> {
        let mut next_id = 0u32;
        let mut all = Vec::new();

        for endpoint in self.registry.endpoints_mut() {
            let parsed = parse_remote_listing(&endpoint.last_snapshot, next_id);
            next_id += parsed.len() as u32;

            endpoint.devices = filter_devices(parsed, &endpoint.rules);
            all.extend(endpoint.devices.iter().cloned());
        }

        Ok(all)
    }

    async fn perform_action(&mut self, id: DeviceId, enable: bool) -> Result<(), ActionError> {
        let (endpoint, device) = self
            .registry
            .owner_of(id)
            .ok_or_else(|| ActionError::NotFound(format!("Device {}", id)))?;

        if enable {
            if !endpoint.available {
                return Err(ActionError::Unavailable(endpoint.name.clone()));
            }
            self.attach(&endpoint.address, device).await
        } else {
            self.detach(&endpoint.address, device).await
        }
    }
}
