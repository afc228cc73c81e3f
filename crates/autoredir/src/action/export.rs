//! Local export: bind devices to the USB/IP host driver

use super::{ALREADY_BOUND, ActionError, UsbipAction, Utilities};
use common::{CommandRunner, command_line};
use protocol::{
    DeviceId, UsbDevice, merge_local_snapshot, parse_interface_classes, parse_local_listing,
    parse_lsusb_names,
};
use tracing::{debug, info, warn};

pub struct ExportAction<R> {
    runner: R,
    tools: Utilities,
    fingerprint: Option<String>,
    devices: Vec<UsbDevice>,
}

impl<R: CommandRunner> ExportAction<R> {
    pub fn new(runner: R, tools: Utilities) -> Self {
        Self {
            runner,
            tools,
            fingerprint: None,
            devices: Vec::new(),
        }
    }

    /// Devices from the most recent listing
    pub fn devices(&self) -> &[UsbDevice] {
        &self.devices
    }
}

impl<R: CommandRunner> UsbipAction for ExportAction<R> {
    fn name(&self) -> &'static str {
        "export"
    }

    fn action_verb(&self, enable: bool) -> &'static str {
        if enable { "bind" } else { "unbind" }
    }

    async fn device_set_changed(&mut self) -> Result<bool, ActionError> {
        let output = self.runner.run(&self.tools.lsusb, &[]).await?;
        if !output.success() {
            return Err(ActionError::failed(self.tools.lsusb.clone(), &output));
        }

        if self.fingerprint.as_deref() == Some(output.stdout.as_str()) {
            return Ok(false);
        }
        debug!("Local device fingerprint changed");
        self.fingerprint = Some(output.stdout);
        Ok(true)
    }

    async fn list_devices(&mut self) -> Result<Vec<UsbDevice>, ActionError> {
        let args = ["list", "-l"];
        let listing = self.runner.run(&self.tools.usbip, &args).await?;
        if !listing.success() {
            return Err(ActionError::failed(
                command_line(&self.tools.usbip, &args),
                &listing,
            ));
        }
        let entries = parse_local_listing(&listing.stdout);

        let names = match self.runner.run(&self.tools.lsusb, &[]).await {
            Ok(output) if output.success() => parse_lsusb_names(&output.stdout),
            Ok(_) | Err(_) => {
                warn!("Could not read device names from {}", self.tools.lsusb);
                Default::default()
            }
        };

        let mut classes = Vec::with_capacity(entries.len());
        for entry in &entries {
            let selector = format!("{}:{}", entry.vendor_id, entry.product_id);
            // lsusb -v exits nonzero when some descriptors are unreadable but still prints the rest
            let found = match self
                .runner
                .run(&self.tools.lsusb, &["-v", "-d", selector.as_str()])
                .await
            {
                Ok(verbose) => parse_interface_classes(&verbose.stdout),
                Err(e) => {
                    warn!("Could not read interface classes of {}: {}", selector, e);
                    Default::default()
                }
            };
            classes.push(found);
        }

        self.devices = merge_local_snapshot(&entries, &names, &classes);
        Ok(self.devices.clone())
    }

    async fn perform_action(&mut self, id: DeviceId, enable: bool) -> Result<(), ActionError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.id == id)
            .ok_or_else(|| ActionError::NotFound(format!("Device {}", id)))?;

        let verb = self.action_verb(enable);
        let args = [verb, "-b", device.bus_id.as_str()];
        let output = self.runner.run(&self.tools.usbip, &args).await?;

        if output.success() {
            info!("Device {} {}", device, if enable { "bound" } else { "unbound" });
            Ok(())
        } else if enable && output.diagnostics_contain(ALREADY_BOUND) {
            debug!("Device {} already bound", device);
            Ok(())
        } else {
            Err(ActionError::failed(
                command_line(&self.tools.usbip, &args),
                &output,
            ))
        }
    }
}
