//! Auto-redirection engine
//!
//! One engine drives one action variant. Each tick probes for a changed
//! device set, and once the change has settled it lists the devices, filters
//! them with the global rules and enables every allowed device.

use crate::action::{ActionError, UsbipAction};
use crate::debounce::Debouncer;
use common::{RuleList, filter_devices};
use protocol::UsbDevice;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub settle_delay: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(2),
        }
    }
}

/// Result of one action pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing changed and nothing is pending
    Quiet,
    /// A change was seen; waiting for it to settle
    Settling,
    /// The settle timer fired and an action pass ran
    Dispatched(DispatchReport),
}

pub struct AutoRedirEngine<A> {
    action: A,
    rules: RuleList,
    debouncer: Debouncer,
    poll_interval: Duration,
    empty_rules_reported: bool,
}

impl<A: UsbipAction> AutoRedirEngine<A> {
    pub fn new(action: A, rules: RuleList, settings: EngineSettings) -> Self {
        Self {
            action,
            rules,
            debouncer: Debouncer::new(settings.settle_delay),
            poll_interval: settings.poll_interval,
            empty_rules_reported: false,
        }
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn action_mut(&mut self) -> &mut A {
        &mut self.action
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn set_rules(&mut self, rules: RuleList) {
        self.rules = rules;
        self.empty_rules_reported = false;
    }

    /// One poll step
    pub async fn tick(&mut self) -> TickOutcome {
        match self.action.device_set_changed().await {
            Ok(true) => self.debouncer.observe_change(Instant::now()),
            Ok(false) => {}
            Err(e) => warn!("Failed to probe {} device set: {}", self.action.name(), e),
        }

        if !self.debouncer.fire(Instant::now()) {
            return if self.debouncer.is_pending() {
                TickOutcome::Settling
            } else {
                TickOutcome::Quiet
            };
        }

        let devices = match self.action.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                // Retry once another settle window has passed
                error!("Failed to list devices for {}: {}", self.action.name(), e);
                self.debouncer.observe_change(Instant::now());
                return TickOutcome::Settling;
            }
        };
        info!("Device list changed:\n{}", format_devices(&devices));

        if self.rules.is_empty() {
            if !self.empty_rules_reported {
                warn!(
                    "No filter rules configured, automatic {} is disabled",
                    self.action.action_verb(true)
                );
                self.empty_rules_reported = true;
            }
            return TickOutcome::Dispatched(DispatchReport::default());
        }

        let allowed = filter_devices(devices, &self.rules);
        debug!("Filtered device list:\n{}", format_devices(&allowed));

        TickOutcome::Dispatched(self.dispatch(&allowed, true).await)
    }

    /// Disable every listed device, continuing past failures
    pub async fn cancel_all(&mut self) -> Result<DispatchReport, ActionError> {
        // Populates the listing snapshots the full listing is derived from
        self.action.device_set_changed().await?;
        let devices = self.action.list_devices().await?;
        Ok(self.dispatch(&devices, false).await)
    }

    /// Tick until `shutdown` turns true (or its sender is dropped)
    ///
    /// A tick in progress always completes before this returns.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Automatic {} started", self.action.name());

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Automatic {} stopped", self.action.name());
    }

    async fn dispatch(&mut self, devices: &[UsbDevice], enable: bool) -> DispatchReport {
        let mut report = DispatchReport::default();
        let verb = self.action.action_verb(enable);

        for device in devices {
            report.attempted += 1;
            match self.action.perform_action(device.id, enable).await {
                Ok(()) => {
                    report.succeeded += 1;
                    debug!("{} {} succeeded", verb, device);
                }
                Err(e) => {
                    report.failed += 1;
                    error!("Failed to {} device {}: {}", verb, device, e);
                }
            }
        }

        report
    }
}

fn format_devices(devices: &[UsbDevice]) -> String {
    if devices.is_empty() {
        return "  (none)".to_string();
    }
    devices
        .iter()
        .map(|d| format!("  {}", d))
        .collect::<Vec<_>>()
        .join("\n")
}
