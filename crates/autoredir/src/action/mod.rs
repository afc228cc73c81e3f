//! Redirection actions
//!
//! An action knows how to enumerate devices and how to enable or disable
//! redirection for one of them. Two variants exist: [`ExportAction`] binds
//! local devices so remote hosts can import them, and [`ImportAction`]
//! attaches devices exported by the endpoints of a [`ServerRegistry`].
//!
//! [`ServerRegistry`]: crate::registry::ServerRegistry

mod export;
mod import;

pub use export::ExportAction;
pub use import::{DEFAULT_RECONCILE_INTERVAL, ImportAction};

use common::{CommandError, CommandOutput};
use protocol::{DeviceId, UsbDevice};
use std::fmt;
use std::future::Future;
use thiserror::Error;

/// Diagnostic printed by `usbip bind` for a device that is already bound
pub const ALREADY_BOUND: &str = "already bound";

/// Diagnostic printed by `usbip attach` for a device that is already attached
pub const ALREADY_ATTACHED: &str = "already attached";

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("'{command}' failed ({status:?}): {diagnostics}")]
    Failed {
        command: String,
        status: Option<i32>,
        diagnostics: String,
    },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Endpoint '{0}' is unavailable")]
    Unavailable(String),
}

impl ActionError {
    pub(crate) fn failed(command: String, output: &CommandOutput) -> Self {
        let diagnostics = if output.stderr.is_empty() {
            output.stdout.clone()
        } else {
            output.stderr.clone()
        };
        Self::Failed {
            command,
            status: output.status,
            diagnostics,
        }
    }
}

/// Paths of the external utilities an action drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utilities {
    pub usbip: String,
    pub lsusb: String,
}

impl Default for Utilities {
    fn default() -> Self {
        Self {
            usbip: "usbip".to_string(),
            lsusb: "lsusb".to_string(),
        }
    }
}

/// Which action variant to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAction {
    Export,
    Import,
}

impl fmt::Display for AutoAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Export => f.write_str("export"),
            Self::Import => f.write_str("import"),
        }
    }
}

/// Device enumeration plus idempotent enable/disable
pub trait UsbipAction: Send {
    /// Display label
    fn name(&self) -> &'static str;

    /// Control utility verb for enabling or disabling
    fn action_verb(&self, enable: bool) -> &'static str;

    /// Cheap probe re-reading a fingerprint of the device listing
    ///
    /// Returns true when the fingerprint differs from the previous probe.
    fn device_set_changed(&mut self) -> impl Future<Output = Result<bool, ActionError>> + Send;

    /// Authoritative device listing
    ///
    /// Ids are assigned afresh on every call; a later [`perform_action`]
    /// refers to ids from the most recent listing.
    ///
    /// [`perform_action`]: UsbipAction::perform_action
    fn list_devices(&mut self) -> impl Future<Output = Result<Vec<UsbDevice>, ActionError>> + Send;

    /// Enable or disable redirection of one device
    ///
    /// Enabling an already enabled device succeeds.
    fn perform_action(
        &mut self,
        id: DeviceId,
        enable: bool,
    ) -> impl Future<Output = Result<(), ActionError>> + Send;
}
