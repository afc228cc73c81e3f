//! Test utilities for usbip-autoredir
//!
//! Provides a scripted command runner and device builders for testing across
//! crates. Enabled by the `test-utils` feature.
//!
//! # Example
//!
//! ```ignore
//! use common::test_utils::{ScriptedRunner, create_mock_device};
//! use common::CommandOutput;
//!
//! let runner = ScriptedRunner::new();
//! runner.reply("usbip bind -b 1-1", CommandOutput::ok("bound"));
//!
//! let device = create_mock_device(0, "1-1", "1050", "0407");
//! assert_eq!(device.vid_pid(), "1050:0407");
//! ```

use crate::command::{CommandOutput, CommandRunner, command_line};
use crate::error::CommandError;
use protocol::{DeviceId, UsbClass, UsbDevice};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code returned for commands with no scripted reply
pub const UNSCRIPTED_EXIT_CODE: i32 = 127;

#[derive(Debug, Default)]
struct Script {
    replies: HashMap<String, VecDeque<CommandOutput>>,
    calls: Vec<String>,
}

/// Command runner that replies from a table of canned outputs
///
/// Replies are keyed by the full command line. Several replies queued for the
/// same command are handed out in order; the last one then repeats. Clones
/// share state, so a test can keep a handle after moving the runner into the
/// code under test.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    script: Arc<Mutex<Script>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `command`
    pub fn reply(&self, command: &str, output: CommandOutput) -> &Self {
        self.lock()
            .replies
            .entry(command.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Drop all queued replies for `command`, then queue `output`
    pub fn replace(&self, command: &str, output: CommandOutput) -> &Self {
        self.lock()
            .replies
            .insert(command.to_string(), VecDeque::from([output]));
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of calls whose command line starts with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let line = command_line(program, args);
        let mut script = self.lock();
        script.calls.push(line.clone());

        let output = match script.replies.get_mut(&line) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };

        Ok(output.unwrap_or_else(|| {
            CommandOutput::failed(UNSCRIPTED_EXIT_CODE, format!("no scripted reply for '{line}'"))
        }))
    }
}

/// Create a mock UsbDevice with no interface classes
///
/// # Example
/// ```ignore
/// use common::test_utils::create_mock_device;
///
/// let device = create_mock_device(2, "1-1.4", "046d", "c52b");
/// assert_eq!(device.id.0, 2);
/// assert!(device.classes.is_empty());
/// ```
pub fn create_mock_device(id: u32, bus_id: &str, vendor_id: &str, product_id: &str) -> UsbDevice {
    UsbDevice {
        id: DeviceId(id),
        bus_id: bus_id.to_string(),
        vendor_id: vendor_id.to_string(),
        product_id: product_id.to_string(),
        name: format!("Test Device {}", id),
        classes: Default::default(),
    }
}

/// Create a mock UsbDevice carrying the given interface classes
pub fn create_mock_device_with_classes(
    id: u32,
    bus_id: &str,
    vendor_id: &str,
    product_id: &str,
    classes: &[UsbClass],
) -> UsbDevice {
    UsbDevice {
        classes: classes.iter().copied().collect(),
        ..create_mock_device(id, bus_id, vendor_id, product_id)
    }
}

pub fn create_mock_hid_device(id: u32, bus_id: &str) -> UsbDevice {
    create_mock_device_with_classes(id, bus_id, "046d", "c52b", &[UsbClass::Hid])
}

pub fn create_mock_mass_storage_device(id: u32, bus_id: &str) -> UsbDevice {
    create_mock_device_with_classes(id, bus_id, "0781", "5581", &[UsbClass::Msc])
}

/// Run a future with a timeout
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
