//! Import Action Integration Tests
//!
//! Tests the remote import variant against a two-endpoint registry:
//! - Contiguous ids across endpoints and per-endpoint rules
//! - Attach through the owning endpoint's address
//! - Reverse port lookup for detach by remote bus id
//! - Concurrent endpoint probes
//! - Endpoint availability tracking
//! - Registry reloads picked up by the change probe
//!
//! Run with: `cargo test -p autoredir --test import_action_tests`

use autoredir::{
    ActionError, EndpointConfig, ImportAction, RegistryStore, ServerRegistry, UsbipAction,
    Utilities,
};
use common::test_utils::ScriptedRunner;
use common::{CommandOutput, parse_rules};
use protocol::{DeviceId, UsbClass};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const LAB_LISTING: &str = "\
Exportable USB devices
======================
 - 10.0.0.1
        1-1: Logitech, Inc. : Unifying Receiver (046d:c52b)
           : /sys/devices/pci0000:00/0000:00:14.0/usb1/1-1
           : (Defined at Interface level) (00/00/00)
           :  0 - Human Interface Device / Keyboard / Boot Interface Subclass (03/01/01)
        1-2: SanDisk Corp. : Ultra (0781:5581)
           : /sys/devices/pci0000:00/0000:00:14.0/usb1/1-2
           : (Defined at Interface level) (00/00/00)
           :  0 - Mass Storage / SCSI / Bulk-Only (08/06/50)
";

const OFFICE_LISTING: &str = "\
Exportable USB devices
======================
 - 10.0.0.2
        2-1: Yubico.com : Yubikey 4/5 OTP+U2F+CCID (1050:0407)
           : /sys/devices/pci0000:00/0000:00:14.0/usb2/2-1
           : (Defined at Interface level) (00/00/00)
           :  0 - Human Interface Device / Boot Interface Subclass / Keyboard (03/01/01)
           :  2 - Chip/SmartCard / unknown subclass / unknown protocol (0b/00/00)
        2-2: SanDisk Corp. : Cruzer (0781:5567)
           : /sys/devices/pci0000:00/0000:00:14.0/usb2/2-2
           : (Defined at Interface level) (00/00/00)
           :  0 - Mass Storage / SCSI / Bulk-Only (08/06/50)
";

const PORT_TABLE: &str = "\
Imported USB devices
====================
Port 00: <Port in Use> at Full Speed(12Mbps)
       Logitech, Inc. : Unifying Receiver (046d:c52b)
       3-1 -> usbip://10.0.0.1:3240/1-1
           -> remote bus/dev 001/002
Port 01: <Port in Use> at High Speed(480Mbps)
       Yubico.com : Yubikey 4/5 OTP+U2F+CCID (1050:0407)
       3-2 -> usbip://10.0.0.2:3240/2-1
           -> remote bus/dev 002/002
";

fn endpoint(name: &str, address: &str, rules: &[&str]) -> EndpointConfig {
    EndpointConfig {
        name: name.to_string(),
        address: address.to_string(),
        rules: parse_rules(rules),
    }
}

fn setup() -> (TempDir, ScriptedRunner, ImportAction<ScriptedRunner>) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("servers.toml");
    let mut store = RegistryStore::open(&path).unwrap();
    store
        .save(&[
            endpoint("lab", "10.0.0.1", &["+ *"]),
            endpoint("office", "10.0.0.2", &["+ smart card", "- *"]),
        ])
        .unwrap();

    let runner = ScriptedRunner::new();
    runner
        .reply("usbip list -r 10.0.0.1", CommandOutput::ok(LAB_LISTING))
        .reply("usbip list -r 10.0.0.2", CommandOutput::ok(OFFICE_LISTING))
        .reply("usbip port", CommandOutput::ok(PORT_TABLE));

    let registry = ServerRegistry::new(RegistryStore::open(&path).unwrap());
    let action = ImportAction::new(runner.clone(), Utilities::default(), registry);
    (dir, runner, action)
}

mod listing {
    use super::*;

    #[tokio::test]
    async fn test_ids_contiguous_across_endpoints() {
        let (_dir, _runner, mut action) = setup();

        assert!(action.device_set_changed().await.unwrap());
        let devices = action.list_devices().await.unwrap();

        // lab: 0, 1 (all allowed); office: 2 allowed (smart card), 3 filtered out
        let ids: Vec<u32> = devices.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert!(devices[2].classes.contains(&UsbClass::SmartCard));

        let office = action.registry().endpoint("office").unwrap();
        assert_eq!(office.devices.len(), 1);
        assert_eq!(office.devices[0].bus_id, "2-1");
    }

    #[tokio::test]
    async fn test_unchanged_listing_reports_no_change() {
        let (_dir, _runner, mut action) = setup();

        assert!(action.device_set_changed().await.unwrap());
        assert!(!action.device_set_changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_marked_unavailable() {
        let (_dir, runner, mut action) = setup();
        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        runner.replace(
            "usbip list -r 10.0.0.2",
            CommandOutput::failed(1, "usbip: error: could not connect to 10.0.0.2:3240"),
        );
        assert!(action.device_set_changed().await.unwrap());

        let office = action.registry().endpoint("office").unwrap();
        assert!(!office.available);
        assert!(office.last_snapshot.is_empty());
        // Device cache survives until the next full listing
        assert_eq!(office.devices.len(), 1);

        // lab is unaffected
        let lab = action.registry().endpoint("lab").unwrap();
        assert!(lab.available);
        assert_eq!(lab.devices.len(), 2);

        let result = action.perform_action(DeviceId(2), true).await;
        assert!(matches!(result, Err(ActionError::Unavailable(name)) if name == "office"));
        assert_eq!(runner.count("usbip attach"), 0);
    }
}

mod concurrency {
    use super::*;
    use common::{CommandError, CommandRunner};
    use tokio::time::Instant;

    const LISTING_DELAY: Duration = Duration::from_secs(30);

    /// Scripted runner whose remote listings each take `LISTING_DELAY`
    #[derive(Clone)]
    struct SlowListings(ScriptedRunner);

    impl CommandRunner for SlowListings {
        async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
            if args.starts_with(&["list", "-r"]) {
                tokio::time::sleep(LISTING_DELAY).await;
            }
            self.0.run(program, args).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_endpoints_probed_concurrently() {
        let (dir, runner, _action) = setup();
        let registry =
            ServerRegistry::new(RegistryStore::open(dir.path().join("servers.toml")).unwrap());
        let mut action =
            ImportAction::new(SlowListings(runner.clone()), Utilities::default(), registry);

        let started = Instant::now();
        assert!(action.device_set_changed().await.unwrap());
        assert!(started.elapsed() < LISTING_DELAY * 2);
        assert_eq!(runner.count("usbip list -r"), 2);
    }
}

mod attach {
    use super::*;

    #[tokio::test]
    async fn test_attach_uses_owner_address() {
        let (_dir, runner, mut action) = setup();
        runner.reply("usbip attach -r 10.0.0.2 -b 2-1", CommandOutput::ok(""));

        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        action.perform_action(DeviceId(2), true).await.unwrap();
        assert_eq!(runner.count("usbip attach -r 10.0.0.2 -b 2-1"), 1);
    }

    #[tokio::test]
    async fn test_already_attached_is_success() {
        let (_dir, runner, mut action) = setup();
        runner.reply(
            "usbip attach -r 10.0.0.1 -b 1-2",
            CommandOutput::failed(1, "usbip: error: device 1-2 is already attached"),
        );

        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        assert!(action.perform_action(DeviceId(1), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_unowned_id_not_found() {
        let (_dir, runner, mut action) = setup();
        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();
        runner.clear_calls();

        // 3 was filtered out of office's cache
        for id in [3, 42] {
            let result = action.perform_action(DeviceId(id), true).await;
            assert!(matches!(result, Err(ActionError::NotFound(_))));
        }
        assert!(runner.calls().is_empty());
    }
}

mod detach {
    use super::*;

    #[tokio::test]
    async fn test_detach_by_port() {
        let (_dir, runner, mut action) = setup();
        runner.reply("usbip detach -p 01", CommandOutput::ok("port 1 is now detached!"));

        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        action.perform_action(DeviceId(2), false).await.unwrap();
        assert_eq!(runner.count("usbip detach -p 01"), 1);
    }

    #[tokio::test]
    async fn test_missing_port_issues_no_detach() {
        let (_dir, runner, mut action) = setup();
        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        // 1-2 from lab is not in the port table
        let result = action.perform_action(DeviceId(1), false).await;
        assert!(matches!(result, Err(ActionError::NotFound(_))));
        assert_eq!(runner.count("usbip port"), 1);
        assert_eq!(runner.count("usbip detach"), 0);
    }

    #[tokio::test]
    async fn test_detach_lab_device_by_remote_bus_id() {
        let (_dir, runner, mut action) = setup();
        runner.reply("usbip detach -p 00", CommandOutput::ok("port 0 is now detached!"));

        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        // 1-1 on lab sits on local vhci bus id 3-1
        action.perform_action(DeviceId(0), false).await.unwrap();
        assert_eq!(runner.count("usbip detach -p 00"), 1);
    }

    #[tokio::test]
    async fn test_same_bus_id_on_other_endpoint_is_left_alone() {
        let (_dir, runner, mut action) = setup();
        let office_with_1_1 = OFFICE_LISTING.replace("        2-1:", "        1-1:");
        runner
            .replace("usbip list -r 10.0.0.2", CommandOutput::ok(office_with_1_1))
            .replace(
                "usbip port",
                CommandOutput::ok(
                    "Port 00: <Port in Use> at Full Speed(12Mbps)
       Yubico.com : Yubikey 4/5 OTP+U2F+CCID (1050:0407)
       3-1 -> usbip://10.0.0.2:3240/1-1
           -> remote bus/dev 002/002
",
                ),
            )
            .reply("usbip detach -p 00", CommandOutput::ok("port 0 is now detached!"));

        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        // lab's 1-1 is not imported, office's is
        let result = action.perform_action(DeviceId(0), false).await;
        assert!(matches!(result, Err(ActionError::NotFound(_))));
        assert_eq!(runner.count("usbip detach"), 0);

        action.perform_action(DeviceId(2), false).await.unwrap();
        assert_eq!(runner.count("usbip detach -p 00"), 1);
    }

    #[tokio::test]
    async fn test_port_table_failure() {
        let (_dir, runner, mut action) = setup();
        runner.replace(
            "usbip port",
            CommandOutput::failed(1, "usbip: error: open vhci_driver"),
        );
        action.device_set_changed().await.unwrap();
        action.list_devices().await.unwrap();

        let result = action.perform_action(DeviceId(0), false).await;
        assert!(matches!(result, Err(ActionError::Failed { .. })));
        assert_eq!(runner.count("usbip detach"), 0);
    }
}

mod reconcile {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_store_edit_picked_up_after_interval() {
        let (dir, runner, action) = setup();
        let mut action = action.with_reconcile_interval(Duration::from_secs(5));
        runner.reply("usbip list -r 10.0.0.3", CommandOutput::ok(""));

        action.device_set_changed().await.unwrap();
        assert_eq!(action.registry().len(), 2);

        let path = dir.path().join("servers.toml");
        let mut editor = RegistryStore::open(&path).unwrap();
        let mut configured = editor.load().unwrap();
        configured.push(endpoint("bench", "10.0.0.3", &["- *"]));
        editor.save(&configured).unwrap();
        // Make the edit visible regardless of timestamp granularity
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();

        // Before the interval elapsed the registry is not reloaded
        action.device_set_changed().await.unwrap();
        assert_eq!(action.registry().len(), 2);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(action.device_set_changed().await.unwrap());
        assert_eq!(action.registry().len(), 3);
        assert_eq!(runner.count("usbip list -r 10.0.0.3"), 1);
    }
}
