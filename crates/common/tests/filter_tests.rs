//! Filter Engine Integration Tests
//!
//! Tests rule ordering, implicit deny and rule file loading.
//!
//! Run with: `cargo test -p common --test filter_tests`

use common::{Disposition, FilterRule, RuleList, filter_devices, load_rules_file, parse_rules};
use protocol::{DeviceId, UsbClass, UsbDevice};
use std::io::Write;

fn device(id: u32, vid: &str, pid: &str, classes: &[UsbClass]) -> UsbDevice {
    UsbDevice {
        id: DeviceId(id),
        bus_id: format!("1-{}", id + 1),
        vendor_id: vid.to_string(),
        product_id: pid.to_string(),
        name: format!("Device {}", id),
        classes: classes.iter().copied().collect(),
    }
}

mod precedence {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        let hid = device(0, "1234", "5678", &[UsbClass::Hid]);

        let allow_first = parse_rules(["+ hid", "- 1234:*"]);
        assert_eq!(filter_devices(vec![hid.clone()], &allow_first).len(), 1);

        let forbid_first = parse_rules(["- 1234:*", "+ hid"]);
        assert!(filter_devices(vec![hid], &forbid_first).is_empty());
    }

    #[test]
    fn test_swap_changes_outcome() {
        let dev = device(0, "1050", "0407", &[UsbClass::SmartCard]);
        let mut rules = parse_rules(["+ smart card", "- 1050:*"]);
        assert_eq!(rules.evaluate(&dev), Some(Disposition::Allow));

        rules.swap(0, 1);
        assert_eq!(rules.evaluate(&dev), Some(Disposition::Forbid));
    }

    #[test]
    fn test_unmatched_device_is_dropped() {
        let rules = parse_rules(["+ msc"]);
        let devices = vec![
            device(0, "0781", "5581", &[UsbClass::Msc]),
            device(1, "046d", "c52b", &[UsbClass::Hid]),
        ];

        let allowed = filter_devices(devices, &rules);
        assert_eq!(allowed.len(), 1);
        assert_eq!(allowed[0].id, DeviceId(0));
    }

    #[test]
    fn test_empty_rules_allow_nothing() {
        let devices = vec![device(0, "0781", "5581", &[UsbClass::Msc])];
        assert!(filter_devices(devices, &RuleList::new()).is_empty());
    }

    #[test]
    fn test_order_of_survivors_preserved() {
        let rules: RuleList = [FilterRule::allow_vid_pid("*")].into_iter().collect();
        let devices = vec![
            device(2, "aaaa", "0001", &[]),
            device(0, "bbbb", "0002", &[]),
            device(1, "cccc", "0003", &[]),
        ];

        let ids: Vec<u32> = filter_devices(devices, &rules).iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }
}

mod rules_file {
    use super::*;

    #[test]
    fn test_load_rules_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "+ hid").unwrap();
        writeln!(file, "garbage").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "+ 1050:04??").unwrap();
        writeln!(file, "- *").unwrap();

        let rules = load_rules_file(file.path()).unwrap();
        assert_eq!(rules.to_lines(), vec!["+ hid", "+ 1050:04??", "- *"]);
    }

    #[test]
    fn test_missing_rules_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_rules_file(&dir.path().join("absent.rules"));
        assert!(matches!(result, Err(common::Error::RulesFile { .. })));

        let rules = common::load_rules_or_empty(&dir.path().join("absent.rules"));
        assert!(rules.is_empty());
    }
}
