//! Device catalog
//!
//! Turns the text printed by the USB/IP control utility (and `lsusb`) into
//! structured records. Parsing is line oriented and tolerant: lines that match
//! no pattern are skipped, and records with missing identifiers are kept with
//! blank fields so the anomaly stays visible downstream.
//!
//! Supported listings:
//! - `usbip list -r <host>`: exportable devices of a remote host
//! - `usbip list -l`: local devices
//! - `usbip port`: imported devices and their virtual ports
//! - `lsusb` and `lsusb -v -d vid:pid`: device names and interface classes

use crate::types::{DeviceId, UsbClass, UsbDevice};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Shortest line that can hold a remote device record
const MIN_DEVICE_LINE_LEN: usize = 12;

/// `        1-1: Logitech, Inc. : Unifying Receiver (046d:c52b)`
static REMOTE_DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\s+(?P<busid>[-.\d]*): (?P<name>.*) \((?P<vid>[\da-zA-Z]*):(?P<pid>[\da-zA-Z]*)\)",
    )
    .expect("remote device pattern is valid")
});

/// `           :  0 - Human Interface Device / Keyboard / Boot Interface Subclass (03/01/01)`
static REMOTE_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r".* \((?P<class>[\da-fA-F]{2})/[\da-fA-F]{2}/[\da-fA-F]{2}\)")
        .expect("remote class pattern is valid")
});

/// ` - busid 1-1 (046d:c52b)`
static LOCAL_DEVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"- busid (?P<busid>[-.\d]*) \((?P<vid>[\da-zA-Z]*):(?P<pid>[\da-zA-Z]*)\)")
        .expect("local device pattern is valid")
});

/// `Bus 001 Device 004: ID 046d:c52b Logitech, Inc. Unifying Receiver`
static LSUSB_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"ID (?P<vid>[\da-fA-F]{4}):(?P<pid>[\da-fA-F]{4}) ?(?P<name>.*)$")
        .expect("lsusb pattern is valid")
});

/// `      bInterfaceClass         3 Human Interface Device`
static LSUSB_CLASS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"bInterfaceClass\s+(?P<class_id>\d+)").expect("lsusb class pattern is valid")
});

/// `Port 00: <Port in Use> at Full Speed(12Mbps)`
static PORT_HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Port (?P<port>[^:\s]+):").expect("port header pattern is valid")
});

/// `       3-1 -> usbip://10.0.0.5:3240/1-1`
static PORT_BUSID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s+(?P<local>[-.\d]+) -> (?:usbip://(?P<remote>[^\s/]+)/(?P<remote_busid>[-.\d]+))?",
    )
    .expect("port busid pattern is valid")
});

/// A device found in `usbip list -l` output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub bus_id: String,
    pub vendor_id: String,
    pub product_id: String,
}

/// One imported device in the `usbip port` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// Virtual port as printed (passed back verbatim to `detach -p`)
    pub port: String,
    /// Bus id of the device on the remote host (the local vhci bus id when
    /// the table has no remote URL)
    pub bus_id: String,
    /// Bus id of the virtual device on this host
    pub local_bus_id: String,
    /// Remote host, when the table names it
    pub remote_host: Option<String>,
}

/// Parse `usbip list -r <host>` output
///
/// Device lines start a new record; class lines augment the most recently
/// started record. Ids are assigned from `first_id` in listing order.
pub fn parse_remote_listing(raw: &str, first_id: u32) -> Vec<UsbDevice> {
    let mut devices: Vec<UsbDevice> = Vec::new();
    let mut next_id = first_id;

    for line in raw.lines() {
        if let Some(mut device) = parse_remote_device_line(line) {
            device.id = DeviceId(next_id);
            next_id += 1;
            report_anomaly(&device);
            devices.push(device);
        } else if let Some(last) = devices.last_mut() {
            if let Some(class) = parse_remote_class_line(line) {
                last.classes.insert(class);
            }
        }
    }

    devices
}

fn parse_remote_device_line(line: &str) -> Option<UsbDevice> {
    if line.len() < MIN_DEVICE_LINE_LEN {
        return None;
    }

    let caps = REMOTE_DEVICE_RE.captures(line)?;
    Some(UsbDevice {
        id: DeviceId(0),
        bus_id: caps["busid"].to_string(),
        vendor_id: caps["vid"].to_string(),
        product_id: caps["pid"].to_string(),
        name: caps["name"].trim().to_string(),
        classes: BTreeSet::new(),
    })
}

/// Interface class from a `(cc/ss/pp)` line; class `00` carries no information
fn parse_remote_class_line(line: &str) -> Option<UsbClass> {
    let caps = REMOTE_CLASS_RE.captures(line)?;
    let code = u16::from_str_radix(&caps["class"], 16).ok()?;
    if code == 0 {
        return None;
    }
    Some(UsbClass::from_code(code))
}

fn report_anomaly(device: &UsbDevice) {
    if device.is_incomplete() {
        warn!(
            "Parse anomaly in device listing: busid='{}' vid='{}' pid='{}' (name '{}')",
            device.bus_id, device.vendor_id, device.product_id, device.name
        );
    }
}

/// Parse `usbip list -l` output
pub fn parse_local_listing(raw: &str) -> Vec<LocalEntry> {
    LOCAL_DEVICE_RE
        .captures_iter(raw)
        .map(|caps| {
            let entry = LocalEntry {
                bus_id: caps["busid"].to_string(),
                vendor_id: caps["vid"].to_string(),
                product_id: caps["pid"].to_string(),
            };
            if entry.bus_id.is_empty() || entry.vendor_id.is_empty() || entry.product_id.is_empty()
            {
                warn!("Parse anomaly in local listing: {:?}", entry);
            }
            entry
        })
        .collect()
}

/// Parse plain `lsusb` output into a `"vid:pid" -> name` map
///
/// The first occurrence wins when several devices share a VID:PID.
pub fn parse_lsusb_names(raw: &str) -> HashMap<String, String> {
    let mut names = HashMap::new();
    for line in raw.lines() {
        if let Some(caps) = LSUSB_LINE_RE.captures(line) {
            let key = format!("{}:{}", &caps["vid"], &caps["pid"]);
            names
                .entry(key)
                .or_insert_with(|| caps["name"].trim().to_string());
        }
    }
    names
}

/// Interface classes from `lsusb -v -d vid:pid` output
pub fn parse_interface_classes(raw: &str) -> BTreeSet<UsbClass> {
    LSUSB_CLASS_RE
        .captures_iter(raw)
        .map(|caps| {
            caps["class_id"]
                .parse::<u16>()
                .map(UsbClass::from_code)
                .unwrap_or(UsbClass::Unknown)
        })
        .collect()
}

/// Merge local listing, names and per-device classes into a snapshot
///
/// `classes` is indexed like `entries`; missing positions yield no classes.
pub fn merge_local_snapshot(
    entries: &[LocalEntry],
    names: &HashMap<String, String>,
    classes: &[BTreeSet<UsbClass>],
) -> Vec<UsbDevice> {
    entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| {
            let key = format!("{}:{}", entry.vendor_id, entry.product_id);
            let name = names.get(&key).cloned().unwrap_or_else(|| {
                debug!("No lsusb name for {}", key);
                String::new()
            });
            UsbDevice {
                id: DeviceId(idx as u32),
                bus_id: entry.bus_id.clone(),
                vendor_id: entry.vendor_id.clone(),
                product_id: entry.product_id.clone(),
                name,
                classes: classes.get(idx).cloned().unwrap_or_default(),
            }
        })
        .collect()
}

/// Parse `usbip port` output
///
/// A `Port N:` header opens an entry; the next `busid -> ...` line under it
/// completes the entry. The bus id recorded is the one on the remote host,
/// taken from the end of the `usbip://` URL.
pub fn parse_port_table(raw: &str) -> Vec<PortEntry> {
    let mut entries = Vec::new();
    let mut current_port: Option<String> = None;

    for line in raw.lines() {
        if let Some(caps) = PORT_HEADER_RE.captures(line) {
            current_port = Some(caps["port"].to_string());
            continue;
        }

        let Some(port) = current_port.as_ref() else {
            continue;
        };

        if let Some(caps) = PORT_BUSID_RE.captures(line) {
            let local_bus_id = caps["local"].to_string();
            let remote_host = caps.name("remote").map(|m| strip_port(m.as_str()));
            let bus_id = caps
                .name("remote_busid")
                .map_or_else(|| local_bus_id.clone(), |m| m.as_str().to_string());
            entries.push(PortEntry {
                port: port.clone(),
                bus_id,
                local_bus_id,
                remote_host,
            });
            current_port = None;
        }
    }

    entries
}

/// Find the port an imported device occupies
///
/// When `host` is given, entries naming a different remote host are skipped;
/// entries without a host always qualify.
pub fn find_port<'a>(
    table: &'a [PortEntry],
    bus_id: &str,
    host: Option<&str>,
) -> Option<&'a PortEntry> {
    table.iter().find(|entry| {
        entry.bus_id == bus_id
            && match (host, entry.remote_host.as_deref()) {
                (Some(wanted), Some(remote)) => wanted == remote,
                _ => true,
            }
    })
}

/// `10.0.0.5:3240` -> `10.0.0.5`, `[fe80::1]:3240` -> `fe80::1`
fn strip_port(remote: &str) -> String {
    let host = match remote.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => remote,
    };
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}
