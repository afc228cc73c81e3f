//! Protocol library for usbip-autoredir
//!
//! This crate captures the two contracts the rest of the workspace speaks:
//! the text output of the USB/IP control utility (device listings and the
//! imported-port table), and the fixed-size header that opens a session with
//! the local TLS proxy.
//!
//! # Example
//!
//! ```
//! use protocol::{UsbClass, parse_remote_listing};
//!
//! let listing = "        1-1: Logitech, Inc. : Unifying Receiver (046d:c52b)\n\
//!                           :  0 - Human Interface Device / Keyboard / Boot Interface Subclass (03/01/01)\n";
//! let devices = parse_remote_listing(listing, 0);
//! assert_eq!(devices[0].vid_pid(), "046d:c52b");
//! assert!(devices[0].classes.contains(&UsbClass::Hid));
//! ```
//!
//! # Tunnel header
//!
//! ```
//! use protocol::{HEADER_LEN, TunnelHeader};
//!
//! let header = TunnelHeader::new("10.0.0.5").unwrap();
//! let bytes: [u8; HEADER_LEN] = header.encode();
//! assert_eq!(TunnelHeader::decode(&bytes).unwrap().host(), "10.0.0.5");
//! ```

pub mod catalog;
pub mod error;
pub mod tunnel;
pub mod types;

pub use catalog::{
    LocalEntry, PortEntry, find_port, merge_local_snapshot, parse_interface_classes,
    parse_local_listing, parse_lsusb_names, parse_port_table, parse_remote_listing,
};
pub use error::{ProtocolError, Result};
pub use tunnel::{HEADER_LEN, PROXY_PORT, TunnelHeader, USBIP_PORT};
pub use types::{DeviceId, UsbClass, UsbDevice};
