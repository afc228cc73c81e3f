//! USB device type definitions
//!
//! Records built from the control utility's listings. A `UsbDevice` lives for
//! one poll cycle: it is created while a snapshot is parsed, filtered, acted
//! upon, and then dropped.

use std::collections::BTreeSet;
use std::fmt;

/// Cycle-local device identifier
///
/// Assigned sequentially while a snapshot is merged. The same physical device
/// can receive a different id on the next poll, so ids must never be used as
/// a cache key or compared across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// USB interface class codes
///
/// `Unknown` stands in for any code that has no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UsbClass {
    Audio,
    CdcCtl,
    Hid,
    Physical,
    Image,
    Printer,
    Msc,
    Hub,
    CdcData,
    SmartCard,
    Sec,
    Video,
    Health,
    AudioVideo,
    Billboard,
    Bridge,
    Display,
    I3c,
    Diagnostic,
    Wireless,
    Misc,
    VendorSpec,
    Unknown,
}

impl UsbClass {
    /// All decodable classes plus `Unknown`, in class-code order
    pub const ALL: [UsbClass; 23] = [
        UsbClass::Audio,
        UsbClass::CdcCtl,
        UsbClass::Hid,
        UsbClass::Physical,
        UsbClass::Image,
        UsbClass::Printer,
        UsbClass::Msc,
        UsbClass::Hub,
        UsbClass::CdcData,
        UsbClass::SmartCard,
        UsbClass::Sec,
        UsbClass::Video,
        UsbClass::Health,
        UsbClass::AudioVideo,
        UsbClass::Billboard,
        UsbClass::Bridge,
        UsbClass::Display,
        UsbClass::I3c,
        UsbClass::Diagnostic,
        UsbClass::Wireless,
        UsbClass::Misc,
        UsbClass::VendorSpec,
        UsbClass::Unknown,
    ];

    /// Decode a class code. Codes without a variant map to `Unknown`.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x01 => Self::Audio,
            0x02 => Self::CdcCtl,
            0x03 => Self::Hid,
            0x05 => Self::Physical,
            0x06 => Self::Image,
            0x07 => Self::Printer,
            0x08 => Self::Msc,
            0x09 => Self::Hub,
            0x0A => Self::CdcData,
            0x0B => Self::SmartCard,
            0x0D => Self::Sec,
            0x0E => Self::Video,
            0x0F => Self::Health,
            0x10 => Self::AudioVideo,
            0x11 => Self::Billboard,
            0x12 => Self::Bridge,
            0x13 => Self::Display,
            0x3C => Self::I3c,
            0xDC => Self::Diagnostic,
            0xE0 => Self::Wireless,
            0xEF => Self::Misc,
            0xFE => Self::VendorSpec,
            _ => Self::Unknown,
        }
    }

    /// Class code, `None` for `Unknown`
    pub fn code(self) -> Option<u8> {
        let code = match self {
            Self::Audio => 0x01,
            Self::CdcCtl => 0x02,
            Self::Hid => 0x03,
            Self::Physical => 0x05,
            Self::Image => 0x06,
            Self::Printer => 0x07,
            Self::Msc => 0x08,
            Self::Hub => 0x09,
            Self::CdcData => 0x0A,
            Self::SmartCard => 0x0B,
            Self::Sec => 0x0D,
            Self::Video => 0x0E,
            Self::Health => 0x0F,
            Self::AudioVideo => 0x10,
            Self::Billboard => 0x11,
            Self::Bridge => 0x12,
            Self::Display => 0x13,
            Self::I3c => 0x3C,
            Self::Diagnostic => 0xDC,
            Self::Wireless => 0xE0,
            Self::Misc => 0xEF,
            Self::VendorSpec => 0xFE,
            Self::Unknown => return None,
        };
        Some(code)
    }

    /// Canonical name as written in rule files (lowercase, words separated by spaces)
    pub fn name(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::CdcCtl => "cdc ctl",
            Self::Hid => "hid",
            Self::Physical => "physical",
            Self::Image => "image",
            Self::Printer => "printer",
            Self::Msc => "msc",
            Self::Hub => "hub",
            Self::CdcData => "cdc data",
            Self::SmartCard => "smart card",
            Self::Sec => "sec",
            Self::Video => "video",
            Self::Health => "health",
            Self::AudioVideo => "audio video",
            Self::Billboard => "billboard",
            Self::Bridge => "bridge",
            Self::Display => "display",
            Self::I3c => "i3c",
            Self::Diagnostic => "diagnostic",
            Self::Wireless => "wireless",
            Self::Misc => "misc",
            Self::VendorSpec => "vendor spec",
            Self::Unknown => "unknown",
        }
    }

    /// Look up a class by name
    ///
    /// Case-insensitive; spaces and underscores are interchangeable.
    /// A few descriptive aliases are accepted (`"mass storage"`, `"keyboard"`).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().replace('_', " ").to_lowercase();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");

        if let Some(class) = Self::ALL.iter().find(|c| c.name() == normalized) {
            return Some(*class);
        }

        match normalized.as_str() {
            "mass storage" | "storage" => Some(Self::Msc),
            "human interface device" | "keyboard" | "mouse" => Some(Self::Hid),
            "communications" | "cdc" => Some(Self::CdcCtl),
            "vendor specific" => Some(Self::VendorSpec),
            _ => None,
        }
    }
}

impl fmt::Display for UsbClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A USB device as reported by the control utility
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbDevice {
    /// Cycle-local identifier
    pub id: DeviceId,
    /// Bus topology id on the owning host (e.g. `1-1.2`)
    pub bus_id: String,
    /// Vendor id as printed by the utility (hex, no prefix)
    pub vendor_id: String,
    /// Product id as printed by the utility (hex, no prefix)
    pub product_id: String,
    /// Human readable name
    pub name: String,
    /// Interface classes, duplicates collapsed
    pub classes: BTreeSet<UsbClass>,
}

impl UsbDevice {
    /// `"{vid}:{pid}"`, the string VID:PID globs are matched against
    pub fn vid_pid(&self) -> String {
        format!("{}:{}", self.vendor_id, self.product_id)
    }

    /// True when any identifying field came back empty from the parser
    pub fn is_incomplete(&self) -> bool {
        self.bus_id.is_empty() || self.vendor_id.is_empty() || self.product_id.is_empty()
    }
}

impl fmt::Display for UsbDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.id.0,
            self.bus_id,
            self.name,
            self.vid_pid()
        )?;
        if !self.classes.is_empty() {
            let classes: Vec<&str> = self.classes.iter().map(|c| c.name()).collect();
            write!(f, " [{}]", classes.join(", "))?;
        }
        Ok(())
    }
}
