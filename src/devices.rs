// src/devices.rs
//
// Device listing types and the closed set of supported USB serial chip drivers.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OS-assigned handle for one physical attachment. Unique while attached,
/// not stable across unplug/replug.
pub type DeviceId = u32;

/// Passing this id to `open` selects the first device in the live set.
pub const WILDCARD_DEVICE_ID: DeviceId = 0;

// ============================================================================
// Drivers
// ============================================================================

/// Chip driver families the transport knows how to talk to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    CdcAcm,
    Cp21xx,
    Ftdi,
    Prolific,
    Ch34x,
}

impl DriverKind {
    /// Display name reported in device listings.
    pub fn name(&self) -> &'static str {
        match self {
            DriverKind::CdcAcm => "CdcAcm",
            DriverKind::Cp21xx => "Cp21xx",
            DriverKind::Ftdi => "Ftdi",
            DriverKind::Prolific => "Prolific",
            DriverKind::Ch34x => "Ch34x",
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// FTDI Vendor ID
pub const FTDI_VID: u16 = 0x0403;
/// Silicon Labs Vendor ID
pub const SILABS_VID: u16 = 0x10c4;
/// Prolific Vendor ID
pub const PROLIFIC_VID: u16 = 0x067b;
/// WCH (QinHeng) Vendor ID
pub const QINHENG_VID: u16 = 0x1a86;

/// Vendor-specific chips, keyed by (vendor, product).
static DRIVER_TABLE: Lazy<HashMap<(u16, u16), DriverKind>> = Lazy::new(|| {
    let mut table = HashMap::new();
    for pid in [0x6001, 0x6010, 0x6011, 0x6014, 0x6015] {
        table.insert((FTDI_VID, pid), DriverKind::Ftdi);
    }
    for pid in [0xea60, 0xea70, 0xea71] {
        table.insert((SILABS_VID, pid), DriverKind::Cp21xx);
    }
    for pid in [0x2303, 0x23a3, 0x23b3, 0x23c3, 0x23d3, 0x23e3, 0x23f3] {
        table.insert((PROLIFIC_VID, pid), DriverKind::Prolific);
    }
    for pid in [0x7523, 0x5523] {
        table.insert((QINHENG_VID, pid), DriverKind::Ch34x);
    }
    table
});

/// Resolve the driver for a device.
/// Vendor chips are matched by VID/PID; anything else is only usable when it
/// exposes a class-compliant CDC-ACM interface.
pub fn probe_driver(vendor_id: u16, product_id: u16, has_serial_interface: bool) -> Option<DriverKind> {
    if let Some(kind) = DRIVER_TABLE.get(&(vendor_id, product_id)) {
        return Some(*kind);
    }
    if has_serial_interface {
        Some(DriverKind::CdcAcm)
    } else {
        None
    }
}

/// Human-readable label used in logs and notifications, e.g. `Ftdi 403:6001`.
pub fn session_label(driver: DriverKind, vendor_id: u16, product_id: u16) -> String {
    format!("{} {:X}:{:X}", driver.name(), vendor_id, product_id)
}

// ============================================================================
// Device snapshot
// ============================================================================

/// One entry of a device listing. Built fresh on every query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    #[serde(rename = "id")]
    pub device_id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Empty when no driver matches (hardware present but unsupported)
    pub driver_name: String,
    pub is_connected: bool,
}

impl Device {
    pub fn is_supported(&self) -> bool {
        !self.driver_name.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
