// src/io/transport.rs
//
// The transport driver capability consumed by the session layer: enumerate
// attached USB devices, resolve a chip driver, arbitrate OS access and hand
// out port handles. Raw descriptor parsing and chip framing stay behind
// these traits.

use std::time::Duration;

use super::{IoError, LineParams, StatusLine};
use crate::devices::{DeviceId, DriverKind};

/// Raw descriptor of one attached USB device as the transport sees it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub device_id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub product: Option<String>,
    /// The device exposes a serial interface the transport can drive
    /// (a class-compliant CDC-ACM interface, or a tty the host kernel created)
    pub has_serial_interface: bool,
}

/// Enumeration, permission and port acquisition for USB serial hardware.
pub trait UsbTransport: Send + Sync {
    /// Snapshot of every attached USB device, supported or not.
    fn list_devices(&self) -> Result<Vec<UsbDeviceInfo>, IoError>;

    /// Resolve the chip driver for a device. `None` means unsupported hardware.
    fn probe(&self, device: &UsbDeviceInfo) -> Option<DriverKind>;

    /// Whether the OS already grants this process access to the device.
    fn has_permission(&self, device: &UsbDeviceInfo) -> bool;

    /// Ask the OS for access. The answer arrives later as an
    /// `OsEvent::PermissionResult` on an arbitrary thread.
    fn request_permission(&self, device: &UsbDeviceInfo) -> Result<(), IoError>;

    /// Open the first serial port of the device with the given driver.
    fn open_port(&self, device: &UsbDeviceInfo, driver: DriverKind) -> Result<Box<dyn PortHandle>, IoError>;
}

/// An open serial port. Shared between the caller threads and the session's
/// background reader, so every method takes `&self`.
pub trait PortHandle: Send + Sync {
    /// Push line parameters to the chip.
    fn configure(&self, params: &LineParams) -> Result<(), IoError>;

    /// Block up to `timeout` for inbound bytes. An empty vector means nothing
    /// arrived in time; a closed or vanished port is an error.
    fn read_chunk(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, IoError>;

    /// Write all bytes, failing if the chip does not accept them within `timeout`.
    fn write_all(&self, data: &[u8], timeout: Duration) -> Result<(), IoError>;

    fn set_rts(&self, level: bool) -> Result<(), IoError>;
    fn rts(&self) -> Result<bool, IoError>;
    fn set_dtr(&self, level: bool) -> Result<(), IoError>;
    fn dtr(&self) -> Result<bool, IoError>;

    /// Sample a modem status line. Chips that cannot report the line return
    /// `IoError::Unsupported`.
    fn status(&self, line: StatusLine) -> Result<bool, IoError>;

    /// Release the port. Later calls on the handle fail; closing twice is harmless.
    fn close(&self) -> Result<(), IoError>;
}
