// src/io/serial/host.rs
//
// Host transport: nusb for enumeration (so unsupported hardware still shows up
// in listings), serialport for the port itself.
//
// Device ids are handed out per (bus, address) attachment and forgotten as
// soon as the attachment disappears, so a replugged adapter gets a new id.

use nusb::MaybeFuture;
use parking_lot::Mutex;
use serialport::{SerialPort, SerialPortType};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::utils::{
    is_disconnect, is_disconnect_io, to_serialport_data_bits, to_serialport_parity,
    to_serialport_stop_bits,
};
use crate::devices::{probe_driver, session_label, DeviceId, DriverKind};
use crate::io::{IoError, LineParams, PortHandle, StatusLine, UsbDeviceInfo, UsbTransport};

/// Baud rate used to open the port before the caller configures it.
const OPEN_BAUD_RATE: u32 = 115_200;

/// Read timeout set at open; every read overrides it with the caller's value.
const OPEN_TIMEOUT: Duration = Duration::from_millis(50);

// ============================================================================
// Device id bookkeeping
// ============================================================================

struct Attachment {
    device_id: DeviceId,
    port_name: Option<String>,
}

#[derive(Default)]
struct AttachmentTable {
    by_location: HashMap<String, Attachment>,
    next_id: DeviceId,
}

impl AttachmentTable {
    /// Keep ids for locations still present, assign fresh ids to new ones and
    /// forget the rest. Returns the id for each location in input order.
    fn refresh(&mut self, seen: &[(String, Option<String>)]) -> Vec<DeviceId> {
        self.by_location
            .retain(|location, _| seen.iter().any(|(l, _)| l == location));

        let mut ids = Vec::with_capacity(seen.len());
        for (location, port_name) in seen {
            let next_id = &mut self.next_id;
            let entry = self
                .by_location
                .entry(location.clone())
                .or_insert_with(|| {
                    *next_id += 1;
                    Attachment {
                        device_id: *next_id,
                        port_name: None,
                    }
                });
            entry.port_name = port_name.clone();
            ids.push(entry.device_id);
        }
        ids
    }

    fn port_name(&self, device_id: DeviceId) -> Option<String> {
        self.by_location
            .values()
            .find(|a| a.device_id == device_id)
            .and_then(|a| a.port_name.clone())
    }
}

/// A tty/COM port the OS created for a USB device.
struct UsbSerialPort {
    port_name: String,
    vid: u16,
    pid: u16,
    serial_number: Option<String>,
}

/// List the USB-backed serial ports the OS currently exposes.
fn usb_serial_ports() -> Vec<UsbSerialPort> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter_map(|p| match p.port_type {
                SerialPortType::UsbPort(info) => Some(UsbSerialPort {
                    port_name: p.port_name,
                    vid: info.vid,
                    pid: info.pid,
                    serial_number: info.serial_number,
                }),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tlog!("[serial:list] Failed to list serial ports: {}", e);
            Vec::new()
        }
    }
}

/// Take the first port matching the device's VID/PID (and serial number when
/// both sides report one).
fn claim_port(
    ports: &mut Vec<UsbSerialPort>,
    vid: u16,
    pid: u16,
    serial_number: Option<&str>,
) -> Option<String> {
    let index = ports.iter().position(|p| {
        p.vid == vid
            && p.pid == pid
            && match (serial_number, p.serial_number.as_deref()) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    })?;
    Some(ports.remove(index).port_name)
}

// ============================================================================
// Transport
// ============================================================================

/// USB serial transport for Linux, macOS and Windows.
#[derive(Default)]
pub struct HostTransport {
    attachments: Mutex<AttachmentTable>,
}

impl HostTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// The tty/COM port name last seen for a device, if it has one.
    pub fn port_name(&self, device_id: DeviceId) -> Option<String> {
        self.attachments.lock().port_name(device_id)
    }
}

impl UsbTransport for HostTransport {
    fn list_devices(&self) -> Result<Vec<UsbDeviceInfo>, IoError> {
        // nusb 0.2 list_devices() returns MaybeFuture - use .wait() for sync blocking
        let usb_devices: Vec<nusb::DeviceInfo> = nusb::list_devices()
            .wait()
            .map_err(|e| IoError::connection("usb", format!("Failed to list USB devices: {}", e)))?
            .collect();

        let mut ports = usb_serial_ports();
        let seen: Vec<(String, Option<String>)> = usb_devices
            .iter()
            .map(|dev| {
                let location = format!("{}-{}", dev.bus_id(), dev.device_address());
                let port_name = claim_port(&mut ports, dev.vendor_id(), dev.product_id(), dev.serial_number());
                (location, port_name)
            })
            .collect();

        let ids = self.attachments.lock().refresh(&seen);

        Ok(usb_devices
            .iter()
            .zip(ids)
            .zip(seen.iter())
            .map(|((dev, device_id), (_, port_name))| UsbDeviceInfo {
                device_id,
                vendor_id: dev.vendor_id(),
                product_id: dev.product_id(),
                serial_number: dev.serial_number().map(|s| s.to_string()),
                product: dev.product_string().map(|s| s.to_string()),
                has_serial_interface: port_name.is_some(),
            })
            .collect())
    }

    fn probe(&self, device: &UsbDeviceInfo) -> Option<DriverKind> {
        // Without a tty there is nothing to drive, whatever the chip
        if !device.has_serial_interface {
            return None;
        }
        probe_driver(device.vendor_id, device.product_id, true)
    }

    fn has_permission(&self, _device: &UsbDeviceInfo) -> bool {
        // Desktop access control is file permissions on the tty, checked at open
        true
    }

    fn request_permission(&self, device: &UsbDeviceInfo) -> Result<(), IoError> {
        Err(IoError::unsupported(
            &format!("usb:{}", device.device_id),
            "interactive permission request",
        ))
    }

    fn open_port(&self, device: &UsbDeviceInfo, driver: DriverKind) -> Result<Box<dyn PortHandle>, IoError> {
        let label = session_label(driver, device.vendor_id, device.product_id);
        let port_name = self
            .port_name(device.device_id)
            .ok_or_else(|| IoError::connection(&label, "no serial port for device"))?;

        let control = serialport::new(&port_name, OPEN_BAUD_RATE)
            .timeout(OPEN_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&label, format!("Failed to open {}: {}", port_name, e)))?;
        let reader = control
            .try_clone()
            .map_err(|e| IoError::connection(&label, format!("Failed to clone {}: {}", port_name, e)))?;

        tlog!("[serial:open] Opened {} for {}", port_name, label);

        Ok(Box::new(HostPort {
            label,
            reader: Mutex::new(Some(reader)),
            control: Mutex::new(Some(control)),
            rts: AtomicBool::new(false),
            dtr: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// Port
// ============================================================================

fn apply_line(
    port: &mut dyn SerialPort,
    baud_rate: u32,
    data_bits: serialport::DataBits,
    stop_bits: serialport::StopBits,
    parity: serialport::Parity,
) -> serialport::Result<()> {
    port.set_baud_rate(baud_rate)?;
    port.set_data_bits(data_bits)?;
    port.set_stop_bits(stop_bits)?;
    port.set_parity(parity)?;
    Ok(())
}

fn write_and_flush(port: &mut dyn SerialPort, data: &[u8]) -> std::io::Result<()> {
    port.write_all(data)?;
    port.flush()
}

/// Open host port. Reads go through a cloned handle so a blocked read never
/// holds up writes or control-line changes.
struct HostPort {
    label: String,
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    control: Mutex<Option<Box<dyn SerialPort>>>,
    // serialport cannot read RTS/DTR back, so the last written level is cached
    rts: AtomicBool,
    dtr: AtomicBool,
}

impl HostPort {
    fn with_control<T>(
        &self,
        f: impl FnOnce(&mut Box<dyn SerialPort>) -> Result<T, IoError>,
    ) -> Result<T, IoError> {
        let mut guard = self.control.lock();
        match guard.as_mut() {
            Some(port) => f(port),
            None => Err(IoError::connection(&self.label, "port closed")),
        }
    }

    fn map_port_error(&self, err: serialport::Error, make: fn(&str, String) -> IoError) -> IoError {
        if is_disconnect(&err) {
            IoError::disconnected(&self.label)
        } else {
            make(&self.label, err.to_string())
        }
    }
}

impl PortHandle for HostPort {
    fn configure(&self, params: &LineParams) -> Result<(), IoError> {
        let data_bits = to_serialport_data_bits(params.data_bits).ok_or_else(|| {
            IoError::configuration(&self.label, format!("unsupported data bits {}", params.data_bits))
        })?;
        let stop_bits = to_serialport_stop_bits(params.stop_bits)
            .ok_or_else(|| IoError::configuration(&self.label, "1.5 stop bits not supported"))?;
        let parity = to_serialport_parity(params.parity);

        self.with_control(|port| {
            apply_line(port.as_mut(), params.baud_rate, data_bits, stop_bits, parity)
                .map_err(|e| self.map_port_error(e, |d, m| IoError::configuration(d, m)))
        })
    }

    fn read_chunk(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, IoError> {
        let mut guard = self.reader.lock();
        let port = guard
            .as_mut()
            .ok_or_else(|| IoError::connection(&self.label, "port closed"))?;
        port.set_timeout(timeout)
            .map_err(|e| self.map_port_error(e, |d, m| IoError::read(d, m)))?;

        let mut buf = vec![0u8; max_len.max(1)];
        match port.read(&mut buf) {
            Ok(0) => Err(IoError::disconnected(&self.label)),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) if is_disconnect_io(e.kind()) => Err(IoError::disconnected(&self.label)),
            Err(e) => Err(IoError::read(&self.label, e.to_string())),
        }
    }

    fn write_all(&self, data: &[u8], timeout: Duration) -> Result<(), IoError> {
        self.with_control(|port| {
            port.set_timeout(timeout)
                .map_err(|e| self.map_port_error(e, |d, m| IoError::write(d, m)))?;
            write_and_flush(port.as_mut(), data).map_err(|e| {
                if is_disconnect_io(e.kind()) {
                    IoError::disconnected(&self.label)
                } else {
                    IoError::write(&self.label, e.to_string())
                }
            })
        })
    }

    fn set_rts(&self, level: bool) -> Result<(), IoError> {
        self.with_control(|port| {
            port.write_request_to_send(level)
                .map_err(|e| self.map_port_error(e, |d, m| IoError::write(d, m)))
        })?;
        self.rts.store(level, Ordering::Relaxed);
        Ok(())
    }

    fn rts(&self) -> Result<bool, IoError> {
        self.with_control(|_| Ok(()))?;
        Ok(self.rts.load(Ordering::Relaxed))
    }

    fn set_dtr(&self, level: bool) -> Result<(), IoError> {
        self.with_control(|port| {
            port.write_data_terminal_ready(level)
                .map_err(|e| self.map_port_error(e, |d, m| IoError::write(d, m)))
        })?;
        self.dtr.store(level, Ordering::Relaxed);
        Ok(())
    }

    fn dtr(&self) -> Result<bool, IoError> {
        self.with_control(|_| Ok(()))?;
        Ok(self.dtr.load(Ordering::Relaxed))
    }

    fn status(&self, line: StatusLine) -> Result<bool, IoError> {
        self.with_control(|port| {
            let level = match line {
                StatusLine::Cts => port.read_clear_to_send(),
                StatusLine::Dsr => port.read_data_set_ready(),
                StatusLine::Cd => port.read_carrier_detect(),
                StatusLine::Ri => port.read_ring_indicator(),
            };
            level.map_err(|e| {
                if is_disconnect(&e) {
                    IoError::disconnected(&self.label)
                } else {
                    // Drivers without modem-status support fail the ioctl
                    IoError::unsupported(&self.label, line.name())
                }
            })
        })
    }

    fn close(&self) -> Result<(), IoError> {
        // Dropping both handles closes the OS port
        self.control.lock().take();
        self.reader.lock().take();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
