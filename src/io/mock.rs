// src/io/mock.rs
//
// In-memory USB serial transport. Devices are attached and detached by hand,
// inbound bytes are delivered with `deliver`, and everything written to a
// port is recorded. Used by the test suite and for running the bridge
// without hardware.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{IoError, LineParams, PortHandle, StatusLine, StopBits, UsbDeviceInfo, UsbTransport};
use crate::devices::{session_label, DeviceId, DriverKind};

// ============================================================================
// Device description
// ============================================================================

/// Description of a simulated device passed to `MockTransport::attach`.
#[derive(Clone, Debug)]
pub struct MockDeviceSpec {
    pub device_id: Option<DeviceId>,
    pub vendor_id: u16,
    pub product_id: u16,
    pub driver: Option<DriverKind>,
    pub has_permission: bool,
    pub unsupported_lines: Vec<StatusLine>,
    pub reject_one_point_five: bool,
    pub fail_open: bool,
}

impl MockDeviceSpec {
    /// A supported CDC-ACM device with access already granted.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            device_id: None,
            vendor_id,
            product_id,
            driver: Some(DriverKind::CdcAcm),
            has_permission: true,
            unsupported_lines: Vec::new(),
            reject_one_point_five: false,
            fail_open: false,
        }
    }

    pub fn with_id(mut self, device_id: DeviceId) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn with_driver(mut self, driver: Option<DriverKind>) -> Self {
        self.driver = driver;
        self
    }

    pub fn without_permission(mut self) -> Self {
        self.has_permission = false;
        self
    }

    pub fn with_unsupported_line(mut self, line: StatusLine) -> Self {
        self.unsupported_lines.push(line);
        self
    }

    /// Chip refuses 1.5 stop bits, like most CDC and CH34x parts.
    pub fn rejecting_one_point_five(mut self) -> Self {
        self.reject_one_point_five = true;
        self
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

struct MockDevice {
    info: UsbDeviceInfo,
    spec: MockDeviceSpec,
    status_levels: HashMap<StatusLine, bool>,
    port: Option<Arc<MockPortShared>>,
    open_count: usize,
}

#[derive(Default)]
struct MockState {
    devices: Vec<MockDevice>,
    permission_requests: Vec<DeviceId>,
    next_id: DeviceId,
}

impl MockState {
    fn device(&self, device_id: DeviceId) -> Option<&MockDevice> {
        self.devices.iter().find(|d| d.info.device_id == device_id)
    }

    fn device_mut(&mut self, device_id: DeviceId) -> Option<&mut MockDevice> {
        self.devices.iter_mut().find(|d| d.info.device_id == device_id)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Simulated USB bus.
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            }),
        }
    }

    /// Attach a device and return its id. Ids are never reused, so a
    /// re-attached device gets a fresh one just like a real replug.
    pub fn attach(&self, spec: MockDeviceSpec) -> DeviceId {
        let mut state = self.state.lock();
        let device_id = match spec.device_id {
            Some(id) => id,
            None => {
                while state.device(state.next_id).is_some() {
                    state.next_id += 1;
                }
                state.next_id
            }
        };
        state.next_id = state.next_id.max(device_id + 1);
        state.devices.retain(|d| d.info.device_id != device_id);

        let info = UsbDeviceInfo {
            device_id,
            vendor_id: spec.vendor_id,
            product_id: spec.product_id,
            serial_number: None,
            product: Some(format!("Mock {:04x}:{:04x}", spec.vendor_id, spec.product_id)),
            has_serial_interface: spec.driver.is_some(),
        };
        state.devices.push(MockDevice {
            info,
            spec,
            status_levels: HashMap::new(),
            port: None,
            open_count: 0,
        });
        device_id
    }

    /// Unplug a device. Its open port starts failing reads immediately.
    pub fn detach(&self, device_id: DeviceId) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.devices.iter().position(|d| d.info.device_id == device_id) else {
            return false;
        };
        let device = state.devices.remove(index);
        if let Some(port) = device.port {
            port.disconnect();
        }
        true
    }

    /// Simulate bytes arriving from the device. Returns false when the device
    /// has no open port.
    pub fn deliver(&self, device_id: DeviceId, bytes: &[u8]) -> bool {
        let port = {
            let state = self.state.lock();
            state.device(device_id).and_then(|d| d.port.clone())
        };
        match port {
            Some(port) => port.push_inbound(bytes),
            None => false,
        }
    }

    /// Everything written to the device's most recent port.
    pub fn written(&self, device_id: DeviceId) -> Vec<u8> {
        let state = self.state.lock();
        state
            .device(device_id)
            .and_then(|d| d.port.as_ref())
            .map(|p| p.inner.lock().written.clone())
            .unwrap_or_default()
    }

    /// Last parameters pushed to the device's most recent port.
    pub fn line_params(&self, device_id: DeviceId) -> Option<LineParams> {
        let state = self.state.lock();
        state
            .device(device_id)
            .and_then(|d| d.port.as_ref())
            .and_then(|p| p.inner.lock().params)
    }

    pub fn is_port_open(&self, device_id: DeviceId) -> bool {
        let state = self.state.lock();
        state
            .device(device_id)
            .and_then(|d| d.port.as_ref())
            .map(|p| !p.inner.lock().closed)
            .unwrap_or(false)
    }

    pub fn open_count(&self, device_id: DeviceId) -> usize {
        let state = self.state.lock();
        state.device(device_id).map(|d| d.open_count).unwrap_or(0)
    }

    /// Drive a modem status line on the device side.
    pub fn set_status(&self, device_id: DeviceId, line: StatusLine, level: bool) {
        let mut state = self.state.lock();
        if let Some(device) = state.device_mut(device_id) {
            device.status_levels.insert(line, level);
            if let Some(port) = &device.port {
                port.inner.lock().status.insert(line, level);
            }
        }
    }

    /// Grant or revoke OS access outside of a permission request.
    pub fn set_permission(&self, device_id: DeviceId, granted: bool) {
        let mut state = self.state.lock();
        if let Some(device) = state.device_mut(device_id) {
            device.spec.has_permission = granted;
        }
    }

    /// Device ids passed to `request_permission`, in call order.
    pub fn permission_requests(&self) -> Vec<DeviceId> {
        self.state.lock().permission_requests.clone()
    }

    /// Block until a permission request for `device_id` has been issued.
    pub fn wait_for_permission_request(&self, device_id: DeviceId, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.permission_requests().contains(&device_id) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

impl UsbTransport for MockTransport {
    fn list_devices(&self) -> Result<Vec<UsbDeviceInfo>, IoError> {
        let state = self.state.lock();
        Ok(state.devices.iter().map(|d| d.info.clone()).collect())
    }

    fn probe(&self, device: &UsbDeviceInfo) -> Option<DriverKind> {
        let state = self.state.lock();
        state.device(device.device_id).and_then(|d| d.spec.driver)
    }

    fn has_permission(&self, device: &UsbDeviceInfo) -> bool {
        let state = self.state.lock();
        state
            .device(device.device_id)
            .map(|d| d.spec.has_permission)
            .unwrap_or(false)
    }

    fn request_permission(&self, device: &UsbDeviceInfo) -> Result<(), IoError> {
        let mut state = self.state.lock();
        if state.device(device.device_id).is_none() {
            return Err(IoError::connection(
                &format!("mock:{}", device.device_id),
                "device not attached",
            ));
        }
        state.permission_requests.push(device.device_id);
        Ok(())
    }

    fn open_port(&self, device: &UsbDeviceInfo, driver: DriverKind) -> Result<Box<dyn PortHandle>, IoError> {
        let mut state = self.state.lock();
        let label = session_label(driver, device.vendor_id, device.product_id);
        let Some(entry) = state.device_mut(device.device_id) else {
            return Err(IoError::connection(&label, "device not attached"));
        };
        if entry.spec.fail_open {
            return Err(IoError::connection(&label, "claim interface failed"));
        }
        if let Some(previous) = &entry.port {
            if !previous.inner.lock().closed {
                return Err(IoError::connection(&label, "port already open"));
            }
        }

        let shared = Arc::new(MockPortShared {
            label,
            inner: Mutex::new(MockPortState {
                inbound: VecDeque::new(),
                written: Vec::new(),
                rts: false,
                dtr: false,
                status: entry.status_levels.clone(),
                unsupported: entry.spec.unsupported_lines.iter().copied().collect(),
                reject_one_point_five: entry.spec.reject_one_point_five,
                params: None,
                closed: false,
                disconnected: false,
            }),
            data_ready: Condvar::new(),
        });
        entry.port = Some(shared.clone());
        entry.open_count += 1;
        Ok(Box::new(MockPort { shared }))
    }
}

// ============================================================================
// Port
// ============================================================================

struct MockPortState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
    rts: bool,
    dtr: bool,
    status: HashMap<StatusLine, bool>,
    unsupported: HashSet<StatusLine>,
    reject_one_point_five: bool,
    params: Option<LineParams>,
    closed: bool,
    disconnected: bool,
}

struct MockPortShared {
    label: String,
    inner: Mutex<MockPortState>,
    data_ready: Condvar,
}

impl MockPortShared {
    fn push_inbound(&self, bytes: &[u8]) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed || inner.disconnected {
            return false;
        }
        inner.inbound.extend(bytes.iter().copied());
        self.data_ready.notify_all();
        true
    }

    fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.disconnected = true;
        self.data_ready.notify_all();
    }

    /// Fail with the reason the port is unusable, if any.
    fn check_usable(&self, inner: &MockPortState) -> Result<(), IoError> {
        if inner.disconnected {
            Err(IoError::disconnected(&self.label))
        } else if inner.closed {
            Err(IoError::connection(&self.label, "port closed"))
        } else {
            Ok(())
        }
    }
}

struct MockPort {
    shared: Arc<MockPortShared>,
}

impl PortHandle for MockPort {
    fn configure(&self, params: &LineParams) -> Result<(), IoError> {
        let mut inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        if inner.reject_one_point_five && params.stop_bits == StopBits::OnePointFive {
            return Err(IoError::configuration(&self.shared.label, "1.5 stop bits not supported"));
        }
        params
            .validate()
            .map_err(|e| IoError::configuration(&self.shared.label, e))?;
        inner.params = Some(*params);
        Ok(())
    }

    fn read_chunk(&self, max_len: usize, timeout: Duration) -> Result<Vec<u8>, IoError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.inner.lock();
        loop {
            self.shared.check_usable(&inner)?;
            if !inner.inbound.is_empty() {
                let n = inner.inbound.len().min(max_len);
                return Ok(inner.inbound.drain(..n).collect());
            }
            if self.shared.data_ready.wait_until(&mut inner, deadline).timed_out() {
                return Ok(Vec::new());
            }
        }
    }

    fn write_all(&self, data: &[u8], _timeout: Duration) -> Result<(), IoError> {
        let mut inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        inner.written.extend_from_slice(data);
        Ok(())
    }

    fn set_rts(&self, level: bool) -> Result<(), IoError> {
        let mut inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        inner.rts = level;
        Ok(())
    }

    fn rts(&self) -> Result<bool, IoError> {
        let inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        Ok(inner.rts)
    }

    fn set_dtr(&self, level: bool) -> Result<(), IoError> {
        let mut inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        inner.dtr = level;
        Ok(())
    }

    fn dtr(&self) -> Result<bool, IoError> {
        let inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        Ok(inner.dtr)
    }

    fn status(&self, line: StatusLine) -> Result<bool, IoError> {
        let inner = self.shared.inner.lock();
        self.shared.check_usable(&inner)?;
        if inner.unsupported.contains(&line) {
            return Err(IoError::unsupported(&self.shared.label, line.name()));
        }
        Ok(inner.status.get(&line).copied().unwrap_or(false))
    }

    fn close(&self) -> Result<(), IoError> {
        let mut inner = self.shared.inner.lock();
        inner.closed = true;
        self.shared.data_ready.notify_all();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open(transport: &MockTransport, device_id: DeviceId) -> Box<dyn PortHandle> {
        let info = transport
            .list_devices()
            .unwrap()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .unwrap();
        transport.open_port(&info, DriverKind::CdcAcm).unwrap()
    }

    #[test]
    fn test_attach_assigns_fresh_ids() {
        let transport = MockTransport::new();
        let a = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let b = transport.attach(MockDeviceSpec::new(0x0403, 0x6001).with_id(7));
        let c = transport.attach(MockDeviceSpec::new(0x1a86, 0x7523));
        assert_eq!(a, 1);
        assert_eq!(b, 7);
        assert_eq!(c, 8);
        assert!(transport.detach(a));
        assert!(!transport.detach(a));
        let replug = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        assert_ne!(replug, a);
    }

    #[test]
    fn test_serial_interface_follows_driver() {
        let transport = MockTransport::new();
        let ftdi = transport.attach(MockDeviceSpec::new(0x0403, 0x6001).with_driver(Some(DriverKind::Ftdi)));
        let bare = transport.attach(MockDeviceSpec::new(0x2341, 0x0043).with_driver(None));
        let listed = transport.list_devices().unwrap();
        let has_serial = |id| listed.iter().find(|d| d.device_id == id).unwrap().has_serial_interface;
        assert!(has_serial(ftdi));
        assert!(!has_serial(bare));
    }

    #[test]
    fn test_deliver_and_read_chunk() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        assert!(!transport.deliver(id, b"early"));

        let port = open(&transport, id);
        assert!(transport.deliver(id, b"hello"));
        assert_eq!(port.read_chunk(3, Duration::from_millis(10)).unwrap(), b"hel");
        assert_eq!(port.read_chunk(64, Duration::from_millis(10)).unwrap(), b"lo");
        assert!(port.read_chunk(64, Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_detach_fails_reads() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let port = open(&transport, id);
        transport.detach(id);
        assert!(matches!(
            port.read_chunk(8, Duration::from_millis(10)),
            Err(IoError::Disconnected { .. })
        ));
    }

    #[test]
    fn test_close_rejects_later_calls() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let port = open(&transport, id);
        port.close().unwrap();
        port.close().unwrap();
        assert!(port.write_all(b"x", Duration::from_millis(10)).is_err());
        assert!(!transport.is_port_open(id));
    }

    #[test]
    fn test_status_lines() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x1a86, 0x7523).with_unsupported_line(StatusLine::Ri));
        let port = open(&transport, id);
        transport.set_status(id, StatusLine::Cts, true);
        assert!(port.status(StatusLine::Cts).unwrap());
        assert!(!port.status(StatusLine::Dsr).unwrap());
        assert!(port.status(StatusLine::Ri).unwrap_err().is_unsupported());
    }

    #[test]
    fn test_configure_rejection() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043).rejecting_one_point_five());
        let port = open(&transport, id);
        let params = LineParams::new(9600, 8, StopBits::OnePointFive, crate::io::Parity::None);
        assert!(port.configure(&params).is_err());
        assert_eq!(transport.line_params(id), None);
    }

    #[test]
    fn test_double_open_refused() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let _port = open(&transport, id);
        let info = transport.list_devices().unwrap().remove(0);
        assert!(transport.open_port(&info, DriverKind::CdcAcm).is_err());
        assert_eq!(transport.open_count(id), 1);
    }
}
