// src/session/mod.rs
//
// One open serial port bound to one physical device: the port handle, its
// inbound buffer, the current line parameters and the background reader
// thread that moves bytes from the hardware into the buffer.

pub mod buffer;
pub mod registry;

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::devices::{DeviceId, DriverKind};
use crate::io::{IoError, LineParams, PortHandle, StatusLine};
use crate::logging::hex_dump;
use buffer::SessionBuffer;

pub use registry::SessionRegistry;

/// Tuning for the background reader.
#[derive(Clone, Copy, Debug)]
pub struct ReaderConfig {
    pub chunk_size: usize,
    pub poll: Duration,
}

/// Snapshot of a live session for callers and the CLI.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub device_id: DeviceId,
    pub info: String,
    pub driver_name: String,
    pub line: Option<LineParams>,
    pub bytes_received: u64,
    pub in_waiting: usize,
    pub faulted: bool,
}

pub struct Session {
    device_id: DeviceId,
    info: String,
    driver: DriverKind,
    port: Arc<dyn PortHandle>,
    buffer: Arc<SessionBuffer>,
    params: Mutex<Option<LineParams>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    cancel: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    torn_down: AtomicBool,
}

impl Session {
    /// Take ownership of an open port and start its background reader.
    /// On failure the port is closed before returning.
    pub fn start(
        device_id: DeviceId,
        driver: DriverKind,
        info: String,
        port: Box<dyn PortHandle>,
        reader_config: ReaderConfig,
    ) -> Result<Arc<Session>, IoError> {
        let port: Arc<dyn PortHandle> = Arc::from(port);
        let buffer = Arc::new(SessionBuffer::new(info.clone()));
        let cancel = Arc::new(AtomicBool::new(false));
        let faulted = Arc::new(AtomicBool::new(false));

        let spawned = {
            let port = port.clone();
            let buffer = buffer.clone();
            let cancel = cancel.clone();
            let faulted = faulted.clone();
            let label = info.clone();
            std::thread::Builder::new()
                .name(format!("serial-reader-{}", device_id))
                .spawn(move || run_reader(&label, port, buffer, cancel, faulted, reader_config))
        };

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                let _ = port.close();
                return Err(IoError::connection(&info, format!("failed to start reader: {}", e)));
            }
        };

        tlog!("[session:{}] Started reader for device {}", info, device_id);

        Ok(Arc::new(Session {
            device_id,
            info,
            driver,
            port,
            buffer,
            params: Mutex::new(None),
            reader: Mutex::new(Some(handle)),
            cancel,
            faulted,
            torn_down: AtomicBool::new(false),
        }))
    }

    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Driver name plus vendor:product, e.g. `Ftdi 403:6001`
    pub fn info(&self) -> &str {
        &self.info
    }

    /// The reader hit a hardware error; the session is no longer usable.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::SeqCst)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn line_params(&self) -> Option<LineParams> {
        *self.params.lock()
    }

    /// Push line parameters to the chip. The stored parameters only change
    /// when the chip accepts them.
    pub fn configure(&self, params: LineParams) -> Result<(), IoError> {
        let mut current = self.params.lock();
        self.port.configure(&params)?;
        *current = Some(params);
        tlog!("[session:{}] Configured {}", self.info, params);
        Ok(())
    }

    /// Bytes already buffered stay readable after a fault. Once they are
    /// drained, reads fail with `Disconnected` instead of returning empty.
    pub fn read(&self, size: usize, timeout: Duration) -> Result<Vec<u8>, IoError> {
        let data = self.buffer.read(size, timeout);
        if data.is_empty() && size > 0 && self.is_faulted() {
            return Err(IoError::disconnected(&self.info));
        }
        Ok(data)
    }

    pub fn write(&self, data: &[u8], timeout: Duration) -> Result<(), IoError> {
        self.port.write_all(data, timeout).map_err(|e| {
            tlog!(
                "[session:{}] Write of {} bytes failed ({}): {}",
                self.info,
                data.len(),
                e,
                hex_dump(data)
            );
            e
        })
    }

    pub fn in_waiting(&self) -> usize {
        self.buffer.in_waiting()
    }

    pub fn reset_input_buffer(&self) -> usize {
        self.buffer.reset()
    }

    pub fn set_rts(&self, level: bool) -> Result<(), IoError> {
        self.port.set_rts(level)
    }

    pub fn rts(&self) -> Result<bool, IoError> {
        self.port.rts()
    }

    pub fn set_dtr(&self, level: bool) -> Result<(), IoError> {
        self.port.set_dtr(level)
    }

    pub fn dtr(&self) -> Result<bool, IoError> {
        self.port.dtr()
    }

    pub fn status(&self, line: StatusLine) -> Result<bool, IoError> {
        self.port.status(line)
    }

    pub fn snapshot(&self) -> SessionInfo {
        SessionInfo {
            device_id: self.device_id,
            info: self.info.clone(),
            driver_name: self.driver.name().to_string(),
            line: self.line_params(),
            bytes_received: self.buffer.total_received(),
            in_waiting: self.buffer.in_waiting(),
            faulted: self.is_faulted(),
        }
    }

    /// Release the hardware: close the port, stop the reader, then close the
    /// buffer so blocked readers return. Runs once; later calls do nothing.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.store(true, Ordering::SeqCst);
        if let Err(e) = self.port.close() {
            tlog!("[session:{}] Error closing port: {}", self.info, e);
        }

        if let Some(handle) = self.reader.lock().take() {
            if handle.join().is_err() {
                tlog!("[session:{}] Reader thread panicked", self.info);
            }
        }

        self.buffer.close();
        tlog!("[session:{}] Closed device {}", self.info, self.device_id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("device_id", &self.device_id)
            .field("info", &self.info)
            .field("faulted", &self.is_faulted())
            .finish()
    }
}

// ============================================================================
// Reader thread
// ============================================================================

fn run_reader(
    label: &str,
    port: Arc<dyn PortHandle>,
    buffer: Arc<SessionBuffer>,
    cancel: Arc<AtomicBool>,
    faulted: Arc<AtomicBool>,
    config: ReaderConfig,
) {
    while !cancel.load(Ordering::SeqCst) {
        match port.read_chunk(config.chunk_size, config.poll) {
            Ok(bytes) => {
                if !bytes.is_empty() {
                    buffer.push(&bytes);
                }
            }
            Err(e) => {
                // A closed port is the normal way out during teardown
                if !cancel.load(Ordering::SeqCst) {
                    tlog!("[session:{}] Reader stopped: {}", label, e);
                    faulted.store(true, Ordering::SeqCst);
                    buffer.close();
                }
                break;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mock::{MockDeviceSpec, MockTransport};
    use crate::io::{Parity, StopBits, UsbTransport};
    use std::time::Instant;

    const READER: ReaderConfig = ReaderConfig {
        chunk_size: 64,
        poll: Duration::from_millis(10),
    };

    fn start_session(transport: &MockTransport, device_id: DeviceId) -> Arc<Session> {
        let info = transport
            .list_devices()
            .unwrap()
            .into_iter()
            .find(|d| d.device_id == device_id)
            .unwrap();
        let port = transport.open_port(&info, DriverKind::CdcAcm).unwrap();
        Session::start(device_id, DriverKind::CdcAcm, "CdcAcm 2341:43".into(), port, READER).unwrap()
    }

    #[test]
    fn test_reader_moves_bytes_into_buffer() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let session = start_session(&transport, id);

        transport.deliver(id, &[0x41, 0x42]);
        transport.deliver(id, &[0x43]);
        assert_eq!(session.read(3, Duration::from_secs(2)).unwrap(), vec![0x41, 0x42, 0x43]);
        assert_eq!(session.snapshot().bytes_received, 3);
    }

    #[test]
    fn test_configure_records_accepted_params_only() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043).rejecting_one_point_five());
        let session = start_session(&transport, id);

        let good = LineParams::new(9600, 8, StopBits::One, Parity::None);
        session.configure(good).unwrap();
        assert_eq!(session.line_params(), Some(good));

        let bad = LineParams::new(9600, 8, StopBits::OnePointFive, Parity::None);
        assert!(session.configure(bad).is_err());
        assert_eq!(session.line_params(), Some(good));
        assert_eq!(transport.line_params(id), Some(good));
    }

    #[test]
    fn test_teardown_closes_port_and_wakes_reader() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let session = start_session(&transport, id);

        let blocked = {
            let session = session.clone();
            std::thread::spawn(move || session.read(16, Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        session.teardown();
        session.teardown();
        assert!(blocked.join().unwrap().unwrap().is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!transport.is_port_open(id));
        assert!(session.is_torn_down());
        assert!(!session.is_faulted());
    }

    #[test]
    fn test_detach_marks_session_faulted() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let session = start_session(&transport, id);

        transport.detach(id);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !session.is_faulted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(session.is_faulted());
        assert!(session.write(b"x", Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_faulted_session_drains_then_reports_disconnect() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let session = start_session(&transport, id);

        transport.deliver(id, b"last");
        let deadline = Instant::now() + Duration::from_secs(2);
        while session.in_waiting() < 4 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        transport.detach(id);
        while !session.is_faulted() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(session.is_faulted());

        assert_eq!(session.read(16, Duration::from_millis(50)).unwrap(), b"last");
        let started = Instant::now();
        assert!(matches!(
            session.read(16, Duration::from_secs(5)),
            Err(IoError::Disconnected { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(session.read(0, Duration::from_millis(10)).unwrap().is_empty());
    }

    #[test]
    fn test_control_lines_pass_through() {
        let transport = MockTransport::new();
        let id = transport.attach(MockDeviceSpec::new(0x2341, 0x0043));
        let session = start_session(&transport, id);

        session.set_rts(true).unwrap();
        session.set_dtr(false).unwrap();
        assert!(session.rts().unwrap());
        assert!(!session.dtr().unwrap());

        transport.set_status(id, StatusLine::Dsr, true);
        assert!(session.status(StatusLine::Dsr).unwrap());

        session.write(b"AT\r", Duration::from_millis(100)).unwrap();
        assert_eq!(transport.written(id), b"AT\r");
    }
}
