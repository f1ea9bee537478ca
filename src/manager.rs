// src/manager.rs
//
// SerialManager: the owned service object behind the call surface. Holds the
// transport, the session registry and the permission gate, and implements
// every caller operation with typed results.
//
// Threading:
//   - caller threads run the operations below concurrently
//   - each session has its own reader thread (see session/mod.rs)
//   - OS events (permission answers, hot-plug) arrive through
//     `handle_os_event`, normally from the events::spawn_event_loop thread
//
// Events are emitted after the registry lock has been released.

use std::sync::Arc;
use std::time::Duration;

use crate::devices::{session_label, Device, DeviceId, DriverKind, WILDCARD_DEVICE_ID};
use crate::error::{BridgeError, BridgeResult};
use crate::events::{BridgeEvent, CloseReason, EventSink, NullSink, OsEvent};
use crate::hotplug;
use crate::io::{IoError, LineParams, LineState, StatusLine, UsbDeviceInfo, UsbTransport};
use crate::permission::PermissionGate;
use crate::session::{ReaderConfig, Session, SessionInfo, SessionRegistry};
use crate::settings::BridgeSettings;

pub struct SerialManager {
    transport: Arc<dyn UsbTransport>,
    registry: SessionRegistry,
    gate: PermissionGate,
    events: Arc<dyn EventSink>,
    settings: BridgeSettings,
}

impl SerialManager {
    pub fn new(transport: Arc<dyn UsbTransport>, settings: BridgeSettings) -> Self {
        Self::with_event_sink(transport, settings, Arc::new(NullSink))
    }

    pub fn with_event_sink(
        transport: Arc<dyn UsbTransport>,
        settings: BridgeSettings,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            gate: PermissionGate::new(settings.permission_timeout()),
            registry: SessionRegistry::new(),
            transport,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    pub fn transport(&self) -> &Arc<dyn UsbTransport> {
        &self.transport
    }

    // ========================================================================
    // Enumeration and access
    // ========================================================================

    /// Every attached device, including unsupported hardware (empty driver
    /// name). No side effects.
    pub fn list_devices(&self) -> BridgeResult<Vec<Device>> {
        let attached = self.transport.list_devices()?;
        let connected = self.registry.connected_ids();
        Ok(attached
            .iter()
            .map(|info| Device {
                device_id: info.device_id,
                vendor_id: info.vendor_id,
                product_id: info.product_id,
                driver_name: self
                    .transport
                    .probe(info)
                    .map(|driver| driver.name().to_string())
                    .unwrap_or_default(),
                is_connected: connected.contains(&info.device_id),
            })
            .collect())
    }

    /// Raise the OS permission prompt without waiting for the answer.
    /// `Ok(true)` when access is already granted or the prompt was issued.
    pub fn request_access(&self, device_id: DeviceId) -> BridgeResult<bool> {
        let device = self.find_attached(device_id)?;
        if self.transport.has_permission(&device) {
            return Ok(true);
        }
        tlog!("[serial:access] Requesting permission for device {}", device.device_id);
        self.transport.request_permission(&device)?;
        Ok(true)
    }

    /// Deliver an OS permission answer to whoever waits for it.
    pub fn on_permission_result(&self, device_id: DeviceId, granted: bool) -> bool {
        self.gate.release(device_id, granted)
    }

    // ========================================================================
    // Session lifecycle
    // ========================================================================

    /// Open a session. Id 0 opens the first attached device with a driver.
    /// Returns the real device id of the new session.
    pub fn open(&self, device_id: DeviceId) -> BridgeResult<DeviceId> {
        let device = self.resolve_for_open(device_id)?;
        let real_id = device.device_id;

        if !self.transport.has_permission(&device) {
            let transport = self.transport.clone();
            let request_device = device.clone();
            self.gate
                .acquire(real_id, move || transport.request_permission(&request_device))?;
        }

        let Some(driver) = self.transport.probe(&device) else {
            tlog!(
                "[serial:open] No driver for device {} ({:04x}:{:04x})",
                real_id,
                device.vendor_id,
                device.product_id
            );
            return Err(BridgeError::NoDriver(real_id));
        };
        let info = session_label(driver, device.vendor_id, device.product_id);

        // The old port must be released before the hardware can be claimed again
        let removed_previous = match self.registry.remove(real_id) {
            Some(previous) => {
                tlog!("[serial:open] Replacing existing session for device {}", real_id);
                self.emit_closed(&previous, CloseReason::Replaced);
                true
            }
            None => false,
        };

        let session = match self.start_session(&device, driver, &info) {
            Ok(session) => session,
            Err(e) => {
                if removed_previous {
                    self.emit_list_changed();
                }
                return Err(e);
            }
        };

        let replaced = self
            .registry
            .insert(session, device_id == WILDCARD_DEVICE_ID);
        if let Some(previous) = replaced {
            self.emit_closed(&previous, CloseReason::Replaced);
        }

        tlog!("[serial:open] Opened {} as device {}", info, real_id);
        self.events.emit(BridgeEvent::SessionOpened {
            device_id: real_id,
            info,
        });
        self.emit_list_changed();
        Ok(real_id)
    }

    /// Close a session. `false` when there was nothing to close.
    pub fn close(&self, device_id: DeviceId) -> bool {
        match self.registry.remove(device_id) {
            Some(session) => {
                self.emit_closed(&session, CloseReason::Closed);
                self.emit_list_changed();
                true
            }
            None => {
                tlog!("[serial:close] No session for device {}", device_id);
                false
            }
        }
    }

    /// Drop sessions whose device is gone or whose reader faulted.
    /// Returns the number of sessions closed.
    pub fn reconcile(&self) -> BridgeResult<usize> {
        let removed = hotplug::reconcile(self.transport.as_ref(), &self.registry)?;
        for (session, reason) in &removed {
            self.emit_closed(session, *reason);
        }
        self.emit_list_changed();
        Ok(removed.len())
    }

    pub fn handle_os_event(&self, event: OsEvent) {
        match event {
            OsEvent::PermissionResult { device_id, granted } => {
                self.on_permission_result(device_id, granted);
            }
            OsEvent::DeviceAttached(_) | OsEvent::DeviceDetached(_) | OsEvent::DevicesChanged => {
                tlog!("[hotplug] {:?}", event);
                if let Err(e) = self.reconcile() {
                    tlog!("[hotplug] Reconciliation failed: {}", e);
                }
            }
        }
    }

    /// Tear down every live session.
    pub fn shutdown(&self) {
        let drained = self.registry.drain_all();
        if drained.is_empty() {
            return;
        }
        for session in &drained {
            self.emit_closed(session, CloseReason::Shutdown);
        }
        tlog!("[serial] Shut down {} session(s)", drained.len());
        self.emit_list_changed();
    }

    pub fn session_info(&self, device_id: DeviceId) -> Option<SessionInfo> {
        self.registry.get(device_id).map(|session| session.snapshot())
    }

    pub fn is_connected(&self, device_id: DeviceId) -> bool {
        self.registry.is_connected(device_id)
    }

    // ========================================================================
    // Data path
    // ========================================================================

    pub fn configure(&self, device_id: DeviceId, params: LineParams) -> BridgeResult<()> {
        let session = self.session(device_id)?;
        params.validate().map_err(BridgeError::Configuration)?;
        session.configure(params).map_err(|e| match e {
            IoError::Configuration { .. } => BridgeError::Configuration(e.to_string()),
            other => BridgeError::Hardware(other),
        })
    }

    /// Up to `size` bytes. Fewer (or none) when `timeout` passes first.
    /// A faulted session with nothing left buffered reports `Hardware`.
    pub fn read(&self, device_id: DeviceId, size: usize, timeout: Duration) -> BridgeResult<Vec<u8>> {
        let session = self.session(device_id)?;
        Ok(session.read(size, timeout)?)
    }

    /// A zero timeout uses the configured default.
    pub fn write(&self, device_id: DeviceId, data: &[u8], timeout: Duration) -> BridgeResult<()> {
        let session = self.session(device_id)?;
        let timeout = if timeout.is_zero() {
            self.settings.write_timeout()
        } else {
            timeout
        };
        session.write(data, timeout)?;
        Ok(())
    }

    pub fn in_waiting(&self, device_id: DeviceId) -> BridgeResult<usize> {
        Ok(self.session(device_id)?.in_waiting())
    }

    /// Returns the number of bytes discarded.
    pub fn reset_input_buffer(&self, device_id: DeviceId) -> BridgeResult<usize> {
        Ok(self.session(device_id)?.reset_input_buffer())
    }

    // ========================================================================
    // Control and status lines
    // ========================================================================

    pub fn set_rts(&self, device_id: DeviceId, level: bool) -> BridgeResult<()> {
        Ok(self.session(device_id)?.set_rts(level)?)
    }

    pub fn rts(&self, device_id: DeviceId) -> BridgeResult<bool> {
        Ok(self.session(device_id)?.rts()?)
    }

    pub fn set_dtr(&self, device_id: DeviceId, level: bool) -> BridgeResult<()> {
        Ok(self.session(device_id)?.set_dtr(level)?)
    }

    pub fn dtr(&self, device_id: DeviceId) -> BridgeResult<bool> {
        Ok(self.session(device_id)?.dtr()?)
    }

    /// Sample `cts`, `dsr`, `cd` or `ri`. Lines the chip cannot report come
    /// back as `Unavailable`.
    pub fn status(&self, device_id: DeviceId, line: &str) -> BridgeResult<LineState> {
        let session = self.session(device_id)?;
        let line: StatusLine = line
            .parse()
            .map_err(|_| BridgeError::UnknownLine(line.to_string()))?;
        match session.status(line) {
            Ok(level) => Ok(LineState::from_level(level)),
            Err(e) if e.is_unsupported() => {
                tlog!("[serial:status] {}", e);
                Ok(LineState::Unavailable)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn session(&self, device_id: DeviceId) -> BridgeResult<Arc<Session>> {
        self.registry
            .get(device_id)
            .ok_or(BridgeError::NotFound(device_id))
    }

    fn find_attached(&self, device_id: DeviceId) -> BridgeResult<UsbDeviceInfo> {
        self.transport
            .list_devices()?
            .into_iter()
            .find(|d| d.device_id == device_id)
            .ok_or(BridgeError::NotFound(device_id))
    }

    /// Id 0 picks the first attached device a driver can handle.
    fn resolve_for_open(&self, device_id: DeviceId) -> BridgeResult<UsbDeviceInfo> {
        if device_id != WILDCARD_DEVICE_ID {
            return self.find_attached(device_id);
        }
        self.transport
            .list_devices()?
            .into_iter()
            .find(|d| self.transport.probe(d).is_some())
            .ok_or(BridgeError::NotFound(WILDCARD_DEVICE_ID))
    }

    /// Claim the port, start the reader and push the default line.
    fn start_session(
        &self,
        device: &UsbDeviceInfo,
        driver: DriverKind,
        info: &str,
    ) -> BridgeResult<Arc<Session>> {
        let port = self.transport.open_port(device, driver).map_err(|e| {
            tlog!("[serial:open] Failed to open {}: {}", info, e);
            BridgeError::Hardware(e)
        })?;

        let session = Session::start(device.device_id, driver, info.to_string(), port, self.reader_config())?;
        if let Err(e) = session.configure(self.settings.default_line) {
            tlog!(
                "[serial:open] {} rejected default line {}: {}",
                info,
                self.settings.default_line,
                e
            );
        }
        Ok(session)
    }

    fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            chunk_size: self.settings.read_chunk_size.max(1),
            poll: self.settings.reader_poll(),
        }
    }

    fn emit_closed(&self, session: &Session, reason: CloseReason) {
        self.events.emit(BridgeEvent::SessionClosed {
            device_id: session.device_id(),
            info: session.info().to_string(),
            reason,
        });
    }

    fn emit_list_changed(&self) {
        let mut connected: Vec<DeviceId> = self.registry.connected_ids().into_iter().collect();
        connected.sort_unstable();
        self.events.emit(BridgeEvent::DeviceListChanged { connected });
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Tests
// ============================================================================
