// src/surface.rs
//
// Integer-coded synchronous call surface for the foreign caller (protocol
// engine over FFI, UI). Thin wrapper over SerialManager: every call maps the
// typed result onto the status codes the caller expects and logs failures.
//
// Codes:
//   open            1 opened, 0 no such device / no driver, -1 permission or hardware failure
//   close           1 removed, 0 not found
//   configure       1 ok, 0 not found, -1 rejected
//   write           0 ok, -1 not found, -2 hardware error
//   set_rts/set_dtr 0 ok, -1 not found or failed
//   status          1 high, 0 low/unavailable/unknown line, -1 not found
//   request_access  1 prompt issued or already granted, 0 no such device

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::devices::{Device, DeviceId};
use crate::error::BridgeError;
use crate::io::{LineParams, Parity, StopBits};
use crate::manager::SerialManager;

#[derive(Serialize)]
struct DeviceListJson<'a> {
    list: &'a [Device],
}

#[derive(Clone)]
pub struct CallSurface {
    manager: Arc<SerialManager>,
}

impl CallSurface {
    pub fn new(manager: Arc<SerialManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<SerialManager> {
        &self.manager
    }

    pub fn list_devices(&self) -> Vec<Device> {
        self.manager.list_devices().unwrap_or_else(|e| {
            tlog!("[surface] list_devices failed: {}", e);
            Vec::new()
        })
    }

    /// `{"list":[{"id":..,"vendorId":..,"productId":..,"driverName":..,"isConnected":..}]}`
    pub fn list_devices_json(&self) -> String {
        let devices = self.list_devices();
        serde_json::to_string(&DeviceListJson { list: &devices }).unwrap_or_else(|e| {
            tlog!("[surface] Failed to serialize device list: {}", e);
            r#"{"list":[]}"#.to_string()
        })
    }

    pub fn request_access(&self, device_id: DeviceId) -> i32 {
        match self.manager.request_access(device_id) {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(e) => {
                tlog!("[surface] request_access({}) failed: {}", device_id, e);
                0
            }
        }
    }

    pub fn open(&self, device_id: DeviceId) -> i32 {
        match self.manager.open(device_id) {
            Ok(_) => 1,
            Err(e) if e.is_permission() => {
                tlog!("[surface] open({}) not permitted: {}", device_id, e);
                -1
            }
            Err(e) => {
                tlog!("[surface] open({}) failed: {}", device_id, e);
                match e {
                    BridgeError::NotFound(_) | BridgeError::NoDriver(_) => 0,
                    _ => -1,
                }
            }
        }
    }

    pub fn close(&self, device_id: DeviceId) -> i32 {
        if self.manager.close(device_id) {
            1
        } else {
            0
        }
    }

    /// `stop_bits` is 1, 1.5 or 2; `parity` is 'N', 'E' or 'O'.
    pub fn configure(&self, device_id: DeviceId, baud_rate: u32, data_bits: u8, stop_bits: f32, parity: char) -> i32 {
        if !self.manager.is_connected(device_id) {
            tlog!("[surface] configure: no session for device {}", device_id);
            return 0;
        }
        let (Some(stop_bits), Some(parity)) = (StopBits::from_f32(stop_bits), Parity::from_char(parity)) else {
            tlog!(
                "[surface] configure({}): unsupported framing stop_bits={} parity={:?}",
                device_id,
                stop_bits,
                parity
            );
            return -1;
        };

        let params = LineParams::new(baud_rate, data_bits, stop_bits, parity);
        match self.manager.configure(device_id, params) {
            Ok(()) => 1,
            Err(BridgeError::NotFound(_)) => 0,
            Err(e) => {
                tlog!("[surface] configure({}, {}) failed: {}", device_id, params, e);
                -1
            }
        }
    }

    /// Empty on timeout or when the device has no session.
    pub fn read(&self, device_id: DeviceId, size: usize, timeout_ms: u64) -> Vec<u8> {
        self.manager
            .read(device_id, size, Duration::from_millis(timeout_ms))
            .unwrap_or_else(|e| {
                tlog!("[surface] read({}) failed: {}", device_id, e);
                Vec::new()
            })
    }

    pub fn write(&self, device_id: DeviceId, data: &[u8], timeout_ms: u64) -> i32 {
        match self.manager.write(device_id, data, Duration::from_millis(timeout_ms)) {
            Ok(()) => 0,
            Err(BridgeError::NotFound(_)) => -1,
            Err(e) => {
                tlog!("[surface] write({}) failed: {}", device_id, e);
                -2
            }
        }
    }

    pub fn set_rts(&self, device_id: DeviceId, level: bool) -> i32 {
        Self::code(device_id, "set_rts", self.manager.set_rts(device_id, level))
    }

    pub fn get_rts(&self, device_id: DeviceId) -> bool {
        self.manager.rts(device_id).unwrap_or(false)
    }

    pub fn set_dtr(&self, device_id: DeviceId, level: bool) -> i32 {
        Self::code(device_id, "set_dtr", self.manager.set_dtr(device_id, level))
    }

    pub fn get_dtr(&self, device_id: DeviceId) -> bool {
        self.manager.dtr(device_id).unwrap_or(false)
    }

    pub fn status(&self, device_id: DeviceId, line: &str) -> i32 {
        match self.manager.status(device_id, line) {
            Ok(state) => {
                if state.is_high() {
                    1
                } else {
                    0
                }
            }
            Err(BridgeError::NotFound(_)) => -1,
            Err(e) => {
                tlog!("[surface] status({}, {}) failed: {}", device_id, line, e);
                0
            }
        }
    }

    pub fn in_waiting(&self, device_id: DeviceId) -> usize {
        self.manager.in_waiting(device_id).unwrap_or(0)
    }

    pub fn reset_input_buffer(&self, device_id: DeviceId) -> bool {
        self.manager.reset_input_buffer(device_id).is_ok()
    }

    fn code(device_id: DeviceId, call: &str, result: Result<(), BridgeError>) -> i32 {
        match result {
            Ok(()) => 0,
            Err(e) => {
                tlog!("[surface] {}({}) failed: {}", call, device_id, e);
                -1
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
