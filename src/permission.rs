// src/permission.rs
//
// Turns the asynchronous OS permission answer into a bounded blocking wait.
// Each device has its own pending slot, so concurrent opens of different
// devices never see each other's answers. Opens of the same device share the
// prompt that is already on screen.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::devices::DeviceId;
use crate::error::BridgeError;
use crate::io::IoError;

struct PendingGrant {
    result: Mutex<Option<bool>>,
    answered: Condvar,
}

impl PendingGrant {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            answered: Condvar::new(),
        }
    }
}

pub struct PermissionGate {
    pending: Mutex<HashMap<DeviceId, Arc<PendingGrant>>>,
    timeout: Duration,
}

impl PermissionGate {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the OS answers for `device_id` or the timeout expires.
    ///
    /// The first caller for a device runs `request` to raise the prompt; later
    /// callers for the same device wait on that prompt. `request` runs without
    /// the gate lock held.
    pub fn acquire<F>(&self, device_id: DeviceId, request: F) -> Result<(), BridgeError>
    where
        F: FnOnce() -> Result<(), IoError>,
    {
        let (grant, is_first) = {
            let mut pending = self.pending.lock();
            match pending.get(&device_id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let grant = Arc::new(PendingGrant::new());
                    pending.insert(device_id, grant.clone());
                    (grant, true)
                }
            }
        };

        if is_first {
            tlog!("[permission] Requesting access to device {}", device_id);
            if let Err(e) = request() {
                self.forget(device_id, &grant);
                // Wake anyone who joined while the request was being issued
                self.answer(&grant, false);
                return Err(BridgeError::Hardware(e));
            }
        } else {
            tlog!("[permission] Joining pending request for device {}", device_id);
        }

        let deadline = Instant::now() + self.timeout;
        let mut result = grant.result.lock();
        while result.is_none() {
            if grant.answered.wait_until(&mut result, deadline).timed_out() {
                break;
            }
        }
        let outcome = *result;
        drop(result);

        match outcome {
            Some(true) => Ok(()),
            Some(false) => Err(BridgeError::PermissionDenied(device_id)),
            None => {
                self.forget(device_id, &grant);
                tlog!(
                    "[permission] No answer for device {} within {:?}",
                    device_id,
                    self.timeout
                );
                Err(BridgeError::PermissionTimeout(device_id))
            }
        }
    }

    /// Deliver the OS answer. Returns false when nobody is waiting for this
    /// device, e.g. the answer arrived after the wait timed out.
    pub fn release(&self, device_id: DeviceId, granted: bool) -> bool {
        let grant = self.pending.lock().remove(&device_id);
        match grant {
            Some(grant) => {
                tlog!(
                    "[permission] Device {} {}",
                    device_id,
                    if granted { "granted" } else { "denied" }
                );
                self.answer(&grant, granted);
                true
            }
            None => {
                tlog!(
                    "[permission] Ignoring late answer for device {} (granted={})",
                    device_id,
                    granted
                );
                false
            }
        }
    }

    pub fn is_pending(&self, device_id: DeviceId) -> bool {
        self.pending.lock().contains_key(&device_id)
    }

    fn answer(&self, grant: &PendingGrant, granted: bool) {
        let mut result = grant.result.lock();
        if result.is_none() {
            *result = Some(granted);
        }
        grant.answered.notify_all();
    }

    /// Drop the slot for `device_id` if it still belongs to `grant`.
    fn forget(&self, device_id: DeviceId, grant: &Arc<PendingGrant>) {
        let mut pending = self.pending.lock();
        if pending
            .get(&device_id)
            .map(|current| Arc::ptr_eq(current, grant))
            .unwrap_or(false)
        {
            pending.remove(&device_id);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
