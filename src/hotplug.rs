// src/hotplug.rs
//
// Hot-plug handling. `reconcile` diffs the live device set against the
// registry and tears down orphaned sessions. `HotplugWatcher` polls the
// transport on hosts that have no attach/detach broadcast and turns topology
// changes into `OsEvent`s.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::devices::DeviceId;
use crate::events::{CloseReason, OsEvent};
use crate::io::{IoError, UsbTransport};
use crate::session::{Session, SessionRegistry};

/// Ids currently attached according to the transport.
pub fn live_device_ids(transport: &dyn UsbTransport) -> Result<HashSet<DeviceId>, IoError> {
    Ok(transport
        .list_devices()?
        .into_iter()
        .map(|d| d.device_id)
        .collect())
}

/// Remove every session whose device is gone or whose reader has faulted.
/// Teardown happens under the registry lock; the removed sessions are
/// returned with the reason so the caller can notify after the lock is
/// released.
pub fn reconcile(
    transport: &dyn UsbTransport,
    registry: &SessionRegistry,
) -> Result<Vec<(Arc<Session>, CloseReason)>, IoError> {
    let live = live_device_ids(transport)?;
    let removed = registry.retain_live(&live);
    Ok(removed
        .into_iter()
        .map(|session| {
            let reason = if live.contains(&session.device_id()) {
                CloseReason::Faulted
            } else {
                CloseReason::Detached
            };
            tlog!(
                "[hotplug] Closed session {} ({}): {:?}",
                session.device_id(),
                session.info(),
                reason
            );
            (session, reason)
        })
        .collect())
}

/// Attach and detach events between two snapshots, sorted by id.
pub fn diff_device_sets(previous: &HashSet<DeviceId>, current: &HashSet<DeviceId>) -> Vec<OsEvent> {
    let mut detached: Vec<DeviceId> = previous.difference(current).copied().collect();
    let mut attached: Vec<DeviceId> = current.difference(previous).copied().collect();
    detached.sort_unstable();
    attached.sort_unstable();

    detached
        .into_iter()
        .map(OsEvent::DeviceDetached)
        .chain(attached.into_iter().map(OsEvent::DeviceAttached))
        .collect()
}

// ============================================================================
// Polling watcher
// ============================================================================

/// Background thread that polls the transport and reports topology changes.
/// Stopped on drop.
pub struct HotplugWatcher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HotplugWatcher {
    pub fn spawn(
        transport: Arc<dyn UsbTransport>,
        sender: std_mpsc::Sender<OsEvent>,
        period: Duration,
    ) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();

        let handle = std::thread::Builder::new()
            .name("serial-hotplug".into())
            .spawn(move || {
                tlog!("[hotplug] Watcher started (period {:?})", period);
                let mut known = match live_device_ids(transport.as_ref()) {
                    Ok(ids) => ids,
                    Err(e) => {
                        tlog!("[hotplug] Initial enumeration failed: {}", e);
                        HashSet::new()
                    }
                };

                while !stop_flag.load(Ordering::SeqCst) {
                    sleep_unless_stopped(&stop_flag, period);
                    if stop_flag.load(Ordering::SeqCst) {
                        break;
                    }

                    let current = match live_device_ids(transport.as_ref()) {
                        Ok(ids) => ids,
                        Err(e) => {
                            tlog!("[hotplug] Enumeration failed: {}", e);
                            continue;
                        }
                    };

                    let changes = diff_device_sets(&known, &current);
                    known = current;
                    for event in changes {
                        if sender.send(event).is_err() {
                            tlog!("[hotplug] Event receiver gone, stopping watcher");
                            return;
                        }
                    }
                }
                tlog!("[hotplug] Watcher stopped");
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HotplugWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `period` in short slices so `stop` takes effect promptly.
fn sleep_unless_stopped(stop: &AtomicBool, period: Duration) {
    let deadline = Instant::now() + period;
    loop {
        let now = Instant::now();
        if now >= deadline || stop.load(Ordering::SeqCst) {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}

// ============================================================================
// Tests
// ============================================================================
