// src/events.rs
//
// Signals in both directions:
//   - `BridgeEvent`: produced for the UI collaborator after registry changes
//   - `OsEvent`: consumed from the OS (hot-plug and permission answers) on a
//     single dispatch thread

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crate::devices::DeviceId;
use crate::manager::SerialManager;

// ============================================================================
// UI-facing events
// ============================================================================

/// Why a session went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Explicit `close` call
    Closed,
    /// Device no longer in the live set
    Detached,
    /// Reader hit a hardware error and reconciliation removed the session
    Faulted,
    /// Device was opened again; the old session made way
    Replaced,
    Shutdown,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// Fired after every registry mutation. Carries the connected ids, sorted.
    DeviceListChanged { connected: Vec<DeviceId> },
    SessionOpened { device_id: DeviceId, info: String },
    SessionClosed {
        device_id: DeviceId,
        info: String,
        reason: CloseReason,
    },
}

/// Receiver of UI-facing events. Called without any bridge lock held.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BridgeEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: BridgeEvent) {}
}

/// Forwards events into a channel. A dropped receiver is ignored.
pub struct ChannelSink {
    sender: Mutex<std_mpsc::Sender<BridgeEvent>>,
}

impl ChannelSink {
    pub fn new() -> (Self, std_mpsc::Receiver<BridgeEvent>) {
        let (sender, receiver) = std_mpsc::channel();
        (
            Self {
                sender: Mutex::new(sender),
            },
            receiver,
        )
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: BridgeEvent) {
        let _ = self.sender.lock().send(event);
    }
}

/// Adapts a closure into a sink.
pub struct FnSink<F>(pub F);

impl<F> EventSink for FnSink<F>
where
    F: Fn(BridgeEvent) + Send + Sync,
{
    fn emit(&self, event: BridgeEvent) {
        (self.0)(event)
    }
}

// ============================================================================
// OS-facing events
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OsEvent {
    DeviceAttached(DeviceId),
    DeviceDetached(DeviceId),
    /// Topology changed without detail
    DevicesChanged,
    PermissionResult { device_id: DeviceId, granted: bool },
}

/// Run the OS broadcast thread: every event from `receiver` is handed to the
/// manager in arrival order. The thread exits when the sender side is dropped
/// or the manager is gone.
pub fn spawn_event_loop(
    manager: &Arc<SerialManager>,
    receiver: std_mpsc::Receiver<OsEvent>,
) -> std::io::Result<JoinHandle<()>> {
    let manager: Weak<SerialManager> = Arc::downgrade(manager);
    std::thread::Builder::new()
        .name("serial-os-events".into())
        .spawn(move || {
            tlog!("[events] OS event loop started");
            while let Ok(event) = receiver.recv() {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.handle_os_event(event);
            }
            tlog!("[events] OS event loop stopped");
        })
}

// ============================================================================
// Tests
// ============================================================================
