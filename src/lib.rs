// src/lib.rs
//
// USB serial session manager: bridges hot-pluggable USB serial adapters to a
// blocking open/read/write/configure call surface.

#[macro_use]
mod logging;

pub mod devices;
pub mod error;
pub mod events;
pub mod hotplug;
pub mod io;
pub mod manager;
pub mod permission;
pub mod session;
pub mod settings;
pub mod surface;

pub use devices::{Device, DeviceId, DriverKind, WILDCARD_DEVICE_ID};
pub use error::{BridgeError, BridgeResult};
pub use events::{BridgeEvent, CloseReason, EventSink, OsEvent};
pub use io::{LineParams, LineState, Parity, StatusLine, StopBits};
pub use logging::{hex_dump, init_file_logging, stop_file_logging};
pub use manager::SerialManager;
pub use settings::BridgeSettings;
pub use surface::CallSurface;
