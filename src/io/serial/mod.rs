// src/io/serial/mod.rs
//
// Host USB serial transport.
// Enumerates every attached USB device with nusb and drives the tty/COM port
// the OS created for it through the serialport crate.

pub mod host;
pub(crate) mod utils;

pub use host::HostTransport;
