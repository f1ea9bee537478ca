// src/io/serial/utils.rs
//
// Conversions from our line parameter types to the serialport crate's types.

use serialport::{DataBits, Parity as SpParity, StopBits as SpStopBits};

use crate::io::{Parity, StopBits};

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert our Parity enum to serialport crate's Parity type
pub fn to_serialport_parity(p: Parity) -> SpParity {
    match p {
        Parity::None => SpParity::None,
        Parity::Odd => SpParity::Odd,
        Parity::Even => SpParity::Even,
    }
}

/// Convert data bits count to serialport crate's DataBits type.
/// `None` for counts no UART supports.
pub fn to_serialport_data_bits(bits: u8) -> Option<DataBits> {
    match bits {
        5 => Some(DataBits::Five),
        6 => Some(DataBits::Six),
        7 => Some(DataBits::Seven),
        8 => Some(DataBits::Eight),
        _ => None,
    }
}

/// Convert stop bits to serialport crate's StopBits type.
/// serialport has no 1.5 stop bit setting, so that maps to `None`.
pub fn to_serialport_stop_bits(bits: StopBits) -> Option<SpStopBits> {
    match bits {
        StopBits::One => Some(SpStopBits::One),
        StopBits::Two => Some(SpStopBits::Two),
        StopBits::OnePointFive => None,
    }
}

/// Whether a serialport error means the device went away.
pub fn is_disconnect(err: &serialport::Error) -> bool {
    match err.kind() {
        serialport::ErrorKind::NoDevice => true,
        serialport::ErrorKind::Io(kind) => is_disconnect_io(kind),
        _ => false,
    }
}

/// Whether an I/O error kind from a port read/write means the device went away.
pub fn is_disconnect_io(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::PermissionDenied
    )
}

// ============================================================================
// Tests
// ============================================================================
