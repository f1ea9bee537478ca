// src/io/error.rs
//
// Transport-level errors. Every variant carries the device label so log lines
// and surfaced messages say which adapter failed.

use thiserror::Error;

/// Error raised by a transport driver or an open port handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("{device}: connection failed: {message}")]
    Connection { device: String, message: String },

    #[error("{device}: configuration rejected: {message}")]
    Configuration { device: String, message: String },

    #[error("{device}: read failed: {message}")]
    Read { device: String, message: String },

    #[error("{device}: write failed: {message}")]
    Write { device: String, message: String },

    #[error("{device}: {operation} is not supported by this hardware")]
    Unsupported { device: String, operation: String },

    #[error("{device}: device disconnected")]
    Disconnected { device: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn configuration(device: &str, message: impl Into<String>) -> Self {
        IoError::Configuration {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(device: &str, operation: impl Into<String>) -> Self {
        IoError::Unsupported {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn disconnected(device: &str) -> Self {
        IoError::Disconnected {
            device: device.to_string(),
        }
    }

    /// True when the hardware lacks the capability (as opposed to failing at it).
    pub fn is_unsupported(&self) -> bool {
        matches!(self, IoError::Unsupported { .. })
    }

    /// The device label this error refers to.
    pub fn device(&self) -> &str {
        match self {
            IoError::Connection { device, .. }
            | IoError::Configuration { device, .. }
            | IoError::Read { device, .. }
            | IoError::Write { device, .. }
            | IoError::Unsupported { device, .. }
            | IoError::Disconnected { device } => device,
        }
    }
}

impl From<IoError> for String {
    fn from(err: IoError) -> Self {
        err.to_string()
    }
}
