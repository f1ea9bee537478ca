// src/error.rs
//
// Error type returned by every manager operation. Transport faults are wrapped
// as `Hardware`. A read that times out is not an error: it returns the bytes
// collected so far.

use thiserror::Error;

use crate::devices::DeviceId;
use crate::io::IoError;

/// Convenience alias for results using the bridge error type.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// No live session (or no attached device) for this id
    #[error("no serial session or device for id {0}")]
    NotFound(DeviceId),

    /// Hardware present but no driver matches it
    #[error("device {0} has no compatible serial driver")]
    NoDriver(DeviceId),

    #[error("permission denied for device {0}")]
    PermissionDenied(DeviceId),

    #[error("permission request for device {0} timed out")]
    PermissionTimeout(DeviceId),

    /// Line parameters rejected before reaching the driver
    #[error("invalid line configuration: {0}")]
    Configuration(String),

    #[error("unknown status line '{0}'")]
    UnknownLine(String),

    #[error(transparent)]
    Hardware(#[from] IoError),

    #[error("settings error: {0}")]
    Settings(String),
}

impl BridgeError {
    /// Whether retrying the operation can succeed. Only unsupported hardware
    /// is a permanent condition.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, BridgeError::NoDriver(_))
    }

    /// Whether the failure came from the permission handshake.
    pub fn is_permission(&self) -> bool {
        matches!(
            self,
            BridgeError::PermissionDenied(_) | BridgeError::PermissionTimeout(_)
        )
    }
}
