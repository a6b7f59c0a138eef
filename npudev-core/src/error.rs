//! Error types for device discovery, allocation and telemetry

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Type alias for `Result<T, DeviceError>`
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Errors that can occur while scanning, resolving or monitoring devices
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The device namespace could not be read
    #[error("Failed to scan device namespace {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Identification metadata of a device is missing or unrecognized
    #[error("Unknown architecture for npu{device_index}: {detail}")]
    UnknownArchitecture { device_index: u8, detail: String },

    /// A textual selector or a configuration is malformed
    #[error("Invalid device specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    /// The topology cannot satisfy a structured request, busy or not
    #[error("Insufficient devices for {config}: requested {requested}, topology offers {available}")]
    InsufficientDevices {
        config: String,
        requested: u8,
        available: usize,
    },

    /// Every viable candidate for a requested unit is exclusively held
    #[error("Device {name} found but still in use")]
    DeviceBusy { name: String },

    /// A named device or device file does not exist
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    /// A management attribute is missing or holds an unexpected value
    #[error("Failed to read {attribute} of npu{device_index}: {reason}")]
    Metadata {
        device_index: u8,
        attribute: String,
        reason: String,
    },

    /// A sensor category could not be enumerated
    #[error("Hwmon error on npu{device_index}: {cause}")]
    Hwmon { device_index: u8, cause: String },

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl DeviceError {
    pub(crate) fn invalid_specifier<S: ToString, R: ToString>(specifier: S, reason: R) -> Self {
        DeviceError::InvalidSpecifier {
            specifier: specifier.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn device_busy<S: ToString>(name: S) -> Self {
        DeviceError::DeviceBusy {
            name: name.to_string(),
        }
    }

    pub(crate) fn metadata<A: ToString, R: ToString>(
        device_index: u8,
        attribute: A,
        reason: R,
    ) -> Self {
        DeviceError::Metadata {
            device_index,
            attribute: attribute.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn hwmon<S: ToString>(device_index: u8, cause: S) -> Self {
        DeviceError::Hwmon {
            device_index,
            cause: cause.to_string(),
        }
    }

    /// Whether a polling caller may retry the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeviceError::DeviceBusy { .. } | DeviceError::Scan { .. })
    }
}

impl From<tokio::task::JoinError> for DeviceError {
    fn from(e: tokio::task::JoinError) -> Self {
        DeviceError::Other(format!("blocking task failed: {}", e))
    }
}
