//! Error types for the serial-bridge library.

use thiserror::Error;

use crate::types::TransportKind;

/// The main error type for serial-bridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested USB device is not part of the current enumeration.
    #[error("USB device not found: {name}")]
    DeviceNotFound { name: String },

    /// The host refused to prompt for USB access.
    #[error("USB permission denied for {name}")]
    PermissionDenied { name: String },

    /// Opening the transport failed.
    #[error("{reason}")]
    TransportOpenFailed { reason: String },

    /// No connection is open.
    #[error("no connected serial device")]
    NoActiveConnection,

    /// Writing to the active transport failed or timed out.
    #[error("{transport} write failed: {reason}")]
    WriteFailed {
        transport: TransportKind,
        reason: String,
    },

    /// Reading from the active transport failed; fatal to the connection.
    #[error("read failed: {reason}")]
    ReadFailed { reason: String },

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Wraps any error raised while opening a transport as
    /// [`Error::TransportOpenFailed`], keeping the underlying reason.
    #[must_use]
    pub fn into_open_failure(self) -> Self {
        match self {
            Self::TransportOpenFailed { .. } => self,
            Self::Serial(e) => Self::TransportOpenFailed {
                reason: e.description,
            },
            other => Self::TransportOpenFailed {
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for serial-bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_failure_keeps_reason() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such device",
        ))
        .into_open_failure();
        assert!(matches!(err, Error::TransportOpenFailed { ref reason } if reason.contains("no such device")));

        let err = Error::Serial(tokio_serial::Error::new(
            tokio_serial::ErrorKind::NoDevice,
            "device vanished",
        ))
        .into_open_failure();
        assert_eq!(err.to_string(), "device vanished");
    }
}
