//! Error types for the spp-session crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the BlueZ backend.
    #[cfg(feature = "bluez")]
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    /// No Bluetooth radio is present on this system.
    #[error("Bluetooth not supported")]
    RadioUnavailable,

    /// The address is malformed or does not resolve to a remote device.
    #[error("Invalid device address: {address}")]
    InvalidAddress {
        /// The address that was rejected.
        address: String,
    },

    /// Failed to establish the RFCOMM connection.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of the underlying radio error.
        reason: String,
    },

    /// A connection is already live and the session is configured to reject
    /// a second connect.
    #[error("Already connected to {address}")]
    AlreadyConnected {
        /// Address of the live connection.
        address: String,
    },

    /// Writing or flushing the outbound stream failed. The session has been
    /// reset to idle.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of the transport error.
        reason: String,
    },

    /// The scan did not finish within the configured timeout.
    #[error("Discovery did not finish within {timeout_ms} ms")]
    ScanTimeout {
        /// The timeout that elapsed, in milliseconds.
        timeout_ms: u64,
    },

    /// The radio stopped delivering events before discovery finished.
    #[error("Discovery interrupted before it finished")]
    ScanInterrupted,

    /// A payload value does not fit in a single byte.
    #[error("Value {value} at index {index} is not a byte")]
    InvalidByte {
        /// Position of the offending value in the payload.
        index: usize,
        /// The offending value.
        value: i64,
    },

    /// The command method is not known.
    #[error("Method not implemented: {method}")]
    NotImplemented {
        /// The method name that was received.
        method: String,
    },

    /// A required command argument was not supplied.
    #[error("Missing argument: {name}")]
    MissingArgument {
        /// The name of the missing argument.
        name: &'static str,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable error code reported across the command boundary.
    pub fn code(&self) -> &'static str {
        match self {
            #[cfg(feature = "bluez")]
            Self::Bluetooth(_) => "BLUETOOTH",
            Self::RadioUnavailable => "NO_BT",
            Self::InvalidAddress { .. } => "INVALID_ADDRESS",
            Self::ConnectFailed { .. } => "CONNECT_FAIL",
            Self::AlreadyConnected { .. } => "ALREADY_CONNECTED",
            Self::WriteFailed { .. } => "WRITE_FAIL",
            Self::ScanTimeout { .. } => "SCAN_TIMEOUT",
            Self::ScanInterrupted => "SCAN_INTERRUPTED",
            Self::InvalidByte { .. } => "INVALID_BYTE",
            Self::NotImplemented { .. } => "NOT_IMPLEMENTED",
            Self::MissingArgument { .. } => "MISSING_ARGUMENT",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Whether calling the same operation again may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed { .. }
                | Self::WriteFailed { .. }
                | Self::ScanTimeout { .. }
                | Self::ScanInterrupted
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::RadioUnavailable.code(), "NO_BT");
        assert_eq!(
            Error::ConnectFailed {
                reason: "refused".into()
            }
            .code(),
            "CONNECT_FAIL"
        );
        assert_eq!(
            Error::MissingArgument { name: "address" }.code(),
            "MISSING_ARGUMENT"
        );
    }

    #[test]
    fn test_error_display() {
        let err = Error::InvalidByte {
            index: 2,
            value: 300,
        };
        assert_eq!(err.to_string(), "Value 300 at index 2 is not a byte");
        assert_eq!(
            Error::RadioUnavailable.to_string(),
            "Bluetooth not supported"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::ConnectFailed {
            reason: String::new()
        }
        .is_transient());
        assert!(!Error::RadioUnavailable.is_transient());
        assert!(!Error::InvalidAddress {
            address: "x".into()
        }
        .is_transient());
    }
}
