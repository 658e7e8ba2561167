//! Error types for the ble-telemetry-link crate.

use thiserror::Error;

use crate::ble::connection::ConnectionState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// A device scan failed.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// No device with the given display name was found in the last scan.
    #[error("Device not found: {name}")]
    DeviceNotFound {
        /// The display name that was searched for.
        name: String,
    },

    /// The device was found but its platform identity is unusable.
    #[error("Not a valid device: {name}")]
    InvalidDevice {
        /// The display name of the device.
        name: String,
    },

    /// A connection was requested before any device was selected.
    #[error("No device selected")]
    NoDeviceSelected,

    /// Operation requires a connection but no device is connected.
    #[error("Device not connected")]
    NotConnected,

    /// The session is not in a state that allows the operation.
    #[error("Session not ready (state: {state})")]
    NotReady {
        /// The state the session was in.
        state: ConnectionState,
    },

    /// Service not found in the catalog.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found in the catalog.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// The platform reports the characteristic handle as invalid.
    #[error("Invalid characteristic handle: {uuid}")]
    InvalidHandle {
        /// The UUID of the characteristic.
        uuid: String,
    },

    /// A write was requested but no TX characteristic is selected.
    #[error("No TX characteristic selected")]
    NoWriteTarget,

    /// A UUID string could not be parsed.
    #[error("Invalid UUID: {value}")]
    InvalidUuid {
        /// The text that failed to parse.
        value: String,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// The session runtime has stopped and no longer accepts commands.
    #[error("Session closed")]
    SessionClosed,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons a device scan can fail.
///
/// The `Display` text is the line shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The adapter is switched off.
    #[error("The Bluetooth adaptor is powered off, power it on before doing discovery.")]
    PoweredOff,

    /// Reading from or writing to the adapter failed.
    #[error("Writing or reading from the device resulted in an error.")]
    InputOutput,

    /// Any other failure, carried by its symbolic name.
    #[error("Error: {0}")]
    Other(String),
}

impl ScanError {
    /// Classify a backend error into a scan failure.
    pub fn from_btleplug(error: &btleplug::Error) -> Self {
        use btleplug::Error as BtError;

        match error {
            BtError::PermissionDenied => Self::Other("PermissionDenied".to_string()),
            BtError::NotSupported(_) => Self::Other("UnsupportedPlatformError".to_string()),
            BtError::TimedOut(_) => Self::InputOutput,
            BtError::RuntimeError(_) | BtError::Other(_) => Self::InputOutput,
            BtError::DeviceNotFound => Self::Other("DeviceNotFound".to_string()),
            BtError::NotConnected => Self::Other("NotConnected".to_string()),
            _ => Self::Other("UnknownError".to_string()),
        }
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::InvalidUuid {
            value: e.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_error_messages() {
        assert_eq!(
            ScanError::PoweredOff.to_string(),
            "The Bluetooth adaptor is powered off, power it on before doing discovery."
        );
        assert_eq!(
            ScanError::InputOutput.to_string(),
            "Writing or reading from the device resulted in an error."
        );
        assert_eq!(
            ScanError::Other("UnknownDiscoveryError".into()).to_string(),
            "Error: UnknownDiscoveryError"
        );
    }

    #[test]
    fn test_scan_error_from_btleplug() {
        assert_eq!(
            ScanError::from_btleplug(&btleplug::Error::PermissionDenied),
            ScanError::Other("PermissionDenied".into())
        );
        assert_eq!(
            ScanError::from_btleplug(&btleplug::Error::RuntimeError("dbus".into())),
            ScanError::InputOutput
        );
    }

    #[test]
    fn test_scan_error_is_transparent() {
        let err: Error = ScanError::PoweredOff.into();
        assert_eq!(err.to_string(), ScanError::PoweredOff.to_string());
    }
}
