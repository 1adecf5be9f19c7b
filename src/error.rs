//! Error types for the rbl-ble-central crate.

use thiserror::Error;

use crate::ble::stack::AdapterState;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// The radio is off, unauthorized or unsupported, so the request was refused.
    #[error("Bluetooth stack unavailable: {state}")]
    StackUnavailable {
        /// Adapter state at the time of the request.
        state: AdapterState,
    },

    /// The service was not found in the peripheral's topology.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The characteristic was not found under the requested service.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// No peripheral with this identifier has been discovered.
    #[error("Peripheral not found: {identifier}")]
    PeripheralNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Operation requires an active peripheral but there is none.
    #[error("No active peripheral")]
    NotConnected,

    /// The stack could not establish the connection.
    #[error("Connection failed: {reason}")]
    ConnectFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service or characteristic discovery failed.
    #[error("Discovery failed: {reason}")]
    DiscoveryFailed {
        /// Description of the discovery failure.
        reason: String,
    },

    /// Enabling or disabling notifications failed.
    #[error("Notification state change failed: {reason}")]
    NotifyFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Reading a characteristic value failed.
    #[error("Read failed: {reason}")]
    ReadFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Writing a characteristic value failed.
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// Description of the failure.
        reason: String,
    },

    /// Reading the signal strength failed.
    #[error("RSSI read failed: {reason}")]
    RssiFailed {
        /// Description of the failure.
        reason: String,
    },

    /// The connection to the peripheral was lost.
    #[error("Connection lost")]
    ConnectionLost,

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if this error came from a topology lookup miss.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::PeripheralNotFound { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
