//! Platform Bluetooth stack contract.
//!
//! The session never talks to a radio directly. Every capability it needs is
//! requested through [`BleStack`]; requests return immediately and their
//! completions come back later as [`StackEvent`](crate::session::StackEvent)s
//! on the same serial context.

use std::time::Duration;

use btleplug::api::WriteType;
use uuid::Uuid;

use crate::ble::topology::GattService;
use crate::error::Result;

/// Power/authorization state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AdapterState {
    /// State not yet reported by the platform.
    #[default]
    Unknown,
    /// The platform connection to the radio is being reset.
    Resetting,
    /// The device has no BLE central support.
    Unsupported,
    /// The application is not allowed to use Bluetooth.
    Unauthorized,
    /// Bluetooth is switched off.
    PoweredOff,
    /// Powered up and ready.
    PoweredOn,
}

impl AdapterState {
    /// Check if the adapter can scan and connect.
    pub fn is_powered_on(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl std::fmt::Display for AdapterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "state unknown"),
            Self::Resetting => write!(f, "resetting"),
            Self::Unsupported => write!(f, "BLE unsupported"),
            Self::Unauthorized => write!(f, "unauthorized"),
            Self::PoweredOff => write!(f, "powered off"),
            Self::PoweredOn => write!(f, "powered on and ready"),
        }
    }
}

/// Non-owning reference to a remote device held by the platform stack.
pub trait PeripheralHandle: Clone + std::fmt::Debug + Send + 'static {
    /// Stable unique identifier (device address or platform UUID).
    fn identifier(&self) -> String;
}

/// Options passed along with a connection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Log an unexpected disconnection as a warning. The disconnection is
    /// delivered either way.
    pub notify_on_disconnection: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            notify_on_disconnection: true,
        }
    }
}

/// Capabilities the session requires from the platform Bluetooth stack.
///
/// All request methods are fire-and-return. Outcomes are delivered as events.
pub trait BleStack {
    /// Platform peripheral handle.
    type Peripheral: PeripheralHandle;
    /// Platform characteristic handle.
    type Characteristic: Clone + std::fmt::Debug;

    /// Current adapter state.
    fn adapter_state(&self) -> AdapterState;

    /// Start scanning for peripherals advertising `service_filter`.
    fn start_scan(&self, service_filter: Uuid) -> Result<()>;

    /// Stop any scan in progress.
    fn stop_scan(&self) -> Result<()>;

    /// Arm a one-shot timer that reports `ScanTimerFired { generation }`.
    fn arm_scan_timer(&self, timeout: Duration, generation: u64);

    /// Request a connection. Completes with `Connected` or `ConnectFailed`.
    fn connect(&self, peripheral: &Self::Peripheral, options: ConnectOptions);

    /// Cancel a pending or established connection. Completes with `Disconnected`.
    fn cancel_connection(&self, peripheral: &Self::Peripheral);

    /// Discover all services. Completes with `ServicesDiscovered`.
    fn discover_services(&self, peripheral: &Self::Peripheral);

    /// Discover all characteristics of one service. Completes with
    /// `CharacteristicsDiscovered`.
    fn discover_characteristics(&self, peripheral: &Self::Peripheral, service: Uuid);

    /// Snapshot of the peripheral's live topology.
    fn services(&self, peripheral: &Self::Peripheral) -> Vec<GattService<Self::Characteristic>>;

    /// Turn notifications on or off. Completes with `NotificationStateUpdated`.
    fn set_notify(
        &self,
        peripheral: &Self::Peripheral,
        characteristic: &Self::Characteristic,
        enabled: bool,
    );

    /// Read a value. Completes with `ValueUpdated`.
    fn read_value(&self, peripheral: &Self::Peripheral, characteristic: &Self::Characteristic);

    /// Write a value.
    fn write_value(
        &self,
        peripheral: &Self::Peripheral,
        characteristic: &Self::Characteristic,
        data: &[u8],
        write_type: WriteType,
    );

    /// Read the signal strength of a connected peripheral. Completes with `RssiRead`.
    fn read_rssi(&self, peripheral: &Self::Peripheral);
}
