//! BLE plumbing.
//!
//! This module holds the platform stack contract, its btleplug
//! implementation, and the supporting pieces the session builds on:
//! vendor UUIDs, GATT topology lookup and the discovery registry.

pub mod btleplug_stack;
#[cfg(test)]
pub(crate) mod fake;
pub mod registry;
pub mod stack;
pub mod topology;
pub mod uuids;

pub use btleplug_stack::{BtleplugStack, StackEventSender, UNKNOWN_RSSI};
pub use registry::{DiscoveredPeripheral, DiscoveryRegistry};
pub use stack::{AdapterState, BleStack, ConnectOptions, PeripheralHandle};
pub use topology::{find_service, resolve_characteristic, GattCharacteristic, GattService};
pub use uuids::*;
