//! BLE Service and Characteristic UUIDs.
//!
//! Contains the identifiers of the RedBearLab vendor service. These are fixed
//! by the peripheral firmware and are not configurable.

use uuid::Uuid;

/// Vendor UART-style service UUID.
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x713d_0000_503e_4c75_ba94_3148f18d941e);
/// RX characteristic UUID (central writes to the peripheral).
pub const RX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x713d_0002_503e_4c75_ba94_3148f18d941e);
/// TX characteristic UUID (peripheral notifies / is read by the central).
pub const TX_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x713d_0003_503e_4c75_ba94_3148f18d941e);

/// Framework version reported to callers for firmware compatibility checks.
pub const FRAMEWORK_VERSION: u16 = 0x0200;

/// Check if a service UUID is the vendor service.
pub fn is_vendor_service(uuid: &Uuid) -> bool {
    *uuid == SERVICE_UUID
}

/// Check if a characteristic UUID belongs to the vendor service.
pub fn is_vendor_characteristic(uuid: &Uuid) -> bool {
    *uuid == RX_CHARACTERISTIC_UUID || *uuid == TX_CHARACTERISTIC_UUID
}
