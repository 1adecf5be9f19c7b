// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # rbl-ble-central
//!
//! A BLE central session engine for RedBearLab BLE Shield style peripherals:
//! a vendor service exposing a write-only RX characteristic and a
//! notify/read TX characteristic, used as a simple serial link.
//!
//! ## Features
//!
//! - **Discovery**: Scan for peripherals advertising the vendor service for a
//!   bounded window
//! - **Connect sequence**: Connect, discover every service and its
//!   characteristics, then enable TX notifications
//! - **Data**: Write to RX, read TX, receive TX notifications
//! - **Signal strength**: One-shot RSSI reads
//! - **Testable core**: The [`Session`] state machine runs against any
//!   [`BleStack`], not just btleplug
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rbl_ble_central::{BleCentral, Result, SessionEvent};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let central = BleCentral::new().await?;
//!     let mut events = central.subscribe();
//!
//!     central.find_peripherals(Duration::from_secs(3))?;
//!     tokio::time::sleep(Duration::from_secs(3)).await;
//!
//!     let Some(strongest) = central.discovered().into_iter().max_by_key(|p| p.rssi) else {
//!         return Ok(());
//!     };
//!     central.connect(&strongest.identifier())?;
//!     central.wait_for_connection(Duration::from_secs(10)).await?;
//!
//!     central.write(b"hello")?;
//!
//!     while let Ok(event) = events.recv().await {
//!         if let SessionEvent::DataReceived(Some(data)) = event {
//!             println!("Received: {:02X?}", &data[..]);
//!             break;
//!         }
//!     }
//!
//!     central.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Running on a host
//!
//! [`BtleplugStack`](ble::BtleplugStack) talks to the first adapter btleplug
//! finds. What the host has to provide differs by OS:
//!
//! - **Linux**: a running BlueZ daemon on D-Bus. Unprivileged users usually
//!   need membership in the `bluetooth` group to scan.
//! - **macOS**: CoreBluetooth prompts for access on first use. An app bundle
//!   has to declare `NSBluetoothAlwaysUsageDescription` or it is terminated
//!   at the first scan.
//! - **Windows**: the WinRT Bluetooth LE APIs, available from Windows 10.
//!
//! ## Feature Flags
//!
//! - `serde`: derive `Serialize`/`Deserialize` for [`SessionConfig`] and the
//!   state enums

// Public modules
pub mod ble;
pub mod central;
pub mod config;
pub mod error;
pub mod session;

// Re-exports for convenience
pub use central::{BleCentral, CallbackHandle};
pub use config::{ReadinessPolicy, SessionConfig, DEFAULT_SCAN_TIMEOUT};
pub use error::{Error, Result};
pub use session::{
    BroadcastObserver, Endpoints, RssiCallback, Session, SessionEvent, SessionObserver,
    SessionState, StackEvent,
};

// Re-export commonly used types from submodules
pub use ble::{
    AdapterState, BleStack, BtleplugStack, DiscoveredPeripheral, PeripheralHandle,
    FRAMEWORK_VERSION, RX_CHARACTERISTIC_UUID, SERVICE_UUID, TX_CHARACTERISTIC_UUID,
};
