//! Session state machine for the single active peripheral.
//!
//! A [`Session`] owns the active peripheral and drives it through
//! connect → discover services → discover characteristics → enable
//! notifications → ready. It is a plain `&mut self` state machine: requests go
//! out through the injected [`BleStack`], and completions come back through
//! [`Session::handle_event`].

pub mod events;
pub mod observer;

use std::collections::HashMap;
use std::time::Duration;

use btleplug::api::WriteType;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::registry::DiscoveryRegistry;
use crate::ble::stack::{BleStack, ConnectOptions, PeripheralHandle};
use crate::ble::topology::resolve_characteristic;
use crate::ble::uuids::*;
use crate::config::SessionConfig;
use crate::error::{Error, Result};

pub use events::StackEvent;
pub use observer::{BroadcastObserver, SessionEvent, SessionObserver};

/// Callback invoked once with the result of an RSSI read.
pub type RssiCallback = Box<dyn FnOnce(Result<i16>) + Send>;

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No active peripheral.
    #[default]
    Idle,
    /// Connection requested.
    Connecting,
    /// Waiting for service discovery.
    DiscoveringServices,
    /// Waiting for characteristic discovery on every service.
    DiscoveringCharacteristics,
    /// Notify requested on the TX characteristic.
    EnablingNotifications,
    /// Connected; read and write are available.
    Ready,
    /// Discovery or setup failed; the link may still be up.
    Failed,
}

impl SessionState {
    /// Check if the session is ready for I/O.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if a connection sequence is in progress.
    pub fn is_transitioning(&self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::DiscoveringServices
                | Self::DiscoveringCharacteristics
                | Self::EnablingNotifications
        )
    }

    /// Check if the session is in progress or ready.
    pub fn is_engaged(&self) -> bool {
        self.is_transitioning() || self.is_ready()
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::DiscoveringServices => write!(f, "DiscoveringServices"),
            Self::DiscoveringCharacteristics => write!(f, "DiscoveringCharacteristics"),
            Self::EnablingNotifications => write!(f, "EnablingNotifications"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Resolved vendor characteristics of a ready session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints<C> {
    /// TX characteristic (notify/read).
    pub tx: C,
    /// RX characteristic (write), if the peripheral exposes it.
    pub rx: Option<C>,
}

/// Central-role session with at most one active peripheral.
pub struct Session<S: BleStack> {
    stack: S,
    config: SessionConfig,
    observer: Option<Box<dyn SessionObserver>>,
    state: SessionState,
    active: Option<S::Peripheral>,
    endpoints: Option<Endpoints<S::Characteristic>>,
    /// Outstanding characteristic discoveries per service UUID. A UUID may
    /// appear more than once in a topology.
    pending_services: HashMap<Uuid, usize>,
    pending_rssi: Option<RssiCallback>,
    discovered: DiscoveryRegistry<S::Peripheral>,
    scanning: bool,
    scan_generation: u64,
    last_rssi: Option<i16>,
}

impl<S: BleStack> Session<S> {
    /// Create an idle session on top of `stack`.
    pub fn new(stack: S, config: SessionConfig) -> Self {
        Self {
            stack,
            config,
            observer: None,
            state: SessionState::Idle,
            active: None,
            endpoints: None,
            pending_services: HashMap::new(),
            pending_rssi: None,
            discovered: DiscoveryRegistry::new(),
            scanning: false,
            scan_generation: 0,
            last_rssi: None,
        }
    }

    /// Install the observer, replacing any previous one.
    pub fn set_observer(&mut self, observer: Box<dyn SessionObserver>) {
        self.observer = Some(observer);
    }

    /// Remove and return the observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn SessionObserver>> {
        self.observer.take()
    }

    /// The platform stack.
    pub fn stack(&self) -> &S {
        &self.stack
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Framework version used for firmware compatibility negotiation.
    pub fn framework_version(&self) -> u16 {
        FRAMEWORK_VERSION
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Check if the connect sequence has completed.
    pub fn is_connected(&self) -> bool {
        self.state.is_ready()
    }

    /// The active peripheral, if any.
    pub fn active_peripheral(&self) -> Option<&S::Peripheral> {
        self.active.as_ref()
    }

    /// Resolved TX/RX characteristics, present only while ready.
    pub fn endpoints(&self) -> Option<&Endpoints<S::Characteristic>> {
        self.endpoints.as_ref()
    }

    /// Peripherals seen during the current scan window.
    pub fn discovered(&self) -> &DiscoveryRegistry<S::Peripheral> {
        &self.discovered
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Most recent successful RSSI reading of the active peripheral.
    pub fn last_rssi(&self) -> Option<i16> {
        self.last_rssi
    }

    // === Scanning ===

    /// Scan for peripherals advertising the vendor service for `timeout`.
    ///
    /// Clears the discovery registry and returns the scan generation. A timer
    /// from an earlier scan will not stop this one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnavailable`] if the adapter is not powered on.
    pub fn find_peripherals(&mut self, timeout: Duration) -> Result<u64> {
        let adapter_state = self.stack.adapter_state();
        if !adapter_state.is_powered_on() {
            error!(
                "Bluetooth not correctly initialized, adapter state: {}",
                adapter_state
            );
            return Err(Error::StackUnavailable {
                state: adapter_state,
            });
        }

        if self.scanning {
            debug!("Scan already running, restarting");
        }

        self.stack.start_scan(SERVICE_UUID)?;

        self.discovered.clear();
        self.scan_generation += 1;
        self.scanning = true;
        self.stack.arm_scan_timer(timeout, self.scan_generation);

        info!(
            "Scanning for peripherals for {:?} (scan {})",
            timeout, self.scan_generation
        );

        Ok(self.scan_generation)
    }

    /// Stop the current scan early.
    pub fn stop_scan(&mut self) -> Result<()> {
        if !self.scanning {
            debug!("Not scanning, ignoring stop request");
            return Ok(());
        }

        self.scanning = false;
        self.stack.stop_scan()?;

        info!(
            "Scanning stopped, {} known peripherals",
            self.discovered.len()
        );

        Ok(())
    }

    // === Connection ===

    /// Make `peripheral` the active peripheral and start connecting.
    ///
    /// A different active peripheral is abandoned first. Connecting to the
    /// peripheral that is already connecting or ready does nothing.
    pub fn connect(&mut self, peripheral: S::Peripheral) {
        let identifier = peripheral.identifier();

        if let Some(active) = self.active.take() {
            let same = active.identifier() == identifier;

            if same && self.state.is_engaged() {
                debug!("Already {} with peripheral {}", self.state, identifier);
                self.active = Some(active);
                return;
            }

            let was_ready = self.state.is_ready();
            if !same {
                info!("Abandoning session with peripheral {}", active.identifier());
                self.stack.cancel_connection(&active);
            }
            self.reset();
            if was_ready {
                self.notify(|o| o.on_disconnected());
            }
        }

        info!("Connecting to peripheral {}", identifier);

        self.stack.connect(
            &peripheral,
            ConnectOptions {
                notify_on_disconnection: self.config.notify_on_disconnection,
            },
        );
        self.active = Some(peripheral);
        self.set_state(SessionState::Connecting);
    }

    /// Connect to a peripheral from the discovery registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PeripheralNotFound`] if the identifier was not seen.
    pub fn connect_by_identifier(&mut self, identifier: &str) -> Result<()> {
        let peripheral = self
            .discovered
            .get(identifier)
            .map(|entry| entry.peripheral.clone())
            .ok_or_else(|| Error::PeripheralNotFound {
                identifier: identifier.to_string(),
            })?;

        self.connect(peripheral);
        Ok(())
    }

    /// Ask the stack to drop the active connection.
    ///
    /// The session resets when the stack reports the disconnection.
    pub fn disconnect(&mut self) {
        match &self.active {
            Some(peripheral) => {
                info!("Disconnecting from peripheral {}", peripheral.identifier());
                self.stack.cancel_connection(peripheral);
            }
            None => debug!("No active peripheral, ignoring disconnect request"),
        }
    }

    // === Data ===

    /// Request the TX characteristic value.
    ///
    /// The value arrives later through `on_data_received`.
    pub fn read(&mut self) -> Result<()> {
        let peripheral = self.require_active("read")?;
        let tx = self.resolve(&peripheral, &SERVICE_UUID, &TX_CHARACTERISTIC_UUID)?;

        self.stack.read_value(&peripheral, &tx);
        Ok(())
    }

    /// Write `data` to the RX characteristic without response.
    ///
    /// Delivery is not confirmed.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        let peripheral = self.require_active("write")?;
        let rx = self.resolve(&peripheral, &SERVICE_UUID, &RX_CHARACTERISTIC_UUID)?;

        self.stack
            .write_value(&peripheral, &rx, data, WriteType::WithoutResponse);
        trace!("Wrote {} bytes to {}", data.len(), RX_CHARACTERISTIC_UUID);

        Ok(())
    }

    /// Read the signal strength of the active peripheral.
    ///
    /// Only one request is tracked: a second call before the first completes
    /// replaces the first callback, which is then never invoked. With no
    /// active peripheral the callback receives [`Error::NotConnected`] at once.
    pub fn read_rssi<F>(&mut self, callback: F)
    where
        F: FnOnce(Result<i16>) + Send + 'static,
    {
        let Some(peripheral) = self.active.clone() else {
            warn!("Cannot read RSSI: no active peripheral");
            callback(Err(Error::NotConnected));
            return;
        };

        if self.pending_rssi.replace(Box::new(callback)).is_some() {
            debug!("Replacing pending RSSI callback");
        }

        self.stack.read_rssi(&peripheral);
    }

    /// Turn on notifications for the TX characteristic of `peripheral`.
    pub fn enable_notifications(&mut self, peripheral: &S::Peripheral) -> Result<()> {
        self.set_notification(peripheral, &SERVICE_UUID, &TX_CHARACTERISTIC_UUID, true)
    }

    /// Turn notifications on or off for any characteristic of `peripheral`.
    pub fn set_notification(
        &mut self,
        peripheral: &S::Peripheral,
        service_uuid: &Uuid,
        characteristic_uuid: &Uuid,
        enabled: bool,
    ) -> Result<()> {
        let characteristic = self.resolve(peripheral, service_uuid, characteristic_uuid)?;
        self.stack.set_notify(peripheral, &characteristic, enabled);
        Ok(())
    }

    // === Internal ===

    fn require_active(&self, operation: &str) -> Result<S::Peripheral> {
        self.active.clone().ok_or_else(|| {
            error!("Cannot {}: no active peripheral", operation);
            Error::NotConnected
        })
    }

    /// Resolve against the live topology, logging misses.
    fn resolve(
        &self,
        peripheral: &S::Peripheral,
        service_uuid: &Uuid,
        characteristic_uuid: &Uuid,
    ) -> Result<S::Characteristic> {
        let topology = self.stack.services(peripheral);

        resolve_characteristic(&topology, service_uuid, characteristic_uuid)
            .cloned()
            .map_err(|e| {
                error!(
                    "Could not resolve {} / {} on peripheral {}: {}",
                    service_uuid,
                    characteristic_uuid,
                    peripheral.identifier(),
                    e
                );
                e
            })
    }

    fn is_active(&self, peripheral: &S::Peripheral) -> bool {
        self.active
            .as_ref()
            .map(|active| active.identifier() == peripheral.identifier())
            .unwrap_or(false)
    }

    fn set_state(&mut self, new_state: SessionState) {
        let old_state = self.state;
        self.state = new_state;

        if old_state != new_state {
            debug!("Session state changed: {} -> {}", old_state, new_state);
        }
    }

    /// Drop per-connection state and return to Idle. Does not touch `active`.
    fn reset(&mut self) {
        self.endpoints = None;
        self.pending_services.clear();
        self.set_state(SessionState::Idle);

        if let Some(callback) = self.pending_rssi.take() {
            callback(Err(Error::ConnectionLost));
        }
    }

    fn enter_ready(&mut self, endpoints: Endpoints<S::Characteristic>) {
        self.endpoints = Some(endpoints);
        self.set_state(SessionState::Ready);
        info!("Session ready");
        self.notify(|o| o.on_connected());
    }

    fn fail(&mut self, error: Error) {
        error!("Session setup failed in state {}: {}", self.state, error);
        self.endpoints = None;
        self.pending_services.clear();
        self.set_state(SessionState::Failed);
        self.notify_error(error);
    }

    fn notify<F>(&mut self, f: F)
    where
        F: FnOnce(&mut dyn SessionObserver),
    {
        if let Some(observer) = self.observer.as_mut() {
            f(observer.as_mut());
        }
    }

    fn notify_error(&mut self, error: Error) {
        self.notify(|o| o.on_error(&error));
    }
}

impl<S: BleStack> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("active", &self.active.as_ref().map(|p| p.identifier()))
            .field("scanning", &self.scanning)
            .field("discovered", &self.discovered.len())
            .finish()
    }
}
