//! Translation of platform stack events into session transitions.

use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::{Endpoints, Session, SessionState};
use crate::ble::stack::{AdapterState, BleStack, PeripheralHandle};
use crate::ble::uuids::*;
use crate::config::ReadinessPolicy;
use crate::error::Error;

/// Asynchronous notification from the platform stack.
///
/// Failures carry the platform's error description.
#[derive(Debug, Clone)]
pub enum StackEvent<P> {
    /// The adapter changed power/authorization state.
    AdapterStateChanged(AdapterState),
    /// A peripheral advertising the scanned service was seen.
    PeripheralDiscovered {
        /// The peripheral.
        peripheral: P,
        /// Signal strength in dBm.
        rssi: i16,
    },
    /// A scan timer armed with `arm_scan_timer` fired.
    ScanTimerFired {
        /// Generation the timer was armed for.
        generation: u64,
    },
    /// Link-layer connection established.
    Connected {
        /// The peripheral.
        peripheral: P,
    },
    /// Connection attempt failed.
    ConnectFailed {
        /// The peripheral.
        peripheral: P,
        /// Platform error description.
        reason: String,
    },
    /// Link lost or cancelled.
    Disconnected {
        /// The peripheral.
        peripheral: P,
        /// Platform error description for unexpected disconnections.
        reason: Option<String>,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        /// The peripheral.
        peripheral: P,
        /// Outcome.
        result: Result<(), String>,
    },
    /// Characteristic discovery finished for one service.
    CharacteristicsDiscovered {
        /// The peripheral.
        peripheral: P,
        /// The service whose characteristics were discovered.
        service: Uuid,
        /// Outcome.
        result: Result<(), String>,
    },
    /// Notification state changed for a characteristic.
    NotificationStateUpdated {
        /// The peripheral.
        peripheral: P,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// New state (`true` = notifying) or failure.
        result: Result<bool, String>,
    },
    /// A characteristic value was read or notified.
    ValueUpdated {
        /// The peripheral.
        peripheral: P,
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Value, which may be absent, or failure.
        result: Result<Option<Vec<u8>>, String>,
    },
    /// An RSSI read completed.
    RssiRead {
        /// The peripheral.
        peripheral: P,
        /// Signal strength in dBm or failure.
        result: Result<i16, String>,
    },
}

impl<S: BleStack> Session<S> {
    /// Apply one stack event.
    ///
    /// Events about a peripheral other than the active one are ignored.
    pub fn handle_event(&mut self, event: StackEvent<S::Peripheral>) {
        match event {
            StackEvent::AdapterStateChanged(state) => self.handle_adapter_state(state),
            StackEvent::PeripheralDiscovered { peripheral, rssi } => {
                self.handle_peripheral_discovered(peripheral, rssi)
            }
            StackEvent::ScanTimerFired { generation } => self.handle_scan_timer(generation),
            StackEvent::Connected { peripheral } => self.handle_connected(peripheral),
            StackEvent::ConnectFailed { peripheral, reason } => {
                self.handle_connect_failed(peripheral, reason)
            }
            StackEvent::Disconnected { peripheral, reason } => {
                self.handle_disconnected(peripheral, reason)
            }
            StackEvent::ServicesDiscovered { peripheral, result } => {
                self.handle_services_discovered(peripheral, result)
            }
            StackEvent::CharacteristicsDiscovered {
                peripheral,
                service,
                result,
            } => self.handle_characteristics_discovered(peripheral, service, result),
            StackEvent::NotificationStateUpdated {
                peripheral,
                characteristic,
                result,
            } => self.handle_notification_state(peripheral, characteristic, result),
            StackEvent::ValueUpdated {
                peripheral,
                characteristic,
                result,
            } => self.handle_value_updated(peripheral, characteristic, result),
            StackEvent::RssiRead { peripheral, result } => self.handle_rssi_read(peripheral, result),
        }
    }

    fn handle_adapter_state(&mut self, state: AdapterState) {
        info!("Adapter state changed: {}", state);

        if !state.is_powered_on() && self.scanning {
            debug!("Adapter no longer powered on, scan ended");
            self.scanning = false;
        }
    }

    fn handle_peripheral_discovered(&mut self, peripheral: S::Peripheral, rssi: i16) {
        if !self.scanning {
            trace!(
                "Ignoring sighting of {} outside a scan",
                peripheral.identifier()
            );
            return;
        }

        self.discovered.record_sighting(peripheral, rssi);
    }

    fn handle_scan_timer(&mut self, generation: u64) {
        if !self.scanning || generation != self.scan_generation {
            debug!(
                "Ignoring stale scan timer {} (current scan {})",
                generation, self.scan_generation
            );
            return;
        }

        if let Err(e) = self.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
    }

    fn handle_connected(&mut self, peripheral: S::Peripheral) {
        if !self.is_active(&peripheral) || self.state != SessionState::Connecting {
            debug!(
                "Ignoring connected event for {} in state {}",
                peripheral.identifier(),
                self.state
            );
            return;
        }

        info!("Connected to peripheral {}", peripheral.identifier());

        self.set_state(SessionState::DiscoveringServices);
        self.stack.discover_services(&peripheral);
        self.active = Some(peripheral);
    }

    fn handle_connect_failed(&mut self, peripheral: S::Peripheral, reason: String) {
        if !self.is_active(&peripheral) {
            debug!(
                "Ignoring connect failure for inactive peripheral {}",
                peripheral.identifier()
            );
            return;
        }

        error!(
            "Could not connect to peripheral {}: {}",
            peripheral.identifier(),
            reason
        );

        self.active = None;
        self.reset();
        self.notify_error(Error::ConnectFailed { reason });
    }

    fn handle_disconnected(&mut self, peripheral: S::Peripheral, reason: Option<String>) {
        if !self.is_active(&peripheral) {
            debug!(
                "Ignoring disconnect of inactive peripheral {}",
                peripheral.identifier()
            );
            return;
        }

        match reason {
            Some(reason) => warn!(
                "Disconnected from peripheral {}: {}",
                peripheral.identifier(),
                reason
            ),
            None => info!("Disconnected from peripheral {}", peripheral.identifier()),
        }

        self.active = None;
        self.reset();
        self.notify(|o| o.on_disconnected());
    }

    fn handle_services_discovered(&mut self, peripheral: S::Peripheral, result: Result<(), String>) {
        if !self.is_active(&peripheral) || self.state != SessionState::DiscoveringServices {
            debug!(
                "Ignoring services of {} in state {}",
                peripheral.identifier(),
                self.state
            );
            return;
        }

        if let Err(reason) = result {
            self.fail(Error::DiscoveryFailed { reason });
            return;
        }

        let services = self.stack.services(&peripheral);
        if services.is_empty() {
            self.fail(Error::ServiceNotFound {
                uuid: SERVICE_UUID.to_string(),
            });
            return;
        }

        debug!(
            "Found {} services on peripheral {}",
            services.len(),
            peripheral.identifier()
        );

        if !services.iter().any(|s| is_vendor_service(&s.uuid)) {
            warn!(
                "Peripheral {} does not expose service {}",
                peripheral.identifier(),
                SERVICE_UUID
            );
        }

        self.pending_services.clear();
        for service in &services {
            *self.pending_services.entry(service.uuid).or_insert(0) += 1;
        }
        self.set_state(SessionState::DiscoveringCharacteristics);

        for service in &services {
            debug!("Fetching characteristics for service {}", service.uuid);
            self.stack.discover_characteristics(&peripheral, service.uuid);
        }
    }

    fn handle_characteristics_discovered(
        &mut self,
        peripheral: S::Peripheral,
        service: Uuid,
        result: Result<(), String>,
    ) {
        if !self.is_active(&peripheral) || self.state != SessionState::DiscoveringCharacteristics {
            debug!(
                "Ignoring characteristics of service {} in state {}",
                service, self.state
            );
            return;
        }

        if let Err(reason) = result {
            self.fail(Error::DiscoveryFailed { reason });
            return;
        }

        match self.pending_services.get_mut(&service) {
            Some(remaining) if *remaining > 1 => *remaining -= 1,
            Some(_) => {
                self.pending_services.remove(&service);
            }
            None => {
                debug!("Ignoring characteristics for unexpected service {}", service);
                return;
            }
        }

        debug!(
            "Characteristics of service {} found, {} discoveries outstanding",
            service,
            self.pending_services.values().sum::<usize>()
        );

        if self.pending_services.is_empty() {
            self.begin_enabling_notifications(&peripheral);
        }
    }

    fn begin_enabling_notifications(&mut self, peripheral: &S::Peripheral) {
        self.set_state(SessionState::EnablingNotifications);

        let tx = match self.resolve(peripheral, &SERVICE_UUID, &TX_CHARACTERISTIC_UUID) {
            Ok(tx) => tx,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        self.stack.set_notify(peripheral, &tx, true);

        match self.config.readiness {
            ReadinessPolicy::Optimistic => {
                let rx = self.resolve_rx(peripheral);
                self.enter_ready(Endpoints { tx, rx });
            }
            ReadinessPolicy::AwaitNotifyAck => {
                debug!("Waiting for notification acknowledgement on {}", TX_CHARACTERISTIC_UUID);
            }
        }
    }

    fn resolve_rx(&self, peripheral: &S::Peripheral) -> Option<S::Characteristic> {
        let rx = self
            .resolve(peripheral, &SERVICE_UUID, &RX_CHARACTERISTIC_UUID)
            .ok();
        if rx.is_none() {
            warn!("RX characteristic missing, writes will fail");
        }
        rx
    }

    fn handle_notification_state(
        &mut self,
        peripheral: S::Peripheral,
        characteristic: Uuid,
        result: Result<bool, String>,
    ) {
        if !self.is_active(&peripheral) {
            return;
        }

        let awaiting_ack = self.state == SessionState::EnablingNotifications
            && characteristic == TX_CHARACTERISTIC_UUID;

        match result {
            Err(reason) => {
                error!(
                    "Error in setting notification state for characteristic {} on peripheral {}: {}",
                    characteristic,
                    peripheral.identifier(),
                    reason
                );
                let err = Error::NotifyFailed { reason };
                if awaiting_ack {
                    self.fail(err);
                } else {
                    self.notify_error(err);
                }
            }
            Ok(enabled) => {
                debug!(
                    "Updated notification state for characteristic {} to {}",
                    characteristic, enabled
                );

                if !(awaiting_ack && enabled) {
                    return;
                }

                match self.resolve(&peripheral, &SERVICE_UUID, &TX_CHARACTERISTIC_UUID) {
                    Ok(tx) => {
                        let rx = self.resolve_rx(&peripheral);
                        self.enter_ready(Endpoints { tx, rx });
                    }
                    Err(e) => self.fail(e),
                }
            }
        }
    }

    fn handle_value_updated(
        &mut self,
        peripheral: S::Peripheral,
        characteristic: Uuid,
        result: Result<Option<Vec<u8>>, String>,
    ) {
        if !self.is_active(&peripheral) {
            return;
        }

        if characteristic != TX_CHARACTERISTIC_UUID {
            trace!(
                "Ignoring update of {} characteristic {}",
                if is_vendor_characteristic(&characteristic) {
                    "vendor"
                } else {
                    "foreign"
                },
                characteristic
            );
            return;
        }

        match result {
            Err(reason) => {
                error!(
                    "Update value for characteristic {} failed: {}",
                    characteristic, reason
                );
                self.notify_error(Error::ReadFailed { reason });
            }
            Ok(value) => {
                trace!(
                    "Received {} bytes from {}",
                    value.as_ref().map(Vec::len).unwrap_or(0),
                    characteristic
                );
                self.notify(|o| o.on_data_received(value));
            }
        }
    }

    fn handle_rssi_read(&mut self, peripheral: S::Peripheral, result: Result<i16, String>) {
        if !self.is_active(&peripheral) {
            debug!(
                "Ignoring RSSI of inactive peripheral {}",
                peripheral.identifier()
            );
            return;
        }

        let callback = self.pending_rssi.take();

        match result {
            Ok(rssi) => {
                self.last_rssi = Some(rssi);
                if let Some(callback) = callback {
                    callback(Ok(rssi));
                }
                self.notify(|o| o.on_rssi_updated(rssi));
            }
            Err(reason) => {
                warn!("RSSI read failed: {}", reason);
                if let Some(callback) = callback {
                    callback(Err(Error::RssiFailed { reason }));
                }
            }
        }
    }
}
