//! [`BleStack`] implementation backed by btleplug.
//!
//! Every request is spawned onto the tokio runtime and its completion is
//! posted to an unbounded channel as a [`StackEvent`]. Adapter events
//! (sightings, disconnections, power changes) are forwarded by a listener
//! task started at construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::ble::stack::{AdapterState, BleStack, ConnectOptions, PeripheralHandle};
use crate::ble::topology::{GattCharacteristic, GattService};
use crate::error::{Error, Result};
use crate::session::StackEvent;

/// Channel on which [`BtleplugStack`] posts completions.
pub type StackEventSender = mpsc::UnboundedSender<StackEvent<Peripheral>>;

impl PeripheralHandle for Peripheral {
    fn identifier(&self) -> String {
        self.id().to_string()
    }
}

impl From<CentralState> for AdapterState {
    fn from(state: CentralState) -> Self {
        match state {
            CentralState::PoweredOn => AdapterState::PoweredOn,
            CentralState::PoweredOff => AdapterState::PoweredOff,
            #[allow(unreachable_patterns)]
            _ => AdapterState::Unknown,
        }
    }
}

/// RSSI recorded for a sighting whose advertisement carried none. Sorts
/// below every real reading.
pub const UNKNOWN_RSSI: i16 = i16::MIN;

/// Shared with the listener task.
#[derive(Debug, Default)]
struct ListenerState {
    /// Service UUID of the running scan.
    scan_filter: Option<Uuid>,
    /// Links requested through `connect`, keyed by identifier, with the
    /// caller's `notify_on_disconnection` choice.
    links: HashMap<String, bool>,
}

impl ListenerState {
    fn track(&mut self, identifier: String, notify_on_disconnection: bool) {
        self.links.insert(identifier, notify_on_disconnection);
    }

    fn untrack(&mut self, identifier: &str) {
        self.links.remove(identifier);
    }

    /// Forget a link the adapter reported as gone.
    ///
    /// Returns `None` for links this stack never opened or already closed.
    fn link_lost(&mut self, identifier: &str) -> Option<bool> {
        self.links.remove(identifier)
    }
}

/// btleplug-backed platform stack.
pub struct BtleplugStack {
    adapter: Adapter,
    runtime: Handle,
    events: StackEventSender,
    adapter_state: Arc<RwLock<AdapterState>>,
    listener_state: Arc<RwLock<ListenerState>>,
    listener: JoinHandle<()>,
    /// Notification stream forwarders, one per peripheral.
    forwarders: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl BtleplugStack {
    /// Use the first Bluetooth adapter of the system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StackUnavailable`] if there is no adapter.
    pub async fn new(events: StackEventSender) -> Result<Self> {
        let manager = Manager::new().await.map_err(|e| {
            error!("Failed to create Bluetooth manager: {}", e);
            Error::StackUnavailable {
                state: AdapterState::Unsupported,
            }
        })?;

        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::StackUnavailable {
                state: AdapterState::Unsupported,
            })?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Self::with_adapter(adapter, events).await
    }

    /// Use a specific adapter.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn with_adapter(adapter: Adapter, events: StackEventSender) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::Internal(e.to_string()))?;
        let adapter_events = adapter.events().await?;

        // btleplug reports power changes but not the initial state.
        let adapter_state = Arc::new(RwLock::new(AdapterState::PoweredOn));
        let listener_state = Arc::new(RwLock::new(ListenerState::default()));
        let forwarders = Arc::new(Mutex::new(HashMap::new()));

        let listener = {
            let adapter = adapter.clone();
            let events = events.clone();
            let adapter_state = adapter_state.clone();
            let listener_state = listener_state.clone();
            let forwarders = forwarders.clone();

            runtime.spawn(async move {
                let mut adapter_events = adapter_events;
                while let Some(event) = adapter_events.next().await {
                    Self::handle_central_event(
                        event,
                        &adapter,
                        &events,
                        &adapter_state,
                        &listener_state,
                        &forwarders,
                    )
                    .await;
                }
                debug!("Adapter event stream ended");
            })
        };

        Ok(Self {
            adapter,
            runtime,
            events,
            adapter_state,
            listener_state,
            listener,
            forwarders,
        })
    }

    /// The underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Look up a peripheral the adapter knows about.
    pub async fn peripheral(&self, identifier: &str) -> Option<Peripheral> {
        let peripherals = self.adapter.peripherals().await.ok()?;
        peripherals
            .into_iter()
            .find(|p| p.identifier() == identifier)
    }

    async fn handle_central_event(
        event: CentralEvent,
        adapter: &Adapter,
        events: &StackEventSender,
        adapter_state: &RwLock<AdapterState>,
        listener_state: &RwLock<ListenerState>,
        forwarders: &Mutex<HashMap<String, JoinHandle<()>>>,
    ) {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                let filter = listener_state.read().scan_filter;
                if let Some(filter) = filter {
                    Self::process_sighting(adapter, id, filter, events).await;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                let identifier = id.to_string();
                debug!("Device disconnected: {}", identifier);

                if let Some(handle) = forwarders.lock().remove(&identifier) {
                    handle.abort();
                }

                let Some(notify) = listener_state.write().link_lost(&identifier) else {
                    return;
                };
                if notify {
                    warn!("Lost connection to peripheral {}", identifier);
                } else {
                    debug!("Lost connection to peripheral {}", identifier);
                }

                match adapter.peripheral(&id).await {
                    Ok(peripheral) => {
                        let _ = events.send(StackEvent::Disconnected {
                            peripheral,
                            reason: Some("connection lost".to_string()),
                        });
                    }
                    Err(e) => warn!("Disconnected peripheral {} unknown: {}", identifier, e),
                }
            }
            CentralEvent::StateUpdate(state) => {
                let state = AdapterState::from(state);
                *adapter_state.write() = state;
                let _ = events.send(StackEvent::AdapterStateChanged(state));
            }
            CentralEvent::DeviceConnected(id) => {
                trace!("Device connected: {:?}", id);
            }
            _ => {}
        }
    }

    async fn process_sighting(
        adapter: &Adapter,
        id: PeripheralId,
        filter: Uuid,
        events: &StackEventSender,
    ) {
        let peripheral = match adapter.peripheral(&id).await {
            Ok(p) => p,
            Err(e) => {
                trace!("Failed to get peripheral: {}", e);
                return;
            }
        };

        let properties = match peripheral.properties().await {
            Ok(Some(p)) => p,
            _ => return,
        };

        // Some platforms deliver sightings the scan filter should have dropped.
        if !properties.services.is_empty() && !properties.services.contains(&filter) {
            trace!("Ignoring {:?}: service {} not advertised", id, filter);
            return;
        }

        let _ = events.send(StackEvent::PeripheralDiscovered {
            peripheral,
            rssi: properties.rssi.unwrap_or(UNKNOWN_RSSI),
        });
    }

    /// Start forwarding notifications of `peripheral` if not already running.
    async fn ensure_forwarder(
        runtime: &Handle,
        peripheral: &Peripheral,
        forwarders: &Mutex<HashMap<String, JoinHandle<()>>>,
        events: &StackEventSender,
    ) {
        let identifier = peripheral.identifier();
        if forwarders
            .lock()
            .get(&identifier)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
        {
            return;
        }

        let mut notifications = match peripheral.notifications().await {
            Ok(n) => n,
            Err(e) => {
                error!("Failed to get notifications stream: {}", e);
                return;
            }
        };

        let handle = {
            let peripheral = peripheral.clone();
            let events = events.clone();
            runtime.spawn(async move {
                while let Some(notification) = notifications.next().await {
                    trace!(
                        "Notification received from {}: {} bytes",
                        notification.uuid,
                        notification.value.len()
                    );
                    let _ = events.send(StackEvent::ValueUpdated {
                        peripheral: peripheral.clone(),
                        characteristic: notification.uuid,
                        result: Ok(Some(notification.value)),
                    });
                }
                debug!("Notification stream ended");
            })
        };

        if let Some(previous) = forwarders.lock().insert(identifier, handle) {
            previous.abort();
        }
    }
}

impl BleStack for BtleplugStack {
    type Peripheral = Peripheral;
    type Characteristic = Characteristic;

    fn adapter_state(&self) -> AdapterState {
        *self.adapter_state.read()
    }

    fn start_scan(&self, service_filter: Uuid) -> Result<()> {
        self.listener_state.write().scan_filter = Some(service_filter);

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            let filter = ScanFilter {
                services: vec![service_filter],
            };
            if let Err(e) = adapter.start_scan(filter).await {
                error!("Failed to start scan: {}", e);
            }
        });

        Ok(())
    }

    fn stop_scan(&self) -> Result<()> {
        self.listener_state.write().scan_filter = None;

        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });

        Ok(())
    }

    fn arm_scan_timer(&self, timeout: Duration, generation: u64) {
        let events = self.events.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = events.send(StackEvent::ScanTimerFired { generation });
        });
    }

    fn connect(&self, peripheral: &Peripheral, options: ConnectOptions) {
        let identifier = peripheral.identifier();
        // Disconnections are always delivered; the option only sets how
        // loudly an unexpected one is logged.
        self.listener_state
            .write()
            .track(identifier, options.notify_on_disconnection);

        let peripheral = peripheral.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let event = match peripheral.connect().await {
                Ok(()) => StackEvent::Connected { peripheral },
                Err(e) => StackEvent::ConnectFailed {
                    peripheral,
                    reason: e.to_string(),
                },
            };
            let _ = events.send(event);
        });
    }

    fn cancel_connection(&self, peripheral: &Peripheral) {
        let identifier = peripheral.identifier();
        self.listener_state.write().untrack(&identifier);
        if let Some(handle) = self.forwarders.lock().remove(&identifier) {
            handle.abort();
        }

        let peripheral = peripheral.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Disconnect from {} reported: {}", identifier, e);
            }
            let _ = events.send(StackEvent::Disconnected {
                peripheral,
                reason: None,
            });
        });
    }

    fn discover_services(&self, peripheral: &Peripheral) {
        let peripheral = peripheral.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = peripheral
                .discover_services()
                .await
                .map_err(|e| e.to_string());
            let _ = events.send(StackEvent::ServicesDiscovered { peripheral, result });
        });
    }

    fn discover_characteristics(&self, peripheral: &Peripheral, service: Uuid) {
        // btleplug discovers characteristics together with services.
        let _ = self.events.send(StackEvent::CharacteristicsDiscovered {
            peripheral: peripheral.clone(),
            service,
            result: Ok(()),
        });
    }

    fn services(&self, peripheral: &Peripheral) -> Vec<GattService<Characteristic>> {
        peripheral
            .services()
            .into_iter()
            .map(|service| GattService {
                uuid: service.uuid,
                primary: service.primary,
                characteristics: service
                    .characteristics
                    .into_iter()
                    .map(|c| GattCharacteristic {
                        uuid: c.uuid,
                        handle: c,
                    })
                    .collect(),
            })
            .collect()
    }

    fn set_notify(&self, peripheral: &Peripheral, characteristic: &Characteristic, enabled: bool) {
        let peripheral = peripheral.clone();
        let characteristic = characteristic.clone();
        let events = self.events.clone();
        let forwarders = self.forwarders.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            let result = if enabled {
                Self::ensure_forwarder(&runtime, &peripheral, &forwarders, &events).await;
                peripheral.subscribe(&characteristic).await.map(|_| true)
            } else {
                peripheral.unsubscribe(&characteristic).await.map(|_| false)
            };

            let _ = events.send(StackEvent::NotificationStateUpdated {
                peripheral,
                characteristic: characteristic.uuid,
                result: result.map_err(|e| e.to_string()),
            });
        });
    }

    fn read_value(&self, peripheral: &Peripheral, characteristic: &Characteristic) {
        let peripheral = peripheral.clone();
        let characteristic = characteristic.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = peripheral
                .read(&characteristic)
                .await
                .map(Some)
                .map_err(|e| e.to_string());
            let _ = events.send(StackEvent::ValueUpdated {
                peripheral,
                characteristic: characteristic.uuid,
                result,
            });
        });
    }

    fn write_value(
        &self,
        peripheral: &Peripheral,
        characteristic: &Characteristic,
        data: &[u8],
        write_type: WriteType,
    ) {
        let peripheral = peripheral.clone();
        let characteristic = characteristic.clone();
        let data = data.to_vec();
        self.runtime.spawn(async move {
            if let Err(e) = peripheral.write(&characteristic, &data, write_type).await {
                error!("Write to {} failed: {}", characteristic.uuid, e);
            }
        });
    }

    fn read_rssi(&self, peripheral: &Peripheral) {
        let peripheral = peripheral.clone();
        let events = self.events.clone();
        self.runtime.spawn(async move {
            let result = match peripheral.properties().await {
                Ok(Some(properties)) => properties
                    .rssi
                    .ok_or_else(|| "RSSI not reported".to_string()),
                Ok(None) => Err("peripheral properties unavailable".to_string()),
                Err(e) => Err(e.to_string()),
            };
            let _ = events.send(StackEvent::RssiRead { peripheral, result });
        });
    }
}

impl Drop for BtleplugStack {
    fn drop(&mut self) {
        self.listener.abort();
        for (_, handle) in self.forwarders.lock().drain() {
            handle.abort();
        }
    }
}
