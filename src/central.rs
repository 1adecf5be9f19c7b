//! High-level async facade over a [`Session`].
//!
//! [`BleCentral`] owns the session behind a mutex and runs a pump task that
//! feeds stack completions into it one at a time. Session notifications are
//! republished on a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use btleplug::platform::Peripheral;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ble::btleplug_stack::BtleplugStack;
use crate::ble::registry::DiscoveredPeripheral;
use crate::ble::stack::BleStack;
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::{BroadcastObserver, Session, SessionEvent, SessionState, StackEvent};

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Registration returned by [`BleCentral::on_event`].
///
/// The callback runs on its own reader task for as long as the handle is
/// alive. Dropping the handle stops it.
#[must_use = "the callback stops as soon as the handle is dropped"]
pub struct CallbackHandle {
    id: u64,
    reader: JoinHandle<()>,
}

impl CallbackHandle {
    fn new(id: u64, reader: JoinHandle<()>) -> Self {
        Self { id, reader }
    }

    /// Sequence number assigned at registration.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the reader task is still delivering events.
    pub fn is_active(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Stop the callback now rather than at drop.
    pub fn unregister(self) {}
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        debug!("Stopping event callback {}", self.id);
        self.reader.abort();
    }
}

/// BLE central with a single active peripheral.
///
/// All methods are non-blocking; results of asynchronous operations arrive
/// as [`SessionEvent`]s.
pub struct BleCentral<S: BleStack = BtleplugStack> {
    session: Arc<Mutex<Session<S>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
    callback_counter: AtomicU64,
}

impl BleCentral<BtleplugStack> {
    /// Create a central on the first system adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Self::with_config(SessionConfig::default()).await
    }

    /// Create a central on the first system adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_config(config: SessionConfig) -> Result<Self> {
        let (stack_tx, stack_rx) = mpsc::unbounded_channel();
        let stack = BtleplugStack::new(stack_tx).await?;
        Ok(Self::from_stack(stack, stack_rx, config))
    }

    /// Connect to a peripheral handle obtained elsewhere.
    pub fn connect_peripheral(&self, peripheral: Peripheral) {
        self.session.lock().connect(peripheral);
    }
}

impl<S> BleCentral<S>
where
    S: BleStack + Send + 'static,
    S::Characteristic: Send,
{
    /// Wrap `stack`, whose completions arrive on `stack_events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stack(
        stack: S,
        mut stack_events: mpsc::UnboundedReceiver<StackEvent<S::Peripheral>>,
        config: SessionConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let mut session = Session::new(stack, config);
        session.set_observer(Box::new(BroadcastObserver::new(event_tx.clone())));
        let session = Arc::new(Mutex::new(session));

        let pump = {
            let session = session.clone();
            tokio::spawn(async move {
                while let Some(event) = stack_events.recv().await {
                    session.lock().handle_event(event);
                }
                debug!("Stack event channel closed");
            })
        };

        Self {
            session,
            event_tx,
            pump: Mutex::new(Some(pump)),
            callback_counter: AtomicU64::new(0),
        }
    }

    // === Scanning ===

    /// Scan for the configured scan timeout.
    pub fn scan(&self) -> Result<u64> {
        let mut session = self.session.lock();
        let timeout = session.config().scan_timeout;
        session.find_peripherals(timeout)
    }

    /// Scan for `timeout`, replacing any scan in progress.
    pub fn find_peripherals(&self, timeout: Duration) -> Result<u64> {
        self.session.lock().find_peripherals(timeout)
    }

    /// Stop the current scan early.
    pub fn stop_scan(&self) -> Result<()> {
        self.session.lock().stop_scan()
    }

    /// Check if a scan is running.
    pub fn is_scanning(&self) -> bool {
        self.session.lock().is_scanning()
    }

    /// Peripherals seen during the current or last scan window.
    pub fn discovered(&self) -> Vec<DiscoveredPeripheral<S::Peripheral>> {
        self.session.lock().discovered().iter().cloned().collect()
    }

    // === Connection ===

    /// Connect to a discovered peripheral by identifier.
    pub fn connect(&self, identifier: &str) -> Result<()> {
        self.session.lock().connect_by_identifier(identifier)
    }

    /// Drop the active connection.
    pub fn disconnect(&self) {
        self.session.lock().disconnect();
    }

    /// Wait until the session is ready.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectFailed`] if the session does not become ready
    /// within `timeout` or the connect sequence fails.
    pub async fn wait_for_connection(&self, timeout: Duration) -> Result<()> {
        let mut events = self.event_tx.subscribe();
        if self.is_connected() {
            return Ok(());
        }
        // A failed setup publishes nothing further until the caller acts.
        if self.state() == SessionState::Failed {
            return Err(Error::ConnectFailed {
                reason: "session setup failed".to_string(),
            });
        }

        let wait = async {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Connected) => return Ok(()),
                    Ok(SessionEvent::Disconnected) => return Err(Error::ConnectionLost),
                    Ok(SessionEvent::Error(reason)) if !self.state().is_transitioning() => {
                        return Err(Error::ConnectFailed { reason })
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(n)) => {
                        warn!("Missed {} session events while waiting", n);
                        if self.is_connected() {
                            return Ok(());
                        }
                    }
                    Err(RecvError::Closed) => return Err(Error::ConnectionLost),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::ConnectFailed {
                reason: format!("not ready after {:?}", timeout),
            })?
    }

    // === Data ===

    /// Request the TX characteristic value.
    pub fn read(&self) -> Result<()> {
        self.session.lock().read()
    }

    /// Write to the RX characteristic without response.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.session.lock().write(data)
    }

    /// Read the signal strength, delivering the result to `callback`.
    ///
    /// The callback runs while the session is locked and must not call back
    /// into this central.
    pub fn read_rssi<F>(&self, callback: F)
    where
        F: FnOnce(Result<i16>) + Send + 'static,
    {
        self.session.lock().read_rssi(callback);
    }

    /// Read the signal strength.
    ///
    /// # Errors
    ///
    /// Fails if there is no active peripheral, the read fails, or a later
    /// RSSI request supersedes this one.
    pub async fn rssi(&self) -> Result<i16> {
        let (tx, rx) = oneshot::channel();
        self.read_rssi(move |result| {
            let _ = tx.send(result);
        });

        rx.await.map_err(|_| Error::RssiFailed {
            reason: "request superseded".to_string(),
        })?
    }

    // === State ===

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.session.lock().state()
    }

    /// Check if the session is ready for I/O.
    pub fn is_connected(&self) -> bool {
        self.session.lock().is_connected()
    }

    /// Most recent successful RSSI reading.
    pub fn last_rssi(&self) -> Option<i16> {
        self.session.lock().last_rssi()
    }

    /// Framework version used for firmware compatibility negotiation.
    pub fn framework_version(&self) -> u16 {
        self.session.lock().framework_version()
    }

    /// Run `f` with exclusive access to the session.
    pub fn with_session<R>(&self, f: impl FnOnce(&mut Session<S>) -> R) -> R {
        f(&mut self.session.lock())
    }

    // === Events ===

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Register a callback for session events.
    pub fn on_event<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.event_tx.subscribe();

        let reader = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => callback(&event),
                    Err(RecvError::Lagged(n)) => {
                        warn!("Event callback {} missed {} events", callback_id, n)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        CallbackHandle::new(callback_id, reader)
    }

    /// Stop scanning, drop the connection and stop processing stack events.
    ///
    /// Waits up to one second for the disconnection to be confirmed.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down BLE central");

        let mut events = self.event_tx.subscribe();
        let engaged = {
            let mut session = self.session.lock();
            session.stop_scan()?;
            let engaged = session.active_peripheral().is_some();
            session.disconnect();
            engaged
        };

        if engaged {
            let confirmed = tokio::time::timeout(Duration::from_secs(1), async {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Disconnected) | Err(RecvError::Closed) => break,
                        _ => {}
                    }
                }
            })
            .await;
            if confirmed.is_err() {
                warn!("Disconnection not confirmed before shutdown");
            }
        }

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        Ok(())
    }
}

impl<S: BleStack> Drop for BleCentral<S> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}
