//! Observer contract for session notifications.

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::error::Error;

/// Receives one-way notifications from a [`Session`](super::Session).
///
/// Calls are made on the session's serial context while it is being mutated,
/// so implementations must not call back into the session.
#[cfg_attr(test, mockall::automock)]
pub trait SessionObserver: Send {
    /// The active peripheral is connected and ready for I/O.
    fn on_connected(&mut self);

    /// The active peripheral disconnected.
    fn on_disconnected(&mut self);

    /// A signal strength reading completed.
    fn on_rssi_updated(&mut self, rssi: i16);

    /// The TX characteristic delivered a value.
    fn on_data_received(&mut self, data: Option<Vec<u8>>);

    /// An asynchronous operation failed. Ignored unless overridden.
    fn on_error(&mut self, error: &Error) {
        let _ = error;
    }
}

/// Session notification as published on a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Session reached the ready state.
    Connected,
    /// Active peripheral disconnected.
    Disconnected,
    /// New RSSI reading in dBm.
    RssiUpdated(i16),
    /// Data from the TX characteristic.
    DataReceived(Option<Bytes>),
    /// Description of an asynchronous failure.
    Error(String),
}

/// Observer that republishes every notification as a [`SessionEvent`].
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl BroadcastObserver {
    /// Publish on `event_tx`.
    pub fn new(event_tx: broadcast::Sender<SessionEvent>) -> Self {
        Self { event_tx }
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }
}

impl SessionObserver for BroadcastObserver {
    fn on_connected(&mut self) {
        self.publish(SessionEvent::Connected);
    }

    fn on_disconnected(&mut self) {
        self.publish(SessionEvent::Disconnected);
    }

    fn on_rssi_updated(&mut self, rssi: i16) {
        self.publish(SessionEvent::RssiUpdated(rssi));
    }

    fn on_data_received(&mut self, data: Option<Vec<u8>>) {
        self.publish(SessionEvent::DataReceived(data.map(Bytes::from)));
    }

    fn on_error(&mut self, error: &Error) {
        self.publish(SessionEvent::Error(error.to_string()));
    }
}
