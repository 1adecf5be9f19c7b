//! Registry of peripherals sighted during a scan window.
//!
//! Entries are keyed by peripheral identifier and kept in first-seen order.
//! A new sighting of a known identifier updates the entry in place. Entries
//! are never expired here; callers that want expiry can use
//! [`DiscoveryRegistry::seen_since`].

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::ble::stack::PeripheralHandle;

/// A peripheral seen while scanning.
#[derive(Debug, Clone)]
pub struct DiscoveredPeripheral<P> {
    /// Platform handle from the most recent sighting.
    pub peripheral: P,
    /// Signal strength of the most recent sighting, in dBm.
    pub rssi: i16,
    /// When the identifier was first seen.
    pub first_seen: DateTime<Utc>,
    /// When the identifier was last seen.
    pub last_seen: DateTime<Utc>,
}

impl<P: PeripheralHandle> DiscoveredPeripheral<P> {
    /// The peripheral identifier.
    pub fn identifier(&self) -> String {
        self.peripheral.identifier()
    }
}

/// Deduplicated list of discovered peripherals.
#[derive(Debug, Clone)]
pub struct DiscoveryRegistry<P> {
    entries: Vec<DiscoveredPeripheral<P>>,
}

impl<P> Default for DiscoveryRegistry<P> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<P: PeripheralHandle> DiscoveryRegistry<P> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting.
    ///
    /// Updates the handle and signal strength of an existing entry in place,
    /// otherwise appends a new entry.
    pub fn record_sighting(&mut self, peripheral: P, rssi: i16) {
        let now = Utc::now();
        let identifier = peripheral.identifier();

        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.peripheral.identifier() == identifier)
        {
            trace!("Duplicate identifier {}, updating (rssi {})", identifier, rssi);
            entry.peripheral = peripheral;
            entry.rssi = rssi;
            entry.last_seen = now;
            return;
        }

        trace!("New identifier {}, adding (rssi {})", identifier, rssi);
        self.entries.push(DiscoveredPeripheral {
            peripheral,
            rssi,
            first_seen: now,
            last_seen: now,
        });
    }

    /// Look up an entry by identifier.
    pub fn get(&self, identifier: &str) -> Option<&DiscoveredPeripheral<P>> {
        self.entries
            .iter()
            .find(|e| e.peripheral.identifier() == identifier)
    }

    /// Iterate entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &DiscoveredPeripheral<P>> {
        self.entries.iter()
    }

    /// Entry with the strongest signal.
    pub fn strongest(&self) -> Option<&DiscoveredPeripheral<P>> {
        self.entries.iter().max_by_key(|e| e.rssi)
    }

    /// Entries sighted at or after `since`.
    pub fn seen_since(&self, since: DateTime<Utc>) -> Vec<&DiscoveredPeripheral<P>> {
        self.entries.iter().filter(|e| e.last_seen >= since).collect()
    }

    /// Number of distinct identifiers seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been seen.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
