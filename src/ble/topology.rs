//! GATT topology lookup.
//!
//! The platform stack owns each peripheral's service tree; this module only
//! searches a snapshot of it. Nothing is cached, so a lookup always reflects
//! the most recent discovery result.

use uuid::Uuid;

use crate::error::{Error, Result};

/// A characteristic discovered under a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic<C> {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Platform handle used for GATT requests.
    pub handle: C,
}

/// A discovered service and its characteristics, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService<C> {
    /// Service UUID.
    pub uuid: Uuid,
    /// Whether this is a primary service.
    pub primary: bool,
    /// Characteristics discovered so far. Empty until characteristic
    /// discovery for this service has completed.
    pub characteristics: Vec<GattCharacteristic<C>>,
}

impl<C> GattService<C> {
    /// Create a primary service with no characteristics.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            primary: true,
            characteristics: Vec::new(),
        }
    }

    /// Add a characteristic (builder style).
    pub fn with_characteristic(mut self, uuid: Uuid, handle: C) -> Self {
        self.characteristics.push(GattCharacteristic { uuid, handle });
        self
    }
}

/// Find a service by UUID.
///
/// A primary service wins over a secondary one with the same UUID, even if
/// the secondary was discovered first.
pub fn find_service<'a, C>(topology: &'a [GattService<C>], service_uuid: &Uuid) -> Option<&'a GattService<C>> {
    let mut matching = topology.iter().filter(|s| s.uuid == *service_uuid);
    let first = matching.next()?;
    if first.primary {
        return Some(first);
    }
    matching.find(|s| s.primary).or(Some(first))
}

/// Resolve a (service, characteristic) pair to the characteristic handle.
///
/// # Errors
///
/// Returns [`Error::ServiceNotFound`] if no service matches and
/// [`Error::CharacteristicNotFound`] if the service exists but has no
/// characteristic with that UUID.
pub fn resolve_characteristic<'a, C>(
    topology: &'a [GattService<C>],
    service_uuid: &Uuid,
    characteristic_uuid: &Uuid,
) -> Result<&'a C> {
    let service = find_service(topology, service_uuid).ok_or_else(|| Error::ServiceNotFound {
        uuid: service_uuid.to_string(),
    })?;

    service
        .characteristics
        .iter()
        .find(|c| c.uuid == *characteristic_uuid)
        .map(|c| &c.handle)
        .ok_or_else(|| Error::CharacteristicNotFound {
            uuid: characteristic_uuid.to_string(),
        })
}
