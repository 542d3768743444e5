//! Connection registry.
//!
//! Authoritative map from device address to the live connection handle
//! and the last-discovered service topology. Safe for concurrent
//! access from dispatcher and transport callback threads; mutations
//! for a single device are linearized by the map-wide lock.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use uuid::Uuid;

use crate::ble::{Address, Characteristic, ConnectionHandle, Service};

/// One active link and its discovered topology.
///
/// Created on the connected callback; the topology is replaced
/// wholesale on each successful discovery; destroyed on teardown.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Connection {
    pub handle: ConnectionHandle,
    pub services: Vec<Service>,
}

impl Connection {
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            services: Vec::new(),
        }
    }

    /// Locate a characteristic by UUID anywhere in the topology.
    pub fn find_characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .find(|characteristic| characteristic.uuid == uuid)
    }
}

/// Thread-safe device-to-connection map.
///
/// A device appears here if and only if a connected callback has fired
/// and no matching teardown has since completed.
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<Address, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Snapshot of the device's connection, if any.
    pub fn lookup(&self, device: Address) -> Option<Connection> {
        self.read().get(&device).cloned()
    }

    pub fn contains(&self, device: Address) -> bool {
        self.read().contains_key(&device)
    }

    pub fn handle_of(&self, device: Address) -> Option<ConnectionHandle> {
        self.read().get(&device).map(|conn| conn.handle)
    }

    pub fn services_of(&self, device: Address) -> Option<Vec<Service>> {
        self.read().get(&device).map(|conn| conn.services.clone())
    }

    /// Insert the device's connection, returning any entry it replaced.
    pub fn insert(&self, device: Address, connection: Connection) -> Option<Connection> {
        self.write().insert(device, connection)
    }

    pub fn remove(&self, device: Address) -> Option<Connection> {
        self.write().remove(&device)
    }

    /// Replace the device's topology wholesale. Returns `false` when
    /// the device has no registry entry.
    pub fn set_services(&self, device: Address, services: Vec<Service>) -> bool {
        match self.write().get_mut(&device) {
            Some(connection) => {
                connection.services = services;
                true
            }
            None => false,
        }
    }

    // Registry state is plain data; a panic in another holder does not
    // invalidate it, so poisoned locks are recovered.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Address, Connection>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Address, Connection>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::capability::CharacteristicProps;

    fn device() -> Address {
        Address::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    fn topology() -> Vec<Service> {
        vec![Service {
            uuid: Uuid::parse_str("0000180f-0000-1000-8000-00805f9b34fb").unwrap(),
            characteristics: vec![Characteristic {
                uuid: Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap(),
                properties: CharacteristicProps::READ | CharacteristicProps::NOTIFY,
            }],
        }]
    }

    #[test]
    fn insert_lookup_remove() {
        let registry = ConnectionRegistry::new();
        assert!(registry.lookup(device()).is_none());
        assert!(!registry.contains(device()));

        registry.insert(device(), Connection::new(ConnectionHandle(7)));
        assert!(registry.contains(device()));
        assert_eq!(registry.handle_of(device()), Some(ConnectionHandle(7)));

        let removed = registry.remove(device()).unwrap();
        assert_eq!(removed.handle, ConnectionHandle(7));
        assert!(registry.remove(device()).is_none());
    }

    #[test]
    fn insert_returns_replaced_entry() {
        let registry = ConnectionRegistry::new();
        assert!(registry
            .insert(device(), Connection::new(ConnectionHandle(1)))
            .is_none());
        let old = registry
            .insert(device(), Connection::new(ConnectionHandle(2)))
            .unwrap();
        assert_eq!(old.handle, ConnectionHandle(1));
        assert_eq!(registry.handle_of(device()), Some(ConnectionHandle(2)));
    }

    #[test]
    fn set_services_replaces_topology_wholesale() {
        let registry = ConnectionRegistry::new();
        registry.insert(device(), Connection::new(ConnectionHandle(1)));
        assert_eq!(registry.services_of(device()), Some(Vec::new()));

        assert!(registry.set_services(device(), topology()));
        assert_eq!(registry.services_of(device()), Some(topology()));

        assert!(registry.set_services(device(), Vec::new()));
        assert_eq!(registry.services_of(device()), Some(Vec::new()));
    }

    #[test]
    fn set_services_without_entry_is_rejected() {
        let registry = ConnectionRegistry::new();
        assert!(!registry.set_services(device(), topology()));
        assert!(registry.services_of(device()).is_none());
    }

    #[test]
    fn find_characteristic_searches_all_services() {
        let mut connection = Connection::new(ConnectionHandle(1));
        connection.services = topology();
        let uuid = Uuid::parse_str("00002a19-0000-1000-8000-00805f9b34fb").unwrap();
        assert!(connection.find_characteristic(uuid).is_some());
        assert!(connection.find_characteristic(Uuid::nil()).is_none());
    }
}
