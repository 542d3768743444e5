//! Abstract BLE transport.
//!
//! The platform stack (BlueZ, CoreBluetooth, an embedded SoftDevice
//! bridge, or a test double) implements [`Transport`]; the session
//! hands it a [`GattEvents`] sink at connect time and observes every
//! completion through it.

use std::sync::Arc;

use uuid::Uuid;

use crate::ble::{
    Address, ConnectParams, ConnectionHandle, ConnectionState, GattStatus, Service, WriteMode,
};

/// Operations the session issues against the platform BLE stack.
///
/// All calls are fire-and-forget: completion is observed only through
/// the [`GattEvents`] callbacks. Implementations must deliver those
/// callbacks asynchronously from their own threads, never from within
/// a `Transport` method call - the session's dispatch critical section
/// is not re-entrant.
pub trait Transport: Send + Sync {
    /// Initiate a connection. The returned handle identifies the link
    /// in every subsequent callback for it.
    fn connect(
        &self,
        device: Address,
        params: &ConnectParams,
        events: Arc<dyn GattEvents>,
    ) -> ConnectionHandle;

    /// Request an orderly link teardown.
    fn disconnect(&self, handle: ConnectionHandle);

    /// Release the handle and all resources behind it.
    fn close(&self, handle: ConnectionHandle);

    /// Start service/characteristic discovery.
    fn discover_services(&self, handle: ConnectionHandle);

    /// Read a characteristic's value.
    fn read_characteristic(&self, handle: ConnectionHandle, characteristic: Uuid);

    /// Write `payload` to a characteristic with the given mode.
    fn write_characteristic(
        &self,
        handle: ConnectionHandle,
        characteristic: Uuid,
        mode: WriteMode,
        payload: &[u8],
    );
}

/// Completion callbacks delivered by the transport.
///
/// Every method carries the handle the event belongs to, so the
/// session can drop deliveries for links it has already torn down.
pub trait GattEvents: Send + Sync {
    fn on_connection_state_changed(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        state: ConnectionState,
    );

    /// Discovery finished; on success `services` is the full topology
    /// snapshot.
    fn on_services_discovered(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<Service>,
    );

    fn on_characteristic_read(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    );

    fn on_characteristic_write(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    );
}
