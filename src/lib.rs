//! gattlink - BLE central-role GATT connection manager.
//!
//! This crate tracks active connections to remote peripherals,
//! serializes asynchronous GATT operations against an underlying
//! callback-driven radio stack, and fans out connection and
//! characteristic lifecycle events to interested observers:
//!
//! 1. **Session** - [`BleSession`] owns the registry, dispatcher and
//!    broadcaster as one aggregate; multiple independent sessions can
//!    coexist (useful for tests and multi-adapter hosts).
//! 2. **Transport** - the platform BLE stack is abstracted behind the
//!    [`Transport`] trait; completions come back through [`GattEvents`]
//!    callbacks on threads owned by the transport.
//! 3. **Listeners** - observers register a [`ConnectionEventListener`]
//!    whose optional callback slots are invoked synchronously on the
//!    delivering thread. Listeners are weakly held - registration never
//!    keeps an observer alive.
//!
//! Scanning, UI rendering, and permission flows are out of scope; the
//! crate handles only currently-attached peripherals in process memory.

pub mod ble;
pub mod config;
pub mod error;

pub use ble::capability::CharacteristicProps;
pub use ble::hex::{bytes_to_hex, hex_to_bytes, DecodeError};
pub use ble::listeners::{ConnectionEventListener, EventBroadcaster, ListenerToken};
pub use ble::operation::Operation;
pub use ble::registry::{Connection, ConnectionRegistry};
pub use ble::session::BleSession;
pub use ble::transport::{GattEvents, Transport};
pub use ble::{
    format_gatt_table, Address, AddressParseError, Characteristic, ConnectParams,
    ConnectionHandle, ConnectionState, Event, GattStatus, Service, WriteMode,
};
pub use error::Error;
