//! Bluetooth Low Energy subsystem.
//!
//! This module drives an abstract BLE transport in **Central** role:
//!
//! 1. **Session** - validates and dispatches connect/disconnect and
//!    characteristic read/write operations, one outstanding GATT
//!    request per device.
//! 2. **Registry** - maps device addresses to live connection handles
//!    and the last-discovered service topology.
//! 3. **Listeners** - broadcasts connection and characteristic events
//!    to weakly-held observers.
//!
//! The platform stack sits behind the [`transport::Transport`] trait;
//! its completion callbacks arrive through [`transport::GattEvents`]
//! on threads the transport owns.

pub mod capability;
pub mod hex;
pub mod listeners;
pub mod operation;
pub mod registry;
pub mod session;
pub mod transport;

use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::error::Error as CrateError;
use capability::CharacteristicProps;

/// 6-byte BLE device address.
///
/// Stable identity of a remote peripheral, independent of any live
/// connection handle. Used as the registry key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub const fn octets(self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

/// Error parsing a textual BLE address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("malformed BLE address (expected AA:BB:CC:DD:EE:FF)")]
pub struct AddressParseError;

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in &mut octets {
            let part = parts.next().ok_or(AddressParseError)?;
            if part.len() != 2 {
                return Err(AddressParseError);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| AddressParseError)?;
        }
        if parts.next().is_some() {
            return Err(AddressParseError);
        }
        Ok(Self(octets))
    }
}

/// Opaque identifier for one live link, minted by the transport at
/// connect time.
///
/// Every transport callback carries the handle it was issued for, so
/// deliveries against a torn-down link can be detected and dropped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status delivered with a transport callback.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GattStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    InsufficientAuthentication,
    /// Raw stack-specific status code.
    Other(u16),
}

impl GattStatus {
    pub fn is_success(self) -> bool {
        matches!(self, GattStatus::Success)
    }
}

/// Link state reported by `on_connection_state_changed`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// GATT write mode.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WriteMode {
    /// The peripheral acknowledges the write with a completion callback.
    WithResponse,
    /// Fire-and-forget write; the stack reports completion locally.
    WithoutResponse,
}

/// Parameters forwarded to the transport's connect call.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ConnectParams {
    /// Ask the stack to transparently re-establish the link if it drops.
    pub auto_reconnect: bool,
}

/// One characteristic of a remote service.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub properties: CharacteristicProps,
}

/// A remote GATT service and its characteristics.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Service {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

/// Events fanned out to registered listeners.
#[derive(Clone, PartialEq, Debug)]
pub enum Event {
    /// Service discovery finished; the connection is ready for use.
    ConnectionSetupComplete {
        device: Address,
        services: Vec<Service>,
    },
    /// The connection was torn down (locally or by the peer).
    Disconnect { device: Address },
    /// A characteristic read completed with the given value.
    CharacteristicRead {
        device: Address,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// A characteristic write was acknowledged.
    CharacteristicWrite {
        device: Address,
        characteristic: Uuid,
    },
    /// The transport reported a failure, or a request timed out.
    TransportError { device: Address, error: CrateError },
}

/// Multi-line diagnostic dump of a discovered topology.
///
/// One header line per service, one `|--` line per characteristic with
/// its property names. Logged at debug level after every successful
/// discovery.
pub fn format_gatt_table(services: &[Service]) -> String {
    if services.is_empty() {
        return String::from("no services discovered");
    }
    let mut table = String::new();
    for service in services {
        let _ = writeln!(table, "service {}", service.uuid);
        for characteristic in &service.characteristics {
            let _ = writeln!(
                table,
                "|-- {}: {}",
                characteristic.uuid,
                characteristic.properties.describe()
            );
        }
    }
    table
}
