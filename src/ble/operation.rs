//! Tagged GATT operation variants.
//!
//! Operations are short-lived value types: constructed by a caller and
//! consumed immediately by [`BleSession::execute`](crate::BleSession::execute).

use uuid::Uuid;

use crate::ble::{Address, ConnectParams, WriteMode};

/// One high-level intent against a remote peripheral.
///
/// Equality compares write payloads by bytes, not identity.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operation {
    /// Establish a connection. The only variant valid for a device not
    /// yet present in the registry.
    Connect {
        device: Address,
        params: ConnectParams,
    },
    /// Tear down the device's connection.
    Disconnect { device: Address },
    /// Read a characteristic's value.
    CharacteristicRead {
        device: Address,
        characteristic: Uuid,
    },
    /// Write `payload` to a characteristic. `mode: None` resolves the
    /// write mode from the characteristic's capabilities.
    CharacteristicWrite {
        device: Address,
        characteristic: Uuid,
        mode: Option<WriteMode>,
        payload: Vec<u8>,
    },
}

impl Operation {
    /// The device this operation targets.
    pub fn device(&self) -> Address {
        match self {
            Operation::Connect { device, .. }
            | Operation::Disconnect { device }
            | Operation::CharacteristicRead { device, .. }
            | Operation::CharacteristicWrite { device, .. } => *device,
        }
    }
}
