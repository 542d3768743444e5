//! Unified error type for gattlink.
//!
//! Precondition failures are returned synchronously from
//! [`BleSession::execute`](crate::BleSession::execute); transport-reported
//! failures arrive later through the event broadcaster. All errors are
//! device-scoped - none is fatal to the process.

use thiserror::Error;
use uuid::Uuid;

use crate::ble::hex::DecodeError;
use crate::ble::{Address, GattStatus};

/// Top-level error type used across the crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Preconditions (detected before any transport call)
    /// A connect was requested for a device that already has a live
    /// connection.
    #[error("already connected to {0}")]
    AlreadyConnected(Address),

    /// The operation requires a live connection and the device has none.
    #[error("not connected to {0}")]
    NotConnected(Address),

    /// The characteristic UUID is not present in the device's
    /// discovered topology.
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),

    /// The characteristic does not declare the READ property.
    #[error("characteristic {0} is not readable")]
    Unreadable(Uuid),

    /// The characteristic supports neither write mode (or not the
    /// explicitly requested one).
    #[error("characteristic {0} cannot be written to")]
    Unwritable(Uuid),

    // Transport
    /// The transport reported a non-success status in a callback.
    #[error("transport failure with status {status:?}")]
    TransportFailure { status: GattStatus },

    /// No completion callback arrived for a dispatched request within
    /// the session's request timeout.
    #[error("request for characteristic {characteristic} timed out")]
    Timeout { characteristic: Uuid },

    // Payload
    /// A hex payload string could not be decoded.
    #[error("payload decoding failed: {0}")]
    Decoding(#[from] DecodeError),
}
