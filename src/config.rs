//! Compile-time configuration.
//!
//! Timing parameters for the GATT request watchdog live here so they
//! can be tuned in one place.

// GATT request supervision

/// Default per-request GATT timeout (ms).
///
/// A read or write whose completion callback has not arrived within
/// this window is treated as lost: the watchdog surfaces a timeout
/// error and releases the device's request slot. 30 s matches the
/// supervision window of common platform BLE stacks.
pub const GATT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Watchdog sweep interval (ms).
///
/// Upper bound on how late a timeout is detected after its deadline.
pub const WATCHDOG_TICK_MS: u64 = 100;
