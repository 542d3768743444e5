//! BLE session - operation dispatch and transport event handling.
//!
//! [`BleSession`] owns the connection registry, the event broadcaster
//! and the dispatch state as one aggregate:
//!
//! 1. Callers submit [`Operation`]s (or use the convenience methods);
//!    preconditions are validated against the registry and failures
//!    returned synchronously.
//! 2. Validated read/write requests enter a per-device FIFO queue with
//!    one request in flight per device, matching the one-outstanding-
//!    GATT-request limit of real BLE stacks.
//! 3. Transport callbacks mutate the registry, release the in-flight
//!    slot, and fan events out through the broadcaster.
//! 4. A watchdog thread sweeps in-flight requests whose completion
//!    callback never arrived and surfaces a timeout error.
//!
//! A single dispatch mutex covers every validate-then-transport-call
//! sequence and every registry mutation, so a teardown can never
//! remove an entry between another operation's validation and its
//! transport call. Listener callbacks always run after that mutex is
//! released and may re-enter the session.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use uuid::Uuid;

use crate::ble::hex;
use crate::ble::listeners::{ConnectionEventListener, EventBroadcaster, ListenerToken};
use crate::ble::operation::Operation;
use crate::ble::registry::{Connection, ConnectionRegistry};
use crate::ble::transport::{GattEvents, Transport};
use crate::ble::{
    format_gatt_table, Address, ConnectParams, ConnectionHandle, ConnectionState, Event,
    GattStatus, Service, WriteMode,
};
use crate::config;
use crate::error::Error;

/// A validated request waiting for (or holding) the device's slot.
enum GattRequest {
    Read {
        handle: ConnectionHandle,
        characteristic: Uuid,
    },
    Write {
        handle: ConnectionHandle,
        characteristic: Uuid,
        mode: WriteMode,
        payload: Vec<u8>,
    },
}

impl GattRequest {
    fn characteristic(&self) -> Uuid {
        match self {
            GattRequest::Read { characteristic, .. }
            | GattRequest::Write { characteristic, .. } => *characteristic,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            GattRequest::Read { .. } => "read",
            GattRequest::Write { .. } => "write",
        }
    }
}

struct Inflight {
    request: GattRequest,
    deadline: Instant,
}

#[derive(Default)]
struct DispatchState {
    inflight: HashMap<Address, Inflight>,
    queues: HashMap<Address, VecDeque<GattRequest>>,
    /// Handle of the outstanding connect attempt per device, recorded
    /// when the connect call is issued and cleared by its
    /// connection-state callback. Lets the adapter tell "connect
    /// attempt failed" apart from a late callback for a link that was
    /// already torn down - both leave the registry without an entry.
    pending_connects: HashMap<Address, ConnectionHandle>,
}

impl DispatchState {
    fn purge(&mut self, device: Address) {
        self.inflight.remove(&device);
        self.queues.remove(&device);
    }
}

struct SessionInner {
    transport: Arc<dyn Transport>,
    registry: ConnectionRegistry,
    broadcaster: EventBroadcaster,
    dispatch: Mutex<DispatchState>,
    request_timeout: Duration,
    adapter: Arc<EventAdapter>,
}

/// Central-role connection manager over an abstract transport.
///
/// Each session is an independent aggregate - no globals, so tests and
/// multi-adapter hosts construct as many as they need. Dropping the
/// session stops its watchdog; callbacks arriving afterwards are
/// ignored.
pub struct BleSession {
    inner: Arc<SessionInner>,
}

impl BleSession {
    /// Create a session with the default request timeout
    /// ([`config::GATT_REQUEST_TIMEOUT_MS`]).
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_request_timeout(
            transport,
            Duration::from_millis(config::GATT_REQUEST_TIMEOUT_MS),
        )
    }

    /// Create a session with a custom per-request timeout.
    pub fn with_request_timeout(transport: Arc<dyn Transport>, request_timeout: Duration) -> Self {
        let inner = Arc::new_cyclic(|weak| SessionInner {
            transport,
            registry: ConnectionRegistry::new(),
            broadcaster: EventBroadcaster::new(),
            dispatch: Mutex::new(DispatchState::default()),
            request_timeout,
            adapter: Arc::new(EventAdapter {
                session: weak.clone(),
            }),
        });
        spawn_watchdog(&inner);
        Self { inner }
    }

    /// Validate and dispatch one operation.
    ///
    /// `Ok(())` means "attempted, completion pending" - results arrive
    /// through listener events. `Err` means the operation was never
    /// attempted.
    pub fn execute(&self, op: Operation) -> Result<(), Error> {
        self.inner.execute(op)
    }

    /// Connect to `device`. Rejected with [`Error::AlreadyConnected`]
    /// when a live connection exists; the dispatcher itself does not
    /// deduplicate.
    pub fn connect(&self, device: Address, params: ConnectParams) -> Result<(), Error> {
        if self.inner.registry.contains(device) {
            return Err(Error::AlreadyConnected(device));
        }
        self.execute(Operation::Connect { device, params })
    }

    /// Tear down the device's connection.
    pub fn disconnect(&self, device: Address) -> Result<(), Error> {
        self.execute(Operation::Disconnect { device })
    }

    /// Read a characteristic's value.
    pub fn read_characteristic(&self, device: Address, characteristic: Uuid) -> Result<(), Error> {
        self.execute(Operation::CharacteristicRead {
            device,
            characteristic,
        })
    }

    /// Write `payload`, resolving the write mode from the
    /// characteristic's capabilities (with-response preferred).
    pub fn write_characteristic(
        &self,
        device: Address,
        characteristic: Uuid,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        self.execute(Operation::CharacteristicWrite {
            device,
            characteristic,
            mode: None,
            payload,
        })
    }

    /// Write `payload` with an explicit mode, rejected with
    /// [`Error::Unwritable`] when the characteristic does not support it.
    pub fn write_characteristic_with_mode(
        &self,
        device: Address,
        characteristic: Uuid,
        mode: WriteMode,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        self.execute(Operation::CharacteristicWrite {
            device,
            characteristic,
            mode: Some(mode),
            payload,
        })
    }

    /// The device's last-discovered topology, if connected.
    pub fn topology_of(&self, device: Address) -> Option<Vec<Service>> {
        self.inner.registry.services_of(device)
    }

    pub fn is_connected(&self, device: Address) -> bool {
        self.inner.registry.contains(device)
    }

    /// Register a listener for connection and characteristic events.
    pub fn register_listener(&self, listener: &Arc<ConnectionEventListener>) -> ListenerToken {
        self.inner.broadcaster.register(listener)
    }

    pub fn unregister_listener(&self, listener: &Arc<ConnectionEventListener>) {
        self.inner.broadcaster.unregister(listener)
    }
}

impl SessionInner {
    fn execute(&self, op: Operation) -> Result<(), Error> {
        let mut dispatch = lock(&self.dispatch);
        match op {
            // Connect skips registry validation: the connection is in
            // progress, not yet present.
            Operation::Connect { device, params } => {
                info!("connecting to {device}");
                let events: Arc<dyn GattEvents> = self.adapter.clone();
                let handle = self.transport.connect(device, &params, events);
                debug!("transport minted handle {handle} for {device}");
                dispatch.pending_connects.insert(device, handle);
                Ok(())
            }
            Operation::Disconnect { device } => {
                let connection = self
                    .registry
                    .remove(device)
                    .ok_or(Error::NotConnected(device))?;
                dispatch.purge(device);
                self.transport.disconnect(connection.handle);
                self.transport.close(connection.handle);
                info!("disconnected from {device}");
                drop(dispatch);
                self.broadcaster.notify(&Event::Disconnect { device });
                Ok(())
            }
            Operation::CharacteristicRead {
                device,
                characteristic,
            } => {
                let connection = self
                    .registry
                    .lookup(device)
                    .ok_or(Error::NotConnected(device))?;
                let props = connection
                    .find_characteristic(characteristic)
                    .ok_or(Error::CharacteristicNotFound(characteristic))?
                    .properties;
                if !props.is_readable() {
                    return Err(Error::Unreadable(characteristic));
                }
                self.submit(
                    &mut dispatch,
                    device,
                    GattRequest::Read {
                        handle: connection.handle,
                        characteristic,
                    },
                );
                Ok(())
            }
            Operation::CharacteristicWrite {
                device,
                characteristic,
                mode,
                payload,
            } => {
                let connection = self
                    .registry
                    .lookup(device)
                    .ok_or(Error::NotConnected(device))?;
                let props = connection
                    .find_characteristic(characteristic)
                    .ok_or(Error::CharacteristicNotFound(characteristic))?
                    .properties;
                let resolved = match mode {
                    None => props
                        .resolve_write_mode()
                        .ok_or(Error::Unwritable(characteristic))?,
                    Some(requested) => {
                        if !props.supports_write_mode(requested) {
                            return Err(Error::Unwritable(characteristic));
                        }
                        requested
                    }
                };
                debug!(
                    "write to {characteristic} on {device}: {}",
                    hex::bytes_to_hex(&payload)
                );
                self.submit(
                    &mut dispatch,
                    device,
                    GattRequest::Write {
                        handle: connection.handle,
                        characteristic,
                        mode: resolved,
                        payload,
                    },
                );
                Ok(())
            }
        }
    }

    /// Issue the request now if the device's slot is free, otherwise
    /// queue it behind the in-flight request.
    fn submit(&self, dispatch: &mut DispatchState, device: Address, request: GattRequest) {
        if dispatch.inflight.contains_key(&device) {
            debug!(
                "{} request for {device} queued behind in-flight request",
                request.kind()
            );
            dispatch.queues.entry(device).or_default().push_back(request);
        } else {
            self.issue(dispatch, device, request);
        }
    }

    fn issue(&self, dispatch: &mut DispatchState, device: Address, request: GattRequest) {
        match &request {
            GattRequest::Read {
                handle,
                characteristic,
            } => {
                debug!("issuing read of {characteristic} on {device}");
                self.transport.read_characteristic(*handle, *characteristic);
            }
            GattRequest::Write {
                handle,
                characteristic,
                mode,
                payload,
            } => {
                debug!("issuing {mode:?} write of {characteristic} on {device}");
                self.transport
                    .write_characteristic(*handle, *characteristic, *mode, payload);
            }
        }
        dispatch.inflight.insert(
            device,
            Inflight {
                request,
                deadline: Instant::now() + self.request_timeout,
            },
        );
    }

    /// Pop the device's next queued request and issue it.
    fn issue_next(&self, dispatch: &mut DispatchState, device: Address) {
        let next = dispatch
            .queues
            .get_mut(&device)
            .and_then(|queue| queue.pop_front());
        if dispatch
            .queues
            .get(&device)
            .map_or(false, |queue| queue.is_empty())
        {
            dispatch.queues.remove(&device);
        }
        if let Some(request) = next {
            self.issue(dispatch, device, request);
        }
    }

    /// Tear down the device's connection if `handle` is still the live
    /// one, dropping its queued requests with it. The handle check and
    /// the removal happen under the same dispatch lock, so a late
    /// callback can never tear down a link re-established in the
    /// meantime. Returns whether a connection was removed; a stale
    /// handle is a logged no-op.
    fn teardown_if(&self, device: Address, handle: ConnectionHandle) -> bool {
        let mut dispatch = lock(&self.dispatch);
        if self.registry.handle_of(device) != Some(handle) {
            drop(dispatch);
            debug!("teardown for {device}: handle {handle} is not the live connection");
            return false;
        }
        self.registry.remove(device);
        dispatch.purge(device);
        self.transport.close(handle);
        drop(dispatch);
        self.broadcaster.notify(&Event::Disconnect { device });
        true
    }

    fn handle_connection_state(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        state: ConnectionState,
    ) {
        if status.is_success() && state == ConnectionState::Connected {
            info!("connected to {device} (handle {handle})");
            let mut dispatch = lock(&self.dispatch);
            if dispatch.pending_connects.get(&device) == Some(&handle) {
                dispatch.pending_connects.remove(&device);
            }
            if let Some(old) = self.registry.insert(device, Connection::new(handle)) {
                // Requests queued against the old handle can never
                // complete; drop them with it.
                warn!("replacing stale connection to {device} (handle {})", old.handle);
                dispatch.purge(device);
                self.transport.close(old.handle);
            }
            self.transport.discover_services(handle);
            drop(dispatch);
            return;
        }

        // A connect attempt that ended without a connection never made
        // it into the registry; resolve it through its pending record.
        let mut dispatch = lock(&self.dispatch);
        if dispatch.pending_connects.get(&device) == Some(&handle) {
            dispatch.pending_connects.remove(&device);
            drop(dispatch);
            if status.is_success() {
                debug!("connect attempt to {device} ended disconnected");
            } else {
                warn!("connect attempt to {device} failed: {status:?}");
                self.broadcaster.notify(&Event::TransportError {
                    device,
                    error: Error::TransportFailure { status },
                });
            }
            return;
        }
        drop(dispatch);

        // Peer disconnect or link failure. teardown_if drops the event
        // when the handle is no longer the live connection.
        if status.is_success() {
            if self.teardown_if(device, handle) {
                info!("{device} disconnected by peer");
            }
        } else if self.teardown_if(device, handle) {
            warn!("connection state error for {device}: {status:?}");
            self.broadcaster.notify(&Event::TransportError {
                device,
                error: Error::TransportFailure { status },
            });
        }
    }

    fn handle_services_discovered(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<Service>,
    ) {
        if !status.is_success() {
            if self.teardown_if(device, handle) {
                warn!("service discovery for {device} failed: {status:?}");
                self.broadcaster.notify(&Event::TransportError {
                    device,
                    error: Error::TransportFailure { status },
                });
            }
            return;
        }

        let guard = lock(&self.dispatch);
        if self.registry.handle_of(device) != Some(handle) {
            debug!("ignoring service discovery on stale handle for {device}");
            return;
        }

        debug!("discovered {} services for {device}", services.len());
        debug!("gatt table for {device}:\n{}", format_gatt_table(&services));
        self.registry.set_services(device, services.clone());
        drop(guard);
        self.broadcaster
            .notify(&Event::ConnectionSetupComplete { device, services });
    }

    fn handle_characteristic_read(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    ) {
        let mut dispatch = lock(&self.dispatch);
        if self.registry.handle_of(device) != Some(handle) {
            debug!("ignoring read completion on stale handle for {device}");
            return;
        }
        dispatch.inflight.remove(&device);
        self.issue_next(&mut dispatch, device);
        drop(dispatch);

        if status.is_success() {
            debug!(
                "read {characteristic} on {device}: {}",
                hex::bytes_to_hex(&value)
            );
            self.broadcaster.notify(&Event::CharacteristicRead {
                device,
                characteristic,
                value,
            });
        } else {
            warn!("read of {characteristic} on {device} failed: {status:?}");
            self.broadcaster.notify(&Event::TransportError {
                device,
                error: Error::TransportFailure { status },
            });
        }
    }

    fn handle_characteristic_write(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    ) {
        let mut dispatch = lock(&self.dispatch);
        if self.registry.handle_of(device) != Some(handle) {
            debug!("ignoring write completion on stale handle for {device}");
            return;
        }
        dispatch.inflight.remove(&device);
        self.issue_next(&mut dispatch, device);
        drop(dispatch);

        if status.is_success() {
            debug!("wrote {characteristic} on {device}");
            self.broadcaster.notify(&Event::CharacteristicWrite {
                device,
                characteristic,
            });
        } else {
            warn!("write of {characteristic} on {device} failed: {status:?}");
            self.broadcaster.notify(&Event::TransportError {
                device,
                error: Error::TransportFailure { status },
            });
        }
    }

    /// Expire in-flight requests whose completion never arrived.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let mut expired: Vec<(Address, Uuid)> = Vec::new();

        let mut dispatch = lock(&self.dispatch);
        let overdue: Vec<Address> = dispatch
            .inflight
            .iter()
            .filter(|(_, inflight)| inflight.deadline <= now)
            .map(|(device, _)| *device)
            .collect();
        for device in overdue {
            if let Some(inflight) = dispatch.inflight.remove(&device) {
                expired.push((device, inflight.request.characteristic()));
            }
            self.issue_next(&mut dispatch, device);
        }
        drop(dispatch);

        for (device, characteristic) in expired {
            warn!("request for {characteristic} on {device} timed out");
            self.broadcaster.notify(&Event::TransportError {
                device,
                error: Error::Timeout { characteristic },
            });
        }
    }
}

/// The `GattEvents` sink handed to the transport.
///
/// Holds only a weak session reference - callbacks delivered after the
/// session drops are ignored.
struct EventAdapter {
    session: Weak<SessionInner>,
}

impl GattEvents for EventAdapter {
    fn on_connection_state_changed(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        state: ConnectionState,
    ) {
        if let Some(session) = self.session.upgrade() {
            session.handle_connection_state(device, handle, status, state);
        }
    }

    fn on_services_discovered(
        &self,
        device: Address,
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<Service>,
    ) {
        if let Some(session) = self.session.upgrade() {
            session.handle_services_discovered(device, handle, status, services);
        }
    }

    fn on_characteristic_read(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
        value: Vec<u8>,
    ) {
        if let Some(session) = self.session.upgrade() {
            session.handle_characteristic_read(device, handle, characteristic, status, value);
        }
    }

    fn on_characteristic_write(
        &self,
        device: Address,
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    ) {
        if let Some(session) = self.session.upgrade() {
            session.handle_characteristic_write(device, handle, characteristic, status);
        }
    }
}

fn spawn_watchdog(inner: &Arc<SessionInner>) {
    let session = Arc::downgrade(inner);
    let spawned = thread::Builder::new()
        .name("gattlink-watchdog".into())
        .spawn(move || {
            let tick = Duration::from_millis(config::WATCHDOG_TICK_MS);
            loop {
                thread::sleep(tick);
                match session.upgrade() {
                    Some(session) => session.sweep_expired(),
                    None => break,
                }
            }
        });
    if let Err(err) = spawned {
        warn!("request watchdog could not be spawned: {err}");
    }
}

fn lock(dispatch: &Mutex<DispatchState>) -> MutexGuard<'_, DispatchState> {
    dispatch.lock().unwrap_or_else(PoisonError::into_inner)
}
