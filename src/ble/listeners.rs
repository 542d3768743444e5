//! Event broadcast to weakly-held listeners.
//!
//! Observers hand the broadcaster an `Arc<ConnectionEventListener>`
//! and keep the `Arc` alive for as long as they want deliveries; the
//! broadcaster itself stores only `Weak` references and is never the
//! reason a listener outlives its owner. Registration also returns a
//! [`ListenerToken`] whose drop releases the registration explicitly.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use log::debug;
use uuid::Uuid;

use crate::ble::{Address, Event, Service};
use crate::error::Error;

pub type SetupCallback = Box<dyn Fn(Address, &[Service]) + Send + Sync>;
pub type DisconnectCallback = Box<dyn Fn(Address) + Send + Sync>;
pub type ReadCallback = Box<dyn Fn(Address, Uuid, &[u8]) + Send + Sync>;
pub type WriteCallback = Box<dyn Fn(Address, Uuid) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(Address, &Error) + Send + Sync>;

/// Optional callback slots invoked as connection and characteristic
/// events occur.
///
/// Slots run synchronously on the delivering thread (usually the
/// transport's callback thread), one event at a time. Leave a slot
/// `None` to ignore that event kind.
#[derive(Default)]
pub struct ConnectionEventListener {
    pub on_connection_setup_complete: Option<SetupCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_characteristic_read: Option<ReadCallback>,
    pub on_characteristic_write: Option<WriteCallback>,
    pub on_transport_error: Option<ErrorCallback>,
}

impl ConnectionEventListener {
    fn dispatch(&self, event: &Event) {
        match event {
            Event::ConnectionSetupComplete { device, services } => {
                if let Some(callback) = &self.on_connection_setup_complete {
                    callback(*device, services);
                }
            }
            Event::Disconnect { device } => {
                if let Some(callback) = &self.on_disconnect {
                    callback(*device);
                }
            }
            Event::CharacteristicRead {
                device,
                characteristic,
                value,
            } => {
                if let Some(callback) = &self.on_characteristic_read {
                    callback(*device, *characteristic, value);
                }
            }
            Event::CharacteristicWrite {
                device,
                characteristic,
            } => {
                if let Some(callback) = &self.on_characteristic_write {
                    callback(*device, *characteristic);
                }
            }
            Event::TransportError { device, error } => {
                if let Some(callback) = &self.on_transport_error {
                    callback(*device, error);
                }
            }
        }
    }
}

type ListenerSet = Arc<Mutex<Vec<Weak<ConnectionEventListener>>>>;

/// Registration handle returned by [`EventBroadcaster::register`].
///
/// Dropping the token releases the registration, so a scope that owns
/// the token cannot leak its subscription. Explicit
/// [`EventBroadcaster::unregister`] remains available as well.
#[must_use = "dropping the token releases the listener registration"]
pub struct ListenerToken {
    set: Weak<Mutex<Vec<Weak<ConnectionEventListener>>>>,
    listener: Weak<ConnectionEventListener>,
}

impl Drop for ListenerToken {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            let mut entries = lock(&set);
            entries.retain(|entry| entry.strong_count() > 0 && !entry.ptr_eq(&self.listener));
        }
    }
}

/// Registry of weakly-held listeners.
pub struct EventBroadcaster {
    listeners: ListenerSet,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a listener. A no-op if the same live listener is
    /// already registered; dead entries are pruned on every mutation.
    pub fn register(&self, listener: &Arc<ConnectionEventListener>) -> ListenerToken {
        let mut entries = lock(&self.listeners);
        entries.retain(|entry| entry.strong_count() > 0);
        let already = entries
            .iter()
            .any(|entry| entry.as_ptr() == Arc::as_ptr(listener));
        if !already {
            entries.push(Arc::downgrade(listener));
        }
        debug!("registered listener, {} listeners total", entries.len());
        ListenerToken {
            set: Arc::downgrade(&self.listeners),
            listener: Arc::downgrade(listener),
        }
    }

    /// Remove a listener's registration. Idempotent.
    pub fn unregister(&self, listener: &Arc<ConnectionEventListener>) {
        let mut entries = lock(&self.listeners);
        entries.retain(|entry| {
            entry.strong_count() > 0 && entry.as_ptr() != Arc::as_ptr(listener)
        });
        debug!("unregistered listener, {} listeners total", entries.len());
    }

    /// Number of live registrations.
    pub fn listener_count(&self) -> usize {
        let mut entries = lock(&self.listeners);
        entries.retain(|entry| entry.strong_count() > 0);
        entries.len()
    }

    /// Deliver `event` to every live listener's matching slot.
    ///
    /// Iterates over a snapshot taken under the lock and invokes the
    /// slots after releasing it, so listeners may register/unregister
    /// (or re-enter the session) from inside a callback.
    pub fn notify(&self, event: &Event) {
        let snapshot: Vec<Arc<ConnectionEventListener>> = {
            let mut entries = lock(&self.listeners);
            entries.retain(|entry| entry.strong_count() > 0);
            entries.iter().filter_map(Weak::upgrade).collect()
        };
        for listener in snapshot {
            listener.dispatch(event);
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(set: &Mutex<Vec<Weak<ConnectionEventListener>>>) -> MutexGuard<'_, Vec<Weak<ConnectionEventListener>>> {
    set.lock().unwrap_or_else(PoisonError::into_inner)
}
