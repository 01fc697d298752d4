//! # Transform Change Events
//!
//! An observer list per transform. Subscribing returns a `Connection` token;
//! dropping the token unsubscribes. Listeners are called on the thread that
//! mutated the transform, after the hierarchy below it has been invalidated.

use std::{
    cell::RefCell,
    fmt,
    rc::{Rc, Weak},
};

use super::TransformId;

type Listener = Rc<dyn Fn(TransformId)>;

#[derive(Default)]
struct ListenerList {
    next_key: u64,
    entries: Vec<(u64, Listener)>,
}

/// Fired whenever a transform's placement, opacity or parent changes.
#[derive(Default)]
pub struct TransformChangedEvent {
    listeners: Rc<RefCell<ListenerList>>,
}

impl TransformChangedEvent {
    /// Registers `listener` until the returned `Connection` is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Connection
    where
        F: Fn(TransformId) + 'static,
    {
        let mut list = self.listeners.borrow_mut();
        let key = list.next_key;
        list.next_key += 1;
        list.entries.push((key, Rc::new(listener)));

        Connection {
            listeners: Rc::downgrade(&self.listeners),
            key,
        }
    }

    /// Calls every listener. Listeners may subscribe or disconnect while being
    /// notified; such changes apply from the next notification.
    pub(super) fn notify(&self, id: TransformId) {
        let snapshot: Vec<Listener> = self
            .listeners
            .borrow()
            .entries
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(id);
        }
    }

    /// Disconnects every listener. Outstanding `Connection`s become inert.
    pub(super) fn close_all_connections(&self) {
        self.listeners.borrow_mut().entries.clear();
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.listeners.borrow().entries.len()
    }
}

impl fmt::Debug for TransformChangedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformChangedEvent")
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// A scoped subscription. Dropping it unsubscribes the listener.
#[must_use = "dropping a Connection immediately unsubscribes its listener"]
pub struct Connection {
    listeners: Weak<RefCell<ListenerList>>,
    key: u64,
}

impl Connection {
    /// Whether the listener is still registered. False once the transform was
    /// reset or removed.
    pub fn is_connected(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|list| list.borrow().entries.iter().any(|(key, _)| *key == self.key))
    }

    /// Unsubscribes now. Equivalent to dropping the connection.
    pub fn disconnect(self) {}
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(list) = self.listeners.upgrade() {
            list.borrow_mut()
                .entries
                .retain(|(key, _)| *key != self.key);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.key)
            .field("connected", &self.is_connected())
            .finish()
    }
}
