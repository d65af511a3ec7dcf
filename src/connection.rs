//! Connections binding one receiver to one messenger.
//!
//! A [`Connection`] holds only weak links to both endpoints, so it never keeps
//! either of them alive. Closing it (explicitly, or by dropping the last
//! clone) tells the live receiver to forget it and removes the receiver's slot
//! from the live messenger. Whichever endpoint is already gone is skipped.

#[cfg(feature = "serde")]
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::types::{ConnectionId, IdentityKey};

/// Anything that can subscribe to a messenger.
///
/// Implementors hand out a stable key, usually issued once with
/// [`IdentityKey::issue`] and stored in a field.
pub trait Receiver: Send + Sync + 'static {
    /// Identity of this receiver.
    fn receiver_key(&self) -> IdentityKey;

    /// Called when one of this receiver's connections closes.
    fn connection_closed(&self, _keys: &ConnectionKeys) {}
}

/// Messenger side of a connection, erased over the message type.
pub(crate) trait MessengerLink: Send + Sync {
    fn messenger_key(&self) -> IdentityKey;

    /// Remove the receiver's slot if it still belongs to `connection`.
    fn unregister(&self, receiver: IdentityKey, connection: ConnectionId);

    /// Whether the receiver's slot belongs to `connection`.
    fn holds(&self, receiver: IdentityKey, connection: ConnectionId) -> bool;
}

/// The identities a connection links.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ConnectionKeys {
    pub connection: ConnectionId,
    pub receiver: IdentityKey,
    pub messenger: IdentityKey,
}

struct Link {
    keys: ConnectionKeys,
    receiver: Weak<dyn Receiver>,
    messenger: Weak<dyn MessengerLink>,
    closed: AtomicBool,
}

impl Link {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::debug!(
            connection = %self.keys.connection,
            receiver = %self.keys.receiver,
            messenger = %self.keys.messenger,
            "closing connection"
        );

        if let Some(receiver) = self.receiver.upgrade() {
            receiver.connection_closed(&self.keys);
        }
        if let Some(messenger) = self.messenger.upgrade() {
            messenger.unregister(self.keys.receiver, self.keys.connection);
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Cancellation handle for one subscription.
///
/// Clones share the same link; the subscription ends when [`close`](Self::close)
/// is called or the last clone is dropped.
#[derive(Clone)]
#[must_use = "dropping a Connection closes the subscription"]
pub struct Connection {
    link: Arc<Link>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        receiver_key: IdentityKey,
        receiver: Weak<dyn Receiver>,
        messenger_key: IdentityKey,
        messenger: Weak<dyn MessengerLink>,
    ) -> Self {
        Self {
            link: Arc::new(Link {
                keys: ConnectionKeys {
                    connection: id,
                    receiver: receiver_key,
                    messenger: messenger_key,
                },
                receiver,
                messenger,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.link.keys.connection
    }

    pub fn receiver_key(&self) -> IdentityKey {
        self.link.keys.receiver
    }

    pub fn messenger_key(&self) -> IdentityKey {
        self.link.keys.messenger
    }

    pub fn keys(&self) -> ConnectionKeys {
        self.link.keys
    }

    /// Close the connection. Calling this more than once is a no-op.
    pub fn close(&self) {
        self.link.close();
    }

    pub fn is_closed(&self) -> bool {
        self.link.closed.load(Ordering::Acquire)
    }

    /// True while both endpoints are alive and the messenger still holds
    /// this connection's slot.
    pub fn is_active(&self) -> bool {
        if self.is_closed() || self.link.receiver.strong_count() == 0 {
            return false;
        }
        match self.link.messenger.upgrade() {
            Some(messenger) => messenger.holds(self.link.keys.receiver, self.link.keys.connection),
            None => false,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.link.keys.connection)
            .field("receiver", &self.link.keys.receiver)
            .field("messenger", &self.link.keys.messenger)
            .field("closed", &self.is_closed())
            .finish()
    }
}
