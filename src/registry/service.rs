//! Subscriber-to-connections bookkeeping across many messengers.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::connection::{Connection, ConnectionKeys, Receiver};
use crate::messenger::Messenger;
use crate::types::{Author, IdentityKey};

type ConnectionsByMessenger = HashMap<IdentityKey, Connection>;

/// Keeps the connections of each subscriber, keyed by messenger.
///
/// One subscriber may observe any number of differently typed messengers
/// through the same registry and drop all of them with one call. Connections
/// are always closed after the registry lock is released, since closing one
/// calls back into the receiver and the messenger.
pub struct Registry {
    connections: Mutex<HashMap<IdentityKey, ConnectionsByMessenger>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide default registry.
    pub fn shared() -> Arc<Registry> {
        static SHARED: OnceLock<Arc<Registry>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(Registry::new())))
    }

    // --- Subscribing ---

    /// Subscribe `subscriber` to `messenger`, replacing any earlier
    /// subscription between the two.
    pub fn subscribe<R, M, F>(&self, subscriber: &Arc<R>, messenger: &Messenger<M>, callback: F)
    where
        R: Receiver,
        M: Send + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.insert(messenger.subscribe(subscriber, callback));
    }

    /// Like [`subscribe`](Self::subscribe), with the message author passed to the callback.
    pub fn subscribe_with_author<R, M, F>(
        &self,
        subscriber: &Arc<R>,
        messenger: &Messenger<M>,
        callback: F,
    ) where
        R: Receiver,
        M: Send + 'static,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.insert(messenger.subscribe_with_author(subscriber, callback));
    }

    /// Like [`subscribe_with_author`](Self::subscribe_with_author), skipping
    /// messages the filter rejects.
    pub fn subscribe_filtered<R, M, P, F>(
        &self,
        subscriber: &Arc<R>,
        messenger: &Messenger<M>,
        filter: P,
        callback: F,
    ) where
        R: Receiver,
        M: Send + 'static,
        P: Fn(&M) -> bool + Send + Sync + 'static,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.insert(messenger.subscribe_filtered(subscriber, filter, callback));
    }

    fn insert(&self, connection: Connection) {
        let keys = connection.keys();
        // Dead subscribers never come back to prune themselves.
        self.prune();

        let replaced = self
            .connections
            .lock()
            .entry(keys.receiver)
            .or_default()
            .insert(keys.messenger, connection);

        tracing::debug!(
            subscriber = %keys.receiver,
            messenger = %keys.messenger,
            connection = %keys.connection,
            replaced = replaced.is_some(),
            "registered connection"
        );

        // The replaced connection no longer owns the messenger's slot, so
        // closing it leaves the new subscription in place.
        if let Some(replaced) = replaced {
            replaced.close();
        }
    }

    // --- Unsubscribing ---

    /// End the subscription of `subscriber` to `messenger`, if any.
    pub fn unsubscribe<R, M>(&self, subscriber: &R, messenger: &Messenger<M>)
    where
        R: Receiver + ?Sized,
        M: Send + 'static,
    {
        self.unsubscribe_keys(subscriber.receiver_key(), messenger.key());
    }

    /// End the subscription between the two keys, if any.
    pub fn unsubscribe_keys(&self, subscriber: IdentityKey, messenger: IdentityKey) {
        let removed = {
            let mut connections = self.connections.lock();
            let removed = connections
                .get_mut(&subscriber)
                .and_then(|by_messenger| by_messenger.remove(&messenger));
            if connections.get(&subscriber).is_some_and(HashMap::is_empty) {
                connections.remove(&subscriber);
            }
            removed
        };

        if let Some(connection) = removed {
            tracing::debug!(
                subscriber = %subscriber,
                messenger = %messenger,
                "unsubscribed through registry"
            );
            connection.close();
        }
    }

    /// End every subscription `subscriber` made through this registry.
    ///
    /// Messengers that no longer exist are skipped.
    pub fn unsubscribe_all<R: Receiver + ?Sized>(&self, subscriber: &R) {
        self.unsubscribe_all_key(subscriber.receiver_key());
    }

    /// End every subscription made under this subscriber key.
    pub fn unsubscribe_all_key(&self, subscriber: IdentityKey) {
        let removed = self.connections.lock().remove(&subscriber);
        let Some(removed) = removed else {
            return;
        };

        tracing::debug!(
            subscriber = %subscriber,
            connections = removed.len(),
            "unsubscribed from all messengers"
        );
        for connection in removed.into_values() {
            connection.close();
        }
    }

    /// Forget a connection that was closed from elsewhere.
    ///
    /// Only removes the entry if it is that exact connection, so a stale
    /// close never drops a newer subscription.
    pub(crate) fn forget(&self, keys: &ConnectionKeys) {
        let removed = {
            let mut connections = self.connections.lock();
            let Some(by_messenger) = connections.get_mut(&keys.receiver) else {
                return;
            };
            let matches = by_messenger
                .get(&keys.messenger)
                .is_some_and(|connection| connection.id() == keys.connection);
            let removed = if matches {
                by_messenger.remove(&keys.messenger)
            } else {
                None
            };
            if by_messenger.is_empty() {
                connections.remove(&keys.receiver);
            }
            removed
        };
        drop(removed);
    }

    // --- Maintenance ---

    /// Drop connections whose subscriber or messenger is gone, or whose slot
    /// was removed directly on the messenger. Returns how many were dropped.
    pub fn prune(&self) -> usize {
        let subscribers: Vec<IdentityKey> = self.connections.lock().keys().copied().collect();
        subscribers
            .into_iter()
            .map(|subscriber| self.prune_subscriber(subscriber))
            .sum()
    }

    fn prune_subscriber(&self, subscriber: IdentityKey) -> usize {
        // Liveness is checked without the registry lock: it may briefly own
        // the last handle to a messenger, whose teardown can close connections.
        let held: Vec<Connection> = self
            .connections
            .lock()
            .get(&subscriber)
            .map(|by_messenger| by_messenger.values().cloned().collect())
            .unwrap_or_default();
        let inactive: Vec<ConnectionKeys> = held
            .iter()
            .filter(|connection| !connection.is_active())
            .map(Connection::keys)
            .collect();
        drop(held);
        if inactive.is_empty() {
            return 0;
        }

        let dead: Vec<Connection> = {
            let mut connections = self.connections.lock();
            let Some(by_messenger) = connections.get_mut(&subscriber) else {
                return 0;
            };
            let mut dead = Vec::with_capacity(inactive.len());
            for keys in &inactive {
                let same = by_messenger
                    .get(&keys.messenger)
                    .is_some_and(|connection| connection.id() == keys.connection);
                if same {
                    dead.extend(by_messenger.remove(&keys.messenger));
                }
            }
            if by_messenger.is_empty() {
                connections.remove(&subscriber);
            }
            dead
        };

        tracing::debug!(
            subscriber = %subscriber,
            pruned = dead.len(),
            "pruned inactive connections"
        );
        let pruned = dead.len();
        for connection in dead {
            connection.close();
        }
        pruned
    }

    // --- Queries ---

    /// Whether `subscriber` has an active subscription to `messenger` here.
    pub fn is_subscribed<R, M>(&self, subscriber: &R, messenger: &Messenger<M>) -> bool
    where
        R: Receiver + ?Sized,
        M: Send + 'static,
    {
        let connection = self
            .connections
            .lock()
            .get(&subscriber.receiver_key())
            .and_then(|by_messenger| by_messenger.get(&messenger.key()))
            .cloned();
        connection.is_some_and(|connection| connection.is_active())
            && messenger.is_subscribed(subscriber)
    }

    /// Connections held for `subscriber`, inactive ones included until pruned.
    pub fn connection_count(&self, subscriber: IdentityKey) -> usize {
        self.connections
            .lock()
            .get(&subscriber)
            .map_or(0, HashMap::len)
    }

    /// Number of subscribers with at least one connection.
    pub fn subscriber_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
