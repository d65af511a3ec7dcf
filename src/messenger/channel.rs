//! The messenger: a channel for one message type.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::connection::{Connection, MessengerLink, Receiver};
use crate::error::{DeliveryError, Result};
use crate::pool::{Callback, DrainReport, Filter, ReceiverPool};
use crate::types::{Author, ConnectionId, IdentityKey, MessengerConfig, PanicPolicy};

/// Hook run for each message as its fan-out begins.
pub(crate) type Tap<M> = Box<dyn Fn(&M) + Send + Sync>;

pub(crate) struct MessengerCore<M> {
    key: IdentityKey,
    config: MessengerConfig,
    pool: ReceiverPool<M>,
    tap: Option<Tap<M>>,
}

impl<M> MessengerCore<M> {
    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or("-")
    }

    fn deliver(&self, message: M, author: Author) -> Option<DrainReport> {
        self.pool.deliver(message, author, |message| {
            if let Some(tap) = &self.tap {
                tap(message);
            }
        })
    }
}

impl<M: Send + 'static> MessengerLink for MessengerCore<M> {
    fn messenger_key(&self) -> IdentityKey {
        self.key
    }

    fn unregister(&self, receiver: IdentityKey, connection: ConnectionId) {
        if self.pool.remove_connection(receiver, connection) {
            tracing::debug!(
                messenger = %self.key,
                name = self.name(),
                receiver = %receiver,
                connection = %connection,
                "receiver unsubscribed by connection"
            );
        }
    }

    fn holds(&self, receiver: IdentityKey, connection: ConnectionId) -> bool {
        self.pool.holds(receiver, connection)
    }
}

impl<M> Drop for MessengerCore<M> {
    fn drop(&mut self) {
        tracing::debug!(
            messenger = %self.key,
            name = self.name(),
            receivers = self.pool.len(),
            "messenger dropped"
        );
    }
}

/// A channel that forwards every sent message to all live subscribers.
///
/// `Messenger` is a cheap handle; clones refer to the same channel, and the
/// channel is destroyed when the last handle is dropped. Subscribers and
/// connections only ever hold it weakly.
///
/// Delivery is synchronous: `send` returns once the message, and every
/// message sent from inside its callbacks, has been fanned out. Messages are
/// delivered in send order and, per message, in subscription order.
pub struct Messenger<M> {
    core: Arc<MessengerCore<M>>,
}

impl<M> Clone for Messenger<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<M: Send + 'static> Messenger<M> {
    /// Create an unnamed messenger.
    pub fn new() -> Self {
        Self::with_config(MessengerConfig::default())
    }

    /// Create a messenger with the given configuration.
    pub fn with_config(config: MessengerConfig) -> Self {
        Self::build(config, None)
    }

    pub(crate) fn build(config: MessengerConfig, tap: Option<Tap<M>>) -> Self {
        let key = IdentityKey::issue();
        Self {
            core: Arc::new(MessengerCore {
                key,
                config,
                pool: ReceiverPool::new(key),
                tap,
            }),
        }
    }

    /// Identity of this messenger, also the default author of its messages.
    pub fn key(&self) -> IdentityKey {
        self.core.key
    }

    pub fn name(&self) -> Option<&str> {
        self.core.config.name.as_deref()
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.core.config
    }

    // --- Subscribing ---

    /// Subscribe `receiver`, replacing any existing subscription it has here.
    pub fn subscribe<R, F>(&self, receiver: &Arc<R>, callback: F) -> Connection
    where
        R: Receiver,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.connect(receiver, None, Arc::new(move |message: &M, _: Author| callback(message)))
    }

    /// Subscribe with a callback that also receives the message author.
    pub fn subscribe_with_author<R, F>(&self, receiver: &Arc<R>, callback: F) -> Connection
    where
        R: Receiver,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.connect(receiver, None, Arc::new(callback))
    }

    /// Subscribe with a filter evaluated per message; messages it rejects
    /// skip the callback but keep the subscription.
    pub fn subscribe_filtered<R, P, F>(&self, receiver: &Arc<R>, filter: P, callback: F) -> Connection
    where
        R: Receiver,
        P: Fn(&M) -> bool + Send + Sync + 'static,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.connect(receiver, Some(Arc::new(filter)), Arc::new(callback))
    }

    pub(crate) fn connect<R: Receiver>(
        &self,
        receiver: &Arc<R>,
        filter: Option<Filter<M>>,
        callback: Callback<M>,
    ) -> Connection {
        let id = ConnectionId::issue();
        let receiver_key = receiver.receiver_key();
        let erased: Arc<dyn Receiver> = Arc::clone(receiver) as Arc<dyn Receiver>;
        let weak_receiver = Arc::downgrade(&erased);

        self.core
            .pool
            .add(receiver_key, weak_receiver.clone(), id, filter, callback);

        tracing::debug!(
            messenger = %self.core.key,
            name = self.core.name(),
            receiver = %receiver_key,
            connection = %id,
            "receiver subscribed"
        );

        let link: Arc<dyn MessengerLink> = Arc::clone(&self.core) as Arc<dyn MessengerLink>;
        Connection::new(
            id,
            receiver_key,
            weak_receiver,
            self.core.key,
            Arc::downgrade(&link),
        )
    }

    // --- Unsubscribing ---

    /// Remove the subscription of `receiver`. Unknown keys are ignored.
    pub fn unsubscribe(&self, receiver: IdentityKey) {
        if self.core.pool.remove(receiver) {
            tracing::debug!(
                messenger = %self.core.key,
                name = self.core.name(),
                receiver = %receiver,
                "receiver unsubscribed"
            );
        }
    }

    /// Remove every subscription. Returns how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let removed = self.core.pool.clear();
        tracing::debug!(
            messenger = %self.core.key,
            name = self.core.name(),
            removed,
            "all receivers unsubscribed"
        );
        removed
    }

    /// Remove subscriptions whose receiver is gone. Returns how many were removed.
    pub fn prune_dead(&self) -> usize {
        self.core.pool.prune_dead()
    }

    // --- Queries ---

    /// Whether `receiver` is alive and subscribed here.
    pub fn is_subscribed<R: Receiver + ?Sized>(&self, receiver: &R) -> bool {
        self.core
            .pool
            .contains_receiver(receiver.receiver_key(), receiver)
    }

    /// Whether the receiver with this key is alive and subscribed here.
    pub fn is_subscribed_key(&self, receiver: IdentityKey) -> bool {
        self.core.pool.contains(receiver)
    }

    /// Number of subscriptions, including dead ones not pruned yet.
    pub fn receiver_count(&self) -> usize {
        self.core.pool.len()
    }

    pub fn has_receivers(&self) -> bool {
        !self.core.pool.is_empty()
    }

    /// Subscribed receiver keys in subscription order.
    pub fn receiver_keys(&self) -> Vec<IdentityKey> {
        self.core.pool.keys()
    }

    // --- Sending ---

    /// Send a message authored by this messenger.
    pub fn send(&self, message: M) {
        self.send_from(message, self.core.key);
    }

    /// Send a message attributed to `author`.
    ///
    /// Panicking callbacks are handled according to the configured
    /// [`PanicPolicy`].
    pub fn send_from(&self, message: M, author: Author) {
        let Some(report) = self.core.deliver(message, author) else {
            return;
        };
        if report.failures.is_empty() {
            return;
        }

        for failure in &report.failures {
            tracing::error!(
                messenger = %self.core.key,
                name = self.core.name(),
                receiver = %failure.receiver,
                author = %failure.author,
                panic = %failure.panic,
                "callback panicked during delivery"
            );
        }

        if self.core.config.panic_policy == PanicPolicy::Propagate {
            if let Some(payload) = report.first_panic {
                std::panic::resume_unwind(payload);
            }
        }
    }

    /// Send a message authored by this messenger, reporting callback panics.
    pub fn try_send(&self, message: M) -> Result<()> {
        self.try_send_from(message, self.core.key)
    }

    /// Send a message attributed to `author`, reporting callback panics.
    ///
    /// Only the call that drains the queue reports. A call made from inside
    /// a callback queues its message and returns `Ok(())`; a call made while
    /// another thread is draining waits for its message to be delivered and
    /// returns `Ok(())`, leaving any failures to the draining call.
    pub fn try_send_from(&self, message: M, author: Author) -> Result<()> {
        match self.core.deliver(message, author) {
            Some(report) if !report.failures.is_empty() => Err(DeliveryError::CallbackPanicked {
                message_count: report.drained,
                failures: report.failures,
            }),
            _ => Ok(()),
        }
    }

    /// A non-owning handle to this messenger.
    pub fn downgrade(&self) -> WeakMessenger<M> {
        WeakMessenger {
            core: Arc::downgrade(&self.core),
        }
    }
}

impl<M: Send + 'static> Default for Messenger<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for Messenger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Messenger")
            .field("key", &self.core.key)
            .field("name", &self.core.config.name)
            .field("receivers", &self.core.pool.len())
            .finish()
    }
}

/// Non-owning handle to a [`Messenger`].
pub struct WeakMessenger<M> {
    core: Weak<MessengerCore<M>>,
}

impl<M> WeakMessenger<M> {
    /// The messenger, if it still exists.
    pub fn upgrade(&self) -> Option<Messenger<M>> {
        self.core.upgrade().map(|core| Messenger { core })
    }

    pub fn is_alive(&self) -> bool {
        self.core.strong_count() > 0
    }
}

impl<M> Clone for WeakMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            core: Weak::clone(&self.core),
        }
    }
}

impl<M> fmt::Debug for WeakMessenger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMessenger")
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Probe(IdentityKey);

    impl Probe {
        fn new() -> Arc<Self> {
            Arc::new(Probe(IdentityKey::issue()))
        }
    }

    impl Receiver for Probe {
        fn receiver_key(&self) -> IdentityKey {
            self.0
        }
    }

    #[test]
    fn test_send_without_receivers_is_noop() {
        let messenger = Messenger::<i32>::new();
        messenger.send(1);
        assert!(messenger.try_send(2).is_ok());
        assert!(!messenger.has_receivers());
    }

    #[test]
    fn test_subscribe_and_send() {
        let messenger = Messenger::<i32>::new();
        let probe = Probe::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _connection = messenger.subscribe(&probe, move |m| sink.lock().push(*m));
        assert!(messenger.is_subscribed(probe.as_ref()));

        messenger.send(42);
        assert_eq!(seen.lock().as_slice(), &[42]);
    }

    #[test]
    fn test_default_author_is_messenger() {
        let messenger = Messenger::<i32>::new();
        let probe = Probe::new();
        let authors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&authors);

        let _connection = messenger.subscribe_with_author(&probe, move |_, author| {
            sink.lock().push(author);
        });

        messenger.send(1);
        messenger.send_from(2, probe.0);

        assert_eq!(authors.lock().as_slice(), &[messenger.key(), probe.0]);
    }

    #[test]
    fn test_dropping_connection_unsubscribes() {
        let messenger = Messenger::<i32>::new();
        let probe = Probe::new();

        let connection = messenger.subscribe(&probe, |_| {});
        assert_eq!(messenger.receiver_count(), 1);

        drop(connection);
        assert_eq!(messenger.receiver_count(), 0);
        assert!(!messenger.is_subscribed(probe.as_ref()));
    }

    #[test]
    fn test_unsubscribe_by_key() {
        let messenger = Messenger::<i32>::new();
        let probe = Probe::new();
        let connection = messenger.subscribe(&probe, |_| {});

        messenger.unsubscribe(probe.0);
        messenger.unsubscribe(probe.0);

        assert!(!connection.is_active());
        connection.close();
        assert_eq!(messenger.receiver_count(), 0);
    }

    #[test]
    fn test_weak_messenger_upgrade() {
        let messenger = Messenger::<i32>::with_config(MessengerConfig::named("ticks"));
        let weak = messenger.downgrade();

        assert_eq!(weak.upgrade().unwrap().name(), Some("ticks"));
        drop(messenger);
        assert!(weak.upgrade().is_none());
        assert!(!weak.is_alive());
    }

    #[test]
    fn test_propagate_policy_resumes_panic_after_drain() {
        let messenger = Messenger::<i32>::with_config(MessengerConfig {
            name: None,
            panic_policy: PanicPolicy::Propagate,
        });
        let failing = Probe::new();
        let healthy = Probe::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let _a = messenger.subscribe(&failing, |_| panic!("boom"));
        let _b = messenger.subscribe(&healthy, move |m| sink.lock().push(*m));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| messenger.send(7)));
        assert!(result.is_err());
        assert_eq!(seen.lock().as_slice(), &[7]);
    }
}
