//! A ready-made receiver that keeps its subscriptions in a registry.

use std::fmt;
use std::sync::Arc;

use super::service::Registry;
use crate::connection::{ConnectionKeys, Receiver};
use crate::messenger::{BufferedMessenger, Messenger};
use crate::types::{Author, IdentityKey};

/// Receiver whose subscriptions live in a [`Registry`].
///
/// Subscriptions stay active until stopped or until the subscriber is
/// dropped, which ends all of them. Observing methods take `self: &Arc<Self>`
/// because messengers hold receivers weakly.
///
/// ```ignore
/// let clicks = Messenger::<u32>::new();
/// let logger = Arc::new(Subscriber::new());
///
/// logger.observe(&clicks, |count| println!("clicked {count} times"));
/// clicks.send(1);
///
/// logger.stop_all_observing();
/// ```
pub struct Subscriber {
    key: IdentityKey,
    registry: Arc<Registry>,
}

impl Subscriber {
    /// Create a subscriber backed by the shared registry.
    pub fn new() -> Self {
        Self::with_registry(Registry::shared())
    }

    /// Create a subscriber backed by `registry`.
    pub fn with_registry(registry: Arc<Registry>) -> Self {
        Self {
            key: IdentityKey::issue(),
            registry,
        }
    }

    pub fn key(&self) -> IdentityKey {
        self.key
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn observe<M, F>(self: &Arc<Self>, messenger: &Messenger<M>, callback: F)
    where
        M: Send + 'static,
        F: Fn(&M) + Send + Sync + 'static,
    {
        self.registry.subscribe(self, messenger, callback);
    }

    pub fn observe_with_author<M, F>(self: &Arc<Self>, messenger: &Messenger<M>, callback: F)
    where
        M: Send + 'static,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.registry.subscribe_with_author(self, messenger, callback);
    }

    pub fn observe_filtered<M, P, F>(self: &Arc<Self>, messenger: &Messenger<M>, filter: P, callback: F)
    where
        M: Send + 'static,
        P: Fn(&M) -> bool + Send + Sync + 'static,
        F: Fn(&M, Author) + Send + Sync + 'static,
    {
        self.registry
            .subscribe_filtered(self, messenger, filter, callback);
    }

    /// Observe two buffered messengers at once.
    ///
    /// Whenever either one delivers, `handler` gets that message together
    /// with the other messenger's latest message. Once either messenger is
    /// gone, the handler is no longer called.
    pub fn observe_pair<A, B, F>(
        self: &Arc<Self>,
        first: &BufferedMessenger<A>,
        second: &BufferedMessenger<B>,
        handler: F,
    ) where
        A: Clone + Default + Send + Sync + 'static,
        B: Clone + Default + Send + Sync + 'static,
        F: Fn(&A, &B) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);

        let on_first = Arc::clone(&handler);
        let second_latest = second.latest_weak();
        self.observe(first.messenger(), move |a: &A| {
            let Some(cell) = second_latest.upgrade() else {
                return;
            };
            let b = cell.read().clone();
            on_first(a, &b);
        });

        let on_second = handler;
        let first_latest = first.latest_weak();
        self.observe(second.messenger(), move |b: &B| {
            let Some(cell) = first_latest.upgrade() else {
                return;
            };
            let a = cell.read().clone();
            on_second(&a, b);
        });
    }

    pub fn stop_observing<M: Send + 'static>(&self, messenger: &Messenger<M>) {
        self.registry.unsubscribe(self, messenger);
    }

    pub fn stop_all_observing(&self) {
        self.registry.unsubscribe_all_key(self.key);
    }

    pub fn is_observing<M: Send + 'static>(&self, messenger: &Messenger<M>) -> bool {
        self.registry.is_subscribed(self, messenger)
    }

    /// Connections held in the registry for this subscriber.
    pub fn observed_count(&self) -> usize {
        self.registry.connection_count(self.key)
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Receiver for Subscriber {
    fn receiver_key(&self) -> IdentityKey {
        self.key
    }

    fn connection_closed(&self, keys: &ConnectionKeys) {
        self.registry.forget(keys);
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.registry.unsubscribe_all_key(self.key);
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber").field("key", &self.key).finish()
    }
}
