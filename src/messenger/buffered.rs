//! Messenger variant that remembers its latest message.

use parking_lot::RwLock;
use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use super::channel::{Messenger, Tap};
use crate::types::MessengerConfig;

/// A [`Messenger`] that also records the most recently delivered message.
///
/// The record is updated as each message's fan-out begins, so a callback
/// reading [`latest`](Self::latest) sees the message it is handling.
/// Before the first message, `latest` returns `M::default()`.
pub struct BufferedMessenger<M> {
    messenger: Messenger<M>,
    latest: Arc<RwLock<M>>,
}

impl<M> BufferedMessenger<M>
where
    M: Clone + Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::with_config(MessengerConfig::default())
    }

    pub fn with_config(config: MessengerConfig) -> Self {
        let latest = Arc::new(RwLock::new(M::default()));
        let record = Arc::clone(&latest);
        let tap: Tap<M> = Box::new(move |message: &M| {
            *record.write() = message.clone();
        });

        Self {
            messenger: Messenger::build(config, Some(tap)),
            latest,
        }
    }

    /// The last delivered message, or the default value if none yet.
    pub fn latest(&self) -> M {
        self.latest.read().clone()
    }

    /// Send the latest message again.
    pub fn resend(&self) {
        self.messenger.send(self.latest());
    }

    /// The underlying messenger handle.
    pub fn messenger(&self) -> &Messenger<M> {
        &self.messenger
    }

    pub(crate) fn latest_weak(&self) -> Weak<RwLock<M>> {
        Arc::downgrade(&self.latest)
    }
}

impl<M> Default for BufferedMessenger<M>
where
    M: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Clone for BufferedMessenger<M> {
    fn clone(&self) -> Self {
        Self {
            messenger: self.messenger.clone(),
            latest: Arc::clone(&self.latest),
        }
    }
}

impl<M> Deref for BufferedMessenger<M> {
    type Target = Messenger<M>;

    fn deref(&self) -> &Messenger<M> {
        &self.messenger
    }
}

impl<M: fmt::Debug> fmt::Debug for BufferedMessenger<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedMessenger")
            .field("messenger", &self.messenger)
            .field("latest", &*self.latest.read())
            .finish()
    }
}
