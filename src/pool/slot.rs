//! One subscriber entry in a receiver pool.

use std::ptr;
use std::sync::{Arc, Weak};

use crate::connection::Receiver;
use crate::types::{Author, ConnectionId};

/// Callback invoked for each delivered message.
pub type Callback<M> = Arc<dyn Fn(&M, Author) + Send + Sync>;

/// Per-message predicate; `false` skips the callback for that message.
pub type Filter<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;

/// Weak receiver plus what to run for it.
pub(crate) struct ReceiverSlot<M> {
    receiver: Weak<dyn Receiver>,
    pub(crate) connection: ConnectionId,
    filter: Option<Filter<M>>,
    callback: Callback<M>,
}

impl<M> ReceiverSlot<M> {
    pub(crate) fn new(
        receiver: Weak<dyn Receiver>,
        connection: ConnectionId,
        filter: Option<Filter<M>>,
        callback: Callback<M>,
    ) -> Self {
        Self {
            receiver,
            connection,
            filter,
            callback,
        }
    }

    /// Whether the receiver is still alive.
    pub(crate) fn is_live(&self) -> bool {
        self.receiver.strong_count() > 0
    }

    /// Whether the slot was made for the receiver at `receiver`.
    pub(crate) fn points_to<R: ?Sized>(&self, receiver: *const R) -> bool {
        ptr::addr_eq(self.receiver.as_ptr(), receiver)
    }

    /// Detach the invocation from the slot so it can run without the pool lock.
    pub(crate) fn invocation(&self) -> Invocation<M> {
        Invocation {
            filter: self.filter.clone(),
            callback: Arc::clone(&self.callback),
        }
    }
}

/// A slot's filter and callback, cloned out of the pool.
pub(crate) struct Invocation<M> {
    filter: Option<Filter<M>>,
    callback: Callback<M>,
}

impl<M> Invocation<M> {
    /// Run the filter, then the callback if it passed.
    pub(crate) fn run(&self, message: &M, author: Author) {
        if let Some(filter) = &self.filter {
            if !filter(message) {
                return;
            }
        }
        (self.callback)(message, author);
    }
}
