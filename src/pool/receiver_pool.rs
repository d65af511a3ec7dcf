//! Subscriber registry and reentrancy-safe delivery queue for one messenger.

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::thread::{self, ThreadId};

use super::slot::{Callback, Filter, Invocation, ReceiverSlot};
use crate::connection::Receiver;
use crate::error::CallbackFailure;
use crate::types::{Author, ConnectionId, IdentityKey};

/// Outcome of one drain performed by the outermost `deliver` call.
#[derive(Default)]
pub(crate) struct DrainReport {
    /// Messages fanned out by this drain.
    pub(crate) drained: usize,
    /// Caught callback panics, in delivery order.
    pub(crate) failures: Vec<CallbackFailure>,
    /// Payload of the first caught panic, kept for resuming it.
    pub(crate) first_panic: Option<Box<dyn Any + Send>>,
}

impl DrainReport {
    fn record(&mut self, receiver: IdentityKey, author: Author, payload: Box<dyn Any + Send>) {
        self.failures
            .push(CallbackFailure::new(receiver, author, payload.as_ref()));
        if self.first_panic.is_none() {
            self.first_panic = Some(payload);
        }
    }
}

struct PoolState<M> {
    /// Slots in subscription order.
    slots: IndexMap<IdentityKey, ReceiverSlot<M>>,
    /// Messages waiting for fan-out. The front one is popped when its fan-out starts.
    pending: VecDeque<(M, Author)>,
    /// Thread whose outermost `deliver` call is draining `pending`.
    drainer: Option<ThreadId>,
    /// Messages queued so far; a message's ticket is the value after its push.
    queued: u64,
    /// Messages whose fan-out has finished.
    finished: u64,
}

/// Subscribers of one messenger plus its pending-message queue.
///
/// The lock is never held while user callbacks run, so callbacks may send,
/// subscribe and unsubscribe on the same pool. Anything removed from the
/// table is dropped after the lock is released, since dropping a callback
/// may close connections that call back into the pool.
pub(crate) struct ReceiverPool<M> {
    owner: IdentityKey,
    state: Mutex<PoolState<M>>,
    /// Signalled each time a message's fan-out finishes.
    progress: Condvar,
}

impl<M> ReceiverPool<M> {
    pub(crate) fn new(owner: IdentityKey) -> Self {
        Self {
            owner,
            state: Mutex::new(PoolState {
                slots: IndexMap::new(),
                pending: VecDeque::new(),
                drainer: None,
                queued: 0,
                finished: 0,
            }),
            progress: Condvar::new(),
        }
    }

    // --- Receivers ---

    /// Register or replace the slot for `key`. A replaced slot keeps its position.
    pub(crate) fn add(
        &self,
        key: IdentityKey,
        receiver: Weak<dyn Receiver>,
        connection: ConnectionId,
        filter: Option<Filter<M>>,
        callback: Callback<M>,
    ) {
        let incoming = receiver.as_ptr();
        let slot = ReceiverSlot::new(receiver, connection, filter, callback);
        let replaced = self.state.lock().slots.insert(key, slot);
        if replaced
            .as_ref()
            .is_some_and(|old| old.is_live() && !old.points_to(incoming))
        {
            tracing::warn!(
                messenger = %self.owner,
                receiver = %key,
                "receiver key is shared by another live receiver, replacing its subscription"
            );
        }
        drop(replaced);
    }

    /// Remove the slot for `key`. Absent keys are ignored.
    pub(crate) fn remove(&self, key: IdentityKey) -> bool {
        let removed = self.state.lock().slots.shift_remove(&key);
        removed.is_some()
    }

    /// Remove the slot for `key` only if `connection` created it.
    pub(crate) fn remove_connection(&self, key: IdentityKey, connection: ConnectionId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let owned = state
                .slots
                .get(&key)
                .is_some_and(|slot| slot.connection == connection);
            if owned {
                state.slots.shift_remove(&key)
            } else {
                None
            }
        };
        removed.is_some()
    }

    /// Whether `key` has a slot created by `connection` whose receiver is alive.
    pub(crate) fn holds(&self, key: IdentityKey, connection: ConnectionId) -> bool {
        self.state
            .lock()
            .slots
            .get(&key)
            .is_some_and(|slot| slot.connection == connection && slot.is_live())
    }

    /// Whether `key` has a slot whose receiver is still alive.
    pub(crate) fn contains(&self, key: IdentityKey) -> bool {
        self.state
            .lock()
            .slots
            .get(&key)
            .is_some_and(ReceiverSlot::is_live)
    }

    /// Whether the live slot for `key` was made for this exact receiver.
    ///
    /// Receivers choose their own keys, so a key alone may name a different
    /// receiver that took over the slot.
    pub(crate) fn contains_receiver<R: ?Sized>(&self, key: IdentityKey, receiver: &R) -> bool {
        self.state
            .lock()
            .slots
            .get(&key)
            .is_some_and(|slot| slot.is_live() && slot.points_to(receiver as *const R))
    }

    /// Remove every slot.
    pub(crate) fn clear(&self) -> usize {
        let removed = std::mem::take(&mut self.state.lock().slots);
        removed.len()
    }

    /// Remove slots whose receiver is gone. Returns how many were removed.
    pub(crate) fn prune_dead(&self) -> usize {
        let dead: Vec<ReceiverSlot<M>> = {
            let mut state = self.state.lock();
            let keys: Vec<IdentityKey> = state
                .slots
                .iter()
                .filter(|(_, slot)| !slot.is_live())
                .map(|(key, _)| *key)
                .collect();
            keys.into_iter()
                .filter_map(|key| state.slots.shift_remove(&key))
                .collect()
        };
        dead.len()
    }

    /// Number of slots, dead ones included until they are pruned.
    pub(crate) fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Slot keys in subscription order.
    pub(crate) fn keys(&self) -> Vec<IdentityKey> {
        self.state.lock().slots.keys().copied().collect()
    }

    // --- Delivery ---

    /// Queue a message and, if no drain is running, drain the queue.
    ///
    /// Returns `None` when the message was queued behind a drain already in
    /// progress; that drain delivers it and keeps the report. A nested send
    /// from a callback on the draining thread returns at once. A send from
    /// any other thread blocks until its message's fan-out has finished.
    /// `on_fanout` runs for each message right before its fan-out starts.
    pub(crate) fn deliver<F>(&self, message: M, author: Author, on_fanout: F) -> Option<DrainReport>
    where
        F: Fn(&M),
    {
        let current = thread::current().id();
        {
            let mut state = self.state.lock();
            state.pending.push_back((message, author));
            state.queued += 1;
            let ticket = state.queued;
            let drainer = state.drainer;
            match drainer {
                Some(drainer) if drainer == current => return None,
                Some(_) => {
                    while state.finished < ticket {
                        self.progress.wait(&mut state);
                    }
                    return None;
                }
                None => state.drainer = Some(current),
            }
        }

        let mut report = DrainReport::default();

        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(item) => {
                        let keys: Vec<IdentityKey> = state.slots.keys().copied().collect();
                        Some((item, keys))
                    }
                    None => {
                        state.drainer = None;
                        None
                    }
                }
            };
            let Some(((message, author), keys)) = next else {
                break;
            };

            report.drained += 1;
            tracing::trace!(
                messenger = %self.owner,
                author = %author,
                receivers = keys.len(),
                "delivering message"
            );

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| on_fanout(&message))) {
                report.record(self.owner, author, payload);
            }

            // Slots that joined after this snapshot start with the next message.
            for key in keys {
                let Some(invocation) = self.invocation_for(key) else {
                    continue;
                };
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| invocation.run(&message, author)));
                if let Err(payload) = outcome {
                    report.record(key, author, payload);
                }
            }

            self.state.lock().finished += 1;
            self.progress.notify_all();
        }

        Some(report)
    }

    /// Re-check the slot for `key` right before invoking it.
    ///
    /// Returns `None` if the slot was removed meanwhile or its receiver died;
    /// dead slots are pruned here.
    fn invocation_for(&self, key: IdentityKey) -> Option<Invocation<M>> {
        let pruned = {
            let mut state = self.state.lock();
            let live = state.slots.get(&key)?.is_live();
            if live {
                return state.slots.get(&key).map(ReceiverSlot::invocation);
            }
            state.slots.shift_remove(&key)
        };
        if pruned.is_some() {
            tracing::warn!(
                messenger = %self.owner,
                receiver = %key,
                "tried to send message to dead receiver, removing it"
            );
        }
        None
    }
}
