//! Channel-backed subscription handle.

use crossbeam_channel::{bounded, Receiver as EventReceiver, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::types::{DropReason, StreamConfig, StreamEvent};
use crate::connection::{Connection, Receiver};
use crate::messenger::Messenger;
use crate::pool::Callback;
use crate::types::{Author, IdentityKey};

/// Internal stream state. Its lifetime is the stream's subscription lifetime.
struct StreamState<M> {
    key: IdentityKey,
    /// Max buffered messages. The channel has one extra slot for the drop notice.
    buffer_size: usize,
    /// Taken when the stream is detached, which disconnects the channel
    /// once the buffered events are read.
    sender: Mutex<Option<Sender<StreamEvent<M>>>>,
    reason: Mutex<Option<DropReason>>,
}

impl<M: Send + 'static> Receiver for StreamState<M> {
    fn receiver_key(&self) -> IdentityKey {
        self.key
    }
}

impl<M> StreamState<M> {
    /// Buffer a message. Returns false if the buffer is full and the stream
    /// was detached because of it.
    fn push(&self, message: M, author: Author) -> bool {
        let mut sender = self.sender.lock();
        let Some(tx) = sender.as_ref() else {
            return true;
        };
        if tx.len() < self.buffer_size {
            let _ = tx.try_send(StreamEvent::Message { message, author });
            return true;
        }
        let _ = tx.try_send(StreamEvent::Dropped {
            reason: DropReason::BufferOverflow,
        });
        *sender = None;
        *self.reason.lock() = Some(DropReason::BufferOverflow);
        false
    }

    /// Detach with `reason` unless already detached.
    fn detach(&self, reason: DropReason) {
        let Some(tx) = self.sender.lock().take() else {
            return;
        };
        let _ = tx.try_send(StreamEvent::Dropped { reason });
        *self.reason.lock() = Some(reason);
    }
}

/// Messages of one messenger, buffered into a bounded channel.
///
/// Lets another thread consume messages at its own pace. A consumer that
/// falls `buffer_size` messages behind is dropped: it receives a final
/// [`StreamEvent::Dropped`] and then the channel disconnects.
///
/// ```ignore
/// let stream = messenger.stream(StreamConfig::bounded(64));
/// loop {
///     match stream.recv() {
///         Ok(StreamEvent::Message { message, .. }) => handle(message),
///         Ok(StreamEvent::Dropped { .. }) | Err(_) => break,
///     }
/// }
/// ```
pub struct MessageStream<M> {
    state: Arc<StreamState<M>>,
    connection: Connection,
    events: EventReceiver<StreamEvent<M>>,
}

impl<M: Clone + Send + 'static> MessageStream<M> {
    pub(crate) fn attach(messenger: &Messenger<M>, config: StreamConfig<M>) -> Self {
        let buffer_size = config.buffer_size.max(1);
        let (sender, events) = bounded(buffer_size + 1);
        let state = Arc::new(StreamState {
            key: IdentityKey::issue(),
            buffer_size,
            sender: Mutex::new(Some(sender)),
            reason: Mutex::new(None),
        });

        let weak_state = Arc::downgrade(&state);
        let weak_messenger = messenger.downgrade();
        let callback: Callback<M> = Arc::new(move |message: &M, author: Author| {
            let Some(state) = weak_state.upgrade() else {
                return;
            };
            if state.push(message.clone(), author) {
                return;
            }
            tracing::warn!(
                receiver = %state.key,
                buffer_size = state.buffer_size,
                "stream buffer overflowed, dropping stream"
            );
            if let Some(messenger) = weak_messenger.upgrade() {
                messenger.unsubscribe(state.key);
            }
        });

        let connection = messenger.connect(&state, config.filter, callback);

        Self {
            state,
            connection,
            events,
        }
    }
}

impl<M> MessageStream<M> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StreamEvent<M>, crossbeam_channel::RecvError> {
        self.events.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StreamEvent<M>, crossbeam_channel::TryRecvError> {
        self.events.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<StreamEvent<M>, crossbeam_channel::RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Events waiting to be read.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Stop receiving. Buffered events stay readable, followed by
    /// `Dropped { reason: Unsubscribed }`.
    pub fn close(&self) {
        self.state.detach(DropReason::Unsubscribed);
        self.connection.close();
    }

    /// Why the stream stopped, if it did.
    pub fn drop_reason(&self) -> Option<DropReason> {
        *self.state.reason.lock()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

impl<M: Clone + Send + 'static> Messenger<M> {
    /// Buffer this messenger's messages into a bounded channel.
    pub fn stream(&self, config: StreamConfig<M>) -> MessageStream<M> {
        MessageStream::attach(self, config)
    }
}

impl<M> fmt::Debug for MessageStream<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("connection", &self.connection)
            .field("pending", &self.events.len())
            .field("drop_reason", &*self.state.reason.lock())
            .finish()
    }
}
