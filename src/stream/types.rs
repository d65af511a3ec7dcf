//! Types for channel-backed message streams.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::pool::Filter;
use crate::types::Author;

/// Configuration for a message stream.
pub struct StreamConfig<M> {
    /// Max buffered events before the stream is dropped.
    /// Default: 1000
    pub buffer_size: usize,

    /// Only messages passing this predicate are buffered (None = all).
    pub filter: Option<Filter<M>>,
}

impl<M> StreamConfig<M> {
    /// Stream every message with the given buffer size.
    pub fn bounded(buffer_size: usize) -> Self {
        Self {
            buffer_size,
            filter: None,
        }
    }

    /// Add a filter.
    pub fn with_filter<P>(mut self, filter: P) -> Self
    where
        P: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl<M> Default for StreamConfig<M> {
    fn default() -> Self {
        Self::bounded(1000)
    }
}

impl<M> Clone for StreamConfig<M> {
    fn clone(&self) -> Self {
        Self {
            buffer_size: self.buffer_size,
            filter: self.filter.clone(),
        }
    }
}

impl<M> fmt::Debug for StreamConfig<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConfig")
            .field("buffer_size", &self.buffer_size)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Events read from a stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent<M> {
    /// A delivered message.
    Message { message: M, author: Author },

    /// The stream was detached from its messenger.
    Dropped { reason: DropReason },
}

/// Why a stream stopped receiving.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DropReason {
    /// Buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly closed.
    Unsubscribed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::BufferOverflow => write!(f, "buffer overflow"),
            DropReason::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}
