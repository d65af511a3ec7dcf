//! Error types for message delivery.
//!
//! Subscribing, sending and unsubscribing are total: none of them fail under
//! normal use. The only failure a caller can observe is a callback that
//! panicked while a message was being fanned out, reported by `try_send`.

use crate::types::{Author, IdentityKey};
use std::any::Any;
use std::fmt;
use thiserror::Error;

/// A callback that panicked during delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallbackFailure {
    /// Receiver whose callback panicked.
    pub receiver: IdentityKey,
    /// Author of the message being delivered.
    pub author: Author,
    /// Panic message, if it was a string.
    pub panic: String,
}

impl CallbackFailure {
    pub(crate) fn new(receiver: IdentityKey, author: Author, payload: &(dyn Any + Send)) -> Self {
        Self {
            receiver,
            author,
            panic: panic_message(payload),
        }
    }
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receiver {} panicked: {}", self.receiver, self.panic)
    }
}

/// Main error type for delivery.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("{} callback(s) panicked while delivering {message_count} message(s)", failures.len())]
    CallbackPanicked {
        /// Messages drained by the reporting call.
        message_count: usize,
        /// Every caught panic, in delivery order.
        failures: Vec<CallbackFailure>,
    },
}

impl DeliveryError {
    /// The failures carried by this error.
    pub fn failures(&self) -> &[CallbackFailure] {
        match self {
            DeliveryError::CallbackPanicked { failures, .. } => failures,
        }
    }
}

/// Result type for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
