//! Core value types shared by messengers, pools and connections.

#[cfg(feature = "serde")]
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter behind every [`IdentityKey`]. Starts at 1 so 0 never names a live entity.
static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Counter behind every [`ConnectionId`].
static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// Stable identity of one live entity (messenger or receiver).
///
/// Keys come from a monotonically increasing counter, never from an address,
/// so a key is never handed out twice during the life of the process.
/// [`issue`](Self::issue) is the only way to make one; keys serialize for
/// logs and diagnostics but cannot be read back.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct IdentityKey(u64);

impl IdentityKey {
    /// Issue a fresh key.
    pub fn issue() -> Self {
        IdentityKey(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self.0)
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The identity a message is attributed to.
///
/// Defaults to the sending messenger's own key.
pub type Author = IdentityKey;

/// Identifies one connection between a receiver and a messenger.
///
/// Resubscribing the same receiver creates a new id, which keeps a stale
/// connection from tearing down the slot that replaced it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn issue() -> Self {
        ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What `send` does with a callback that panicked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PanicPolicy {
    /// Log the panic and keep delivering.
    #[default]
    Isolate,
    /// Finish the drain, then resume the first panic on the draining caller.
    Propagate,
}

/// Messenger configuration.
#[derive(Clone, Debug, Default)]
pub struct MessengerConfig {
    /// Channel name used in log output.
    pub name: Option<String>,

    /// Handling of panicking callbacks during `send`.
    pub panic_policy: PanicPolicy,
}

impl MessengerConfig {
    /// Config for a named channel with default panic handling.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}
