//! Messengers: typed channels with ordered, reentrancy-safe delivery.

mod buffered;
mod channel;

pub use buffered::BufferedMessenger;
pub use channel::{Messenger, WeakMessenger};
