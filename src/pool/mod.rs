//! Per-messenger subscriber table and delivery queue.
//!
//! A pool holds one slot per receiver key, iterated in subscription order.
//! Delivery is a queue drained by the outermost `deliver` call: a message sent
//! from inside a callback is queued and fanned out only after the current
//! message has reached every subscriber.

mod receiver_pool;
mod slot;

pub(crate) use receiver_pool::{DrainReport, ReceiverPool};
pub use slot::{Callback, Filter};
