//! Observation service: subscriptions grouped by subscriber.
//!
//! A [`Registry`] stores the connections a subscriber made, across any number
//! of messengers with different message types, so that they can be ended
//! individually or all at once. [`Subscriber`] is a receiver built on it.

mod service;
mod subscriber;

pub use service::Registry;
pub use subscriber::Subscriber;
