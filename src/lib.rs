//! # Herald
//!
//! A process-local publish/subscribe core: receivers subscribe to typed
//! messengers, and each sent message reaches every live subscriber exactly
//! once, in a deterministic order.
//!
//! ## Core Concepts
//!
//! - **Messengers**: Typed channels; `send` fans a message out synchronously
//! - **Receivers**: Anything with an [`IdentityKey`]; held weakly by messengers
//! - **Connections**: Weak two-way links that end a subscription when closed or dropped
//! - **Registry**: Groups a subscriber's connections across messengers
//!
//! ## Delivery Order
//!
//! Messages are delivered in send order, and each message reaches subscribers
//! in subscription order. A message sent from inside a callback is queued and
//! delivered only after the current message has reached every subscriber, so
//! reentrant sends never reorder or nest delivery.
//!
//! ## Example
//!
//! ```ignore
//! use herald::{Messenger, Subscriber};
//! use std::sync::Arc;
//!
//! let temperature = Messenger::<f64>::new();
//! let display = Arc::new(Subscriber::new());
//!
//! display.observe(&temperature, |celsius| println!("{celsius:.1} C"));
//! temperature.send(21.5);
//!
//! // Dropping the subscriber ends all of its subscriptions.
//! drop(display);
//! ```

pub mod connection;
pub mod error;
pub mod messenger;
mod pool;
pub mod registry;
pub mod stream;
pub mod types;

// Re-exports
pub use connection::{Connection, ConnectionKeys, Receiver};
pub use error::{CallbackFailure, DeliveryError, Result};
pub use messenger::{BufferedMessenger, Messenger, WeakMessenger};
pub use pool::{Callback, Filter};
pub use registry::{Registry, Subscriber};
pub use stream::{DropReason, MessageStream, StreamConfig, StreamEvent};
pub use types::*;
