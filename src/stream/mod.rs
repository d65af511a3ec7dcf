//! Channel-backed message streams.
//!
//! A stream subscribes to one messenger and buffers every delivered message
//! into a bounded channel, so a consumer on another thread can read them:
//! - Optional per-message filter
//! - Bounded buffer with slow-consumer dropping
//! - A final `Dropped` event when the stream detaches
//!
//! # Example
//!
//! ```ignore
//! let messenger = Messenger::<String>::new();
//! let stream = messenger.stream(StreamConfig::bounded(16));
//!
//! messenger.send("hello".to_string());
//!
//! match stream.recv() {
//!     Ok(StreamEvent::Message { message, author }) => println!("{author}: {message}"),
//!     Ok(StreamEvent::Dropped { reason }) => println!("dropped: {reason}"),
//!     Err(_) => {}
//! }
//! ```

mod handle;
mod types;

pub use handle::MessageStream;
pub use types::{DropReason, StreamConfig, StreamEvent};
