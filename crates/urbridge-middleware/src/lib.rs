//! `urbridge-middleware` – fan-out of state updates to push subscribers.
//!
//! - [`registry`] – [`SubscriberRegistry`]: one bounded FIFO queue per live
//!   WebSocket connection, with failed or stalled subscribers evicted during
//!   broadcast.

pub mod registry;

pub use registry::{BroadcastReport, DEFAULT_QUEUE_CAPACITY, SubscriberRegistry, Subscription};
