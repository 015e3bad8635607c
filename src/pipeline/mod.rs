//! Frame transport and request fulfillment

pub mod ringbuf;
mod worker;

pub use ringbuf::{FrameRing, RingStats};
pub use worker::FulfillmentWorker;
