//! # Publish Module
//!
//! Downstream transports implementing `core::BroadcastSink`.
//!
//! ## Contained Modules:
//!
//! - **`zmq_pub`**: ZeroMQ PUB socket on a dedicated task, fed through a
//!   bounded drop-on-full queue.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// ZeroMQ PUB broadcast sink.
pub mod zmq_pub;

pub use zmq_pub::{tcp_endpoint, PublishError, ZmqPublisher, ZmqSink};
