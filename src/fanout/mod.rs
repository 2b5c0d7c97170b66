//! Consumer fan-out
//!
//! Delivers one segmented stream to many independently attaching and
//! detaching consumers.
//!
//! # Zero-Copy Design
//!
//! Consumers receive `bytes::Bytes` views of the chunks read from the
//! producer. Every consumer shares the same allocations; only the init
//! segment is materialized once, and that buffer is shared too.

pub mod consumer;
pub mod error;
pub mod multiplexer;

pub use consumer::{ChannelReceiver, ChannelSink, ConsumerId, ConsumerSink, SinkError};
pub use error::FanoutError;
pub use multiplexer::{ConsumerPhase, Multiplexer};
