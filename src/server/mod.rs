//! Connection server
//!
//! Three TCP listeners feed one dispatcher task:
//! - media producer: raw media bytes
//! - metadata producer: newline-delimited JSON boundary records
//! - consumers: receive the forwarded, boundary-aligned stream
//!
//! Only one producer per channel is active at a time. Either producer
//! disconnecting ends the session and closes every consumer.

pub mod config;
mod connection;
mod dispatcher;
pub mod listener;

pub use config::ServerConfig;
pub use dispatcher::ProducerChannel;
pub use listener::{ServerHandle, StreamingServer};
