//! Session and server statistics

pub mod metrics;

pub use metrics::{ServerStats, SessionStats};
