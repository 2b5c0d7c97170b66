//! Fan-out error types

use super::consumer::ConsumerId;

/// Error type for multiplexer operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FanoutError {
    /// The consumer is already attached
    #[error("Consumer already added: {0}")]
    AlreadyAttached(ConsumerId),
}
