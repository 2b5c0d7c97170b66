//! Segmenter error types

use crate::media::Offset;

/// Violation of the boundary ordering rules on the metadata feed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequencingError {
    /// Event name is neither init nor media segment start
    #[error("Invalid event {0}")]
    UnknownEvent(String),

    /// Init boundary after the stream already had one
    #[error("Expected media segment start, got init at offset {offset}")]
    UnexpectedInit { offset: Offset },

    /// Media boundary before any init boundary
    #[error("Expected init segment start, got media at offset {offset}")]
    UnexpectedMedia { offset: Offset },

    /// Boundary offset not strictly after the previous boundary
    #[error("Expected info offset > {previous}, got {offset}")]
    NonIncreasingOffset { previous: Offset, offset: Offset },
}

/// Error constructing an init segment capture
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The correlator already processed input, so the init segment may be gone
    #[error("Correlator already started, init segment capture must attach first")]
    AlreadyStarted,
}
