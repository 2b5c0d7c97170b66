//! Error types

use crate::fanout::FanoutError;
use crate::segmenter::SequencingError;
use crate::sink::MetadataError;

/// Crate-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket or listener failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Boundary ordering violation
    #[error("Sequencing error: {0}")]
    Sequencing(#[from] SequencingError),

    /// Malformed or out-of-order metadata
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Consumer attach failure
    #[error("Fan-out error: {0}")]
    Fanout(#[from] FanoutError),

    /// The stream session hit a fatal error earlier
    #[error("Stream session failed, no further input accepted")]
    SessionFailed,

    /// The server has been closed
    #[error("Server closed")]
    ServerClosed,
}

impl Error {
    /// Whether the error ends the current stream session
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Error::Sequencing(_) | Error::Metadata(_) | Error::SessionFailed
        )
    }
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
