//! Metadata feed framing
//!
//! The boundary feed is newline-delimited JSON:
//!
//! ```text
//! {"event":"INIT_SEGMENT_START","offset":0}
//! {"event":"MEDIA_SEGMENT_START","offset":4811}
//! ```
//!
//! Reads are not aligned with records, so a trailing fragment that does not
//! parse yet is carried over and prefixed onto the next read.

use serde::Deserialize;

use crate::media::{BoundaryEvent, Offset, SegmentKind};
use crate::segmenter::SequencingError;

/// Longest unterminated record carried over between reads
pub const MAX_PENDING_LEN: usize = 64 * 1024;

/// One record of the metadata feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataRecord {
    pub event: String,
    pub offset: Offset,
}

impl MetadataRecord {
    pub fn new(kind: SegmentKind, offset: Offset) -> Self {
        Self {
            event: kind.event_name().to_owned(),
            offset,
        }
    }

    /// Interpret the record as a segment boundary
    pub fn to_boundary(&self) -> Result<BoundaryEvent, SequencingError> {
        SegmentKind::from_event_name(&self.event)
            .map(|kind| BoundaryEvent::new(kind, self.offset))
            .ok_or_else(|| SequencingError::UnknownEvent(self.event.clone()))
    }
}

/// Error from the metadata feed
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// A complete record is not valid JSON of the expected shape
    #[error("Malformed metadata record {line:?}: {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// An unterminated record outgrew the carry-over buffer
    #[error("Unterminated metadata record exceeds {limit} bytes")]
    FragmentTooLong { limit: usize },

    /// Metadata bytes are not UTF-8
    #[error("Metadata is not valid UTF-8")]
    InvalidUtf8,

    /// A record violates boundary ordering
    #[error(transparent)]
    Sequencing(#[from] SequencingError),
}

/// Reassembles metadata records across arbitrary read boundaries
#[derive(Debug, Default)]
pub struct MetadataFramer {
    partial: String,
}

impl MetadataFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a piece of metadata text
    ///
    /// `on_record` is called for each complete record, in order. Stops at
    /// the first error from parsing or from `on_record`. An unterminated
    /// fragment longer than [`MAX_PENDING_LEN`] is an error.
    pub fn push<F>(&mut self, text: &str, mut on_record: F) -> Result<(), MetadataError>
    where
        F: FnMut(MetadataRecord) -> Result<(), MetadataError>,
    {
        let mut buffer = std::mem::take(&mut self.partial);
        buffer.push_str(text);

        let (complete, fragment) = match buffer.rfind('\n') {
            Some(end) => (&buffer[..end], &buffer[end + 1..]),
            None => ("", buffer.as_str()),
        };

        for line in complete.split('\n') {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|source| MetadataError::Parse {
                line: line.to_owned(),
                source,
            })?;
            on_record(record)?;
        }

        // A JSON object is self-delimiting, so an unterminated fragment that
        // parses is complete
        if !fragment.trim().is_empty() {
            match serde_json::from_str(fragment.trim()) {
                Ok(record) => on_record(record)?,
                Err(_) if fragment.len() > MAX_PENDING_LEN => {
                    return Err(MetadataError::FragmentTooLong {
                        limit: MAX_PENDING_LEN,
                    });
                }
                Err(_) => self.partial = fragment.to_owned(),
            }
        }

        Ok(())
    }

    /// Text carried over to the next call
    pub fn pending(&self) -> &str {
        &self.partial
    }
}

/// Incremental UTF-8 decoder for metadata socket reads
///
/// Holds back a code point split across reads.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the next read, returning the text that is complete so far
    pub fn decode(&mut self, bytes: &[u8]) -> Result<String, MetadataError> {
        self.carry.extend_from_slice(bytes);

        let valid = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // Truncated sequence at the end, wait for the rest
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => return Err(MetadataError::InvalidUtf8),
        };

        let rest = self.carry.split_off(valid);
        let text = String::from_utf8(std::mem::replace(&mut self.carry, rest))
            .map_err(|_| MetadataError::InvalidUtf8)?;
        Ok(text)
    }
}
