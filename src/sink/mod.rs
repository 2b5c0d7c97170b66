//! Stream sink
//!
//! Top-level ingestion surface for one stream session: raw media bytes and
//! raw metadata text go in, consumers attach and detach.

pub mod metadata;
pub mod stream_sink;

pub use metadata::{MetadataError, MetadataFramer, MetadataRecord, Utf8Decoder, MAX_PENDING_LEN};
pub use stream_sink::StreamSink;
