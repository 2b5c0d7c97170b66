//! Media stream data model
//!
//! Byte offsets, chunks of the raw stream, and the segment boundaries
//! asserted by the metadata feed.

pub mod chunk;
pub mod segment;

pub use chunk::{MediaChunk, Offset};
pub use segment::{BoundaryEvent, Segment, SegmentKind};
