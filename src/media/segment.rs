//! Segment boundaries and segments
//!
//! The metadata feed asserts where segments begin. A segment is never
//! materialized as one buffer; it is carried as the ordered list of chunk
//! views that make it up.

use bytes::Bytes;

use super::chunk::Offset;

/// Kind of segment starting at a boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    /// The leading initialization segment (exactly one per stream)
    Init,
    /// A playable media segment
    Media,
}

impl SegmentKind {
    /// Event name used on the metadata wire
    pub fn event_name(self) -> &'static str {
        match self {
            SegmentKind::Init => "INIT_SEGMENT_START",
            SegmentKind::Media => "MEDIA_SEGMENT_START",
        }
    }

    /// Parse the metadata wire event name
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "INIT_SEGMENT_START" => Some(SegmentKind::Init),
            "MEDIA_SEGMENT_START" => Some(SegmentKind::Media),
            _ => None,
        }
    }
}

impl std::fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentKind::Init => write!(f, "init"),
            SegmentKind::Media => write!(f, "media"),
        }
    }
}

/// Assertion that a segment of `kind` begins at `offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundaryEvent {
    pub kind: SegmentKind,
    pub offset: Offset,
}

impl BoundaryEvent {
    pub fn new(kind: SegmentKind, offset: Offset) -> Self {
        Self { kind, offset }
    }

    pub fn init(offset: Offset) -> Self {
        Self::new(SegmentKind::Init, offset)
    }

    pub fn media(offset: Offset) -> Self {
        Self::new(SegmentKind::Media, offset)
    }
}

/// A detected segment start
///
/// `buffers` holds every byte received from `start` up to the most recent
/// chunk, in order. The first buffer always begins exactly at `start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: Offset,
    pub buffers: Vec<Bytes>,
}

impl Segment {
    /// Total bytes currently carried by the segment
    pub fn len(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(Bytes::is_empty)
    }
}
