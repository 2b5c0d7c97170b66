//! Segment correlator
//!
//! Reconciles the raw media byte feed with the boundary feed. Either feed
//! may run ahead of the other by any amount, so the correlator buffers in
//! both directions:
//!
//! - media leads info: chunks past the last known boundary are kept until a
//!   boundary inside them arrives
//! - info leads media: boundaries past the media end are kept until the
//!   chunk containing them arrives
//!
//! Every call returns the notifications it produced, in order. For a given
//! chunk the `Data` notification always precedes any `NewSegment` built from
//! that chunk, so a listener that waits for a segment and then follows
//! `Data` sees a gap-free stream starting at the boundary.

use std::collections::VecDeque;

use bytes::Bytes;

use super::error::SequencingError;
use crate::media::{BoundaryEvent, MediaChunk, Offset, Segment, SegmentKind};

/// Notification produced by the correlator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelatorEvent {
    /// A chunk was appended to the stream
    Data(MediaChunk),
    /// A segment boundary was matched against buffered media
    NewSegment(Segment),
}

/// Correlates media chunks with segment boundaries
#[derive(Debug, Default)]
pub struct Correlator {
    /// Whether any input has been processed
    started: bool,
    /// Whether the init boundary has been recorded
    init_received: bool,
    /// Offset of the latest boundary received
    last_boundary: Option<Offset>,
    /// Boundaries past the media end (info leads media)
    pending_boundaries: Vec<BoundaryEvent>,
    /// Offset one past the last media byte received
    media_end: Offset,
    /// Chunks past the last boundary (media leads info)
    buffered_media: VecDeque<MediaChunk>,
}

impl Correlator {
    /// Create a new correlator positioned at offset 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk at the current media end
    ///
    /// Never fails; ordering assertions live on the boundary feed. Empty
    /// chunks are ignored.
    pub fn add_media(&mut self, data: Bytes) -> Vec<CorrelatorEvent> {
        if data.is_empty() {
            return Vec::new();
        }
        self.started = true;

        let chunk = MediaChunk::new(self.media_end, data);
        let (resolved, future): (Vec<_>, Vec<_>) = self
            .pending_boundaries
            .drain(..)
            .partition(|boundary| chunk.contains(boundary.offset));
        self.pending_boundaries = future;

        let mut events = Vec::with_capacity(1 + resolved.len());
        events.push(CorrelatorEvent::Data(chunk.clone()));

        for boundary in resolved {
            tracing::debug!(
                kind = %boundary.kind,
                offset = boundary.offset,
                "Segment boundary resolved by media"
            );
            events.push(CorrelatorEvent::NewSegment(Segment {
                kind: boundary.kind,
                start: boundary.offset,
                buffers: vec![chunk.suffix_from(boundary.offset)],
            }));
        }

        let info_end = self.last_boundary.unwrap_or(0);
        while self
            .buffered_media
            .front()
            .is_some_and(|buffered| buffered.end() <= info_end)
        {
            self.buffered_media.pop_front();
        }

        self.media_end = chunk.end();
        // Media now leads info
        if chunk.end() > info_end {
            self.buffered_media.push_back(chunk);
        }

        events
    }

    /// Record a segment boundary
    ///
    /// Returns the new segment when its first bytes are already buffered,
    /// or `None` when the boundary is ahead of the media and has been
    /// queued until the matching chunk arrives.
    pub fn add_info(&mut self, event: BoundaryEvent) -> Result<Option<Segment>, SequencingError> {
        self.started = true;

        let BoundaryEvent { kind, offset } = event;
        match kind {
            SegmentKind::Init if self.init_received => {
                return Err(SequencingError::UnexpectedInit { offset });
            }
            SegmentKind::Media if !self.init_received => {
                return Err(SequencingError::UnexpectedMedia { offset });
            }
            _ => {}
        }
        if let Some(previous) = self.last_boundary {
            if offset <= previous {
                return Err(SequencingError::NonIncreasingOffset { previous, offset });
            }
        }

        self.last_boundary = Some(offset);
        if kind == SegmentKind::Init {
            self.init_received = true;
        }

        if offset < self.media_end {
            // Chunks wholly before the boundary belong to earlier segments
            while self
                .buffered_media
                .front()
                .is_some_and(|buffered| buffered.end() <= offset)
            {
                self.buffered_media.pop_front();
            }

            let buffers = self
                .buffered_media
                .iter()
                .map(|chunk| chunk.suffix_from(offset))
                .collect();

            tracing::debug!(kind = %kind, offset, "Segment boundary resolved by info");
            Ok(Some(Segment {
                kind,
                start: offset,
                buffers,
            }))
        } else {
            // Info leads media; nothing buffered can reach this boundary
            self.buffered_media.clear();
            self.pending_boundaries.push(event);
            Ok(None)
        }
    }

    /// Check if any media or info has been processed
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Offset one past the last media byte received
    pub fn media_end(&self) -> Offset {
        self.media_end
    }

    /// Offset of the latest boundary received
    pub fn last_boundary(&self) -> Option<Offset> {
        self.last_boundary
    }

    /// Number of chunks held while media leads info
    pub fn buffered_chunk_count(&self) -> usize {
        self.buffered_media.len()
    }

    /// Number of boundaries held while info leads media
    pub fn pending_boundary_count(&self) -> usize {
        self.pending_boundaries.len()
    }
}
