//! Initialization segment capture
//!
//! Every consumer needs the init segment exactly once before any media
//! segment is playable. Consumers attaching after the stream started can no
//! longer see it live, so it is accumulated here and published once as a
//! single immutable buffer.

use bytes::{Bytes, BytesMut};

use super::correlator::{Correlator, CorrelatorEvent};
use super::error::CaptureError;
use crate::media::{Offset, SegmentKind};

/// The fully materialized init segment
///
/// Cheap to clone; every clone shares the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSegment {
    start: Offset,
    data: Bytes,
}

impl InitSegment {
    /// Offset of the init segment in the stream
    pub fn start(&self) -> Offset {
        self.start
    }

    /// Init segment bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug)]
enum CaptureState {
    /// No segment seen yet
    Waiting,
    /// Inside the init segment, collecting every buffer
    Accumulating { start: Offset, buffers: Vec<Bytes> },
    /// Init segment captured
    Ready(InitSegment),
}

/// Extracts the init segment from correlator notifications
#[derive(Debug)]
pub struct InitCapture {
    state: CaptureState,
}

impl InitCapture {
    /// Create a capture for a correlator that has not processed any input
    pub fn attach(correlator: &Correlator) -> Result<Self, CaptureError> {
        if correlator.is_started() {
            return Err(CaptureError::AlreadyStarted);
        }

        Ok(Self::new())
    }

    /// Capture for a correlator created alongside it
    pub(crate) fn new() -> Self {
        Self {
            state: CaptureState::Waiting,
        }
    }

    /// Feed one correlator notification
    ///
    /// Returns the init segment on the notification that completes it, and
    /// `None` on every other call.
    pub fn observe(&mut self, event: &CorrelatorEvent) -> Option<InitSegment> {
        match event {
            CorrelatorEvent::Data(chunk) => {
                if let CaptureState::Accumulating { buffers, .. } = &mut self.state {
                    buffers.push(chunk.data.clone());
                }
                None
            }
            CorrelatorEvent::NewSegment(segment) => match &self.state {
                CaptureState::Waiting => {
                    if segment.kind != SegmentKind::Init {
                        tracing::warn!(start = segment.start, "First segment is not an init segment");
                        return None;
                    }
                    self.state = CaptureState::Accumulating {
                        start: segment.start,
                        buffers: segment.buffers.clone(),
                    };
                    None
                }
                CaptureState::Accumulating { start, buffers } => {
                    let init = build_init_segment(*start, segment.start, buffers);
                    tracing::debug!(start = init.start, len = init.len(), "Init segment captured");
                    self.state = CaptureState::Ready(init.clone());
                    Some(init)
                }
                CaptureState::Ready(_) => None,
            },
        }
    }

    /// Check if the init segment boundary has been seen
    pub fn is_started(&self) -> bool {
        !matches!(self.state, CaptureState::Waiting)
    }

    /// The captured init segment, once complete
    pub fn init_segment(&self) -> Option<&InitSegment> {
        match &self.state {
            CaptureState::Ready(init) => Some(init),
            _ => None,
        }
    }
}

/// Concatenate the accumulated buffers, trimmed to `[start, end)`
fn build_init_segment(start: Offset, end: Offset, buffers: &[Bytes]) -> InitSegment {
    let size = end.saturating_sub(start) as usize;
    let mut data = BytesMut::with_capacity(size);

    for buffer in buffers {
        let remaining = size - data.len();
        if remaining == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..remaining.min(buffer.len())]);
    }

    InitSegment {
        start,
        data: data.freeze(),
    }
}
