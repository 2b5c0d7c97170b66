//! Statistics for stream sessions and the server

use std::time::{Duration, Instant};

/// Stream session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Session ID
    pub session_id: u64,
    /// When the session was created
    pub started_at: Instant,
    /// Total media bytes ingested
    pub media_bytes: u64,
    /// Media chunks ingested
    pub media_chunks: u64,
    /// Metadata records applied
    pub metadata_records: u64,
    /// Segment boundaries matched against media
    pub segments: u64,
    /// Consumers attached over the session's lifetime
    pub consumers_attached: u64,
    /// Consumers currently attached
    pub consumers_active: usize,
    /// Consumers detached because their sink failed
    pub consumers_dropped: u64,
    /// Length of the captured init segment
    pub init_segment_len: Option<usize>,
}

impl SessionStats {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            started_at: Instant::now(),
            media_bytes: 0,
            media_chunks: 0,
            metadata_records: 0,
            segments: 0,
            consumers_attached: 0,
            consumers_active: 0,
            consumers_dropped: 0,
            init_segment_len: None,
        }
    }

    /// Get duration since the session started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Calculate ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.media_bytes * 8) / secs
        } else {
            0
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Stream sessions created
    pub sessions: u64,
    /// Sessions torn down because of a protocol error
    pub failed_sessions: u64,
    /// Producer connections accepted (media and metadata)
    pub producer_connections: u64,
    /// Consumer connections accepted
    pub consumer_connections: u64,
    /// Consumers currently attached
    pub active_consumers: usize,
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }
}
