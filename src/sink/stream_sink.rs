//! Stream sink
//!
//! One stream session: a correlator, its init segment capture, and the
//! consumer multiplexer, behind a single ingestion surface. A sink models
//! one logical stream from its first byte to teardown; a producer reconnect
//! replaces it wholesale.
//!
//! All methods take `&mut self`. The sink is meant to be owned by a single
//! task that serializes producer input and consumer attach/detach.

use bytes::Bytes;

use super::metadata::{MetadataError, MetadataFramer, MetadataRecord};
use crate::error::{Error, Result};
use crate::fanout::{ConsumerId, ConsumerSink, Multiplexer};
use crate::media::BoundaryEvent;
use crate::segmenter::{Correlator, CorrelatorEvent, InitCapture, InitSegment};
use crate::stats::SessionStats;

/// Shares one segmented media stream across consumers
#[derive(Debug)]
pub struct StreamSink {
    correlator: Correlator,
    capture: InitCapture,
    mux: Multiplexer,
    framer: MetadataFramer,
    /// Set once a fatal error was returned
    failed: bool,
    stats: SessionStats,
}

impl StreamSink {
    /// Create a sink with session ID 0
    pub fn new() -> Self {
        Self::with_id(0)
    }

    /// Create a sink for the given session
    pub fn with_id(session_id: u64) -> Self {
        Self {
            correlator: Correlator::new(),
            capture: InitCapture::new(),
            mux: Multiplexer::new(),
            framer: MetadataFramer::new(),
            failed: false,
            stats: SessionStats::new(session_id),
        }
    }

    /// Session ID
    pub fn id(&self) -> u64 {
        self.stats.session_id
    }

    /// Consume the next chunk of the media stream
    ///
    /// Chunks passed in order must form the complete stream.
    pub fn ingest_media(&mut self, data: Bytes) -> Result<()> {
        self.ensure_healthy()?;

        self.stats.media_bytes += data.len() as u64;
        self.stats.media_chunks += 1;

        let events = self.correlator.add_media(data);
        self.dispatch(events);
        Ok(())
    }

    /// Consume a piece of the newline-delimited JSON metadata feed
    ///
    /// Records may be split across calls. A complete record that fails to
    /// parse or violates boundary ordering fails the session.
    pub fn ingest_metadata(&mut self, text: &str) -> Result<()> {
        self.ensure_healthy()?;

        let mut framer = std::mem::take(&mut self.framer);
        let result = framer.push(text, |record| self.apply_record(record));
        self.framer = framer;

        result.map_err(|e| self.fail(Error::Metadata(e)))
    }

    /// Record a single segment boundary
    pub fn ingest_boundary(&mut self, event: BoundaryEvent) -> Result<()> {
        self.ensure_healthy()?;

        match self.correlator.add_info(event) {
            Ok(segment) => {
                self.stats.metadata_records += 1;
                self.dispatch(segment.map(CorrelatorEvent::NewSegment));
                Ok(())
            }
            Err(e) => Err(self.fail(Error::Sequencing(e))),
        }
    }

    /// Add a consumer to start receiving media
    ///
    /// The consumer is fed the init segment, then media segments starting
    /// with the first one matched after it was added. Segment timing is not
    /// rewritten, so the stream may start at a non-zero time.
    pub fn add_consumer<S>(&mut self, id: ConsumerId, sink: S) -> Result<()>
    where
        S: ConsumerSink + 'static,
    {
        self.mux.attach(id, Box::new(sink), &self.capture)?;
        Ok(())
    }

    /// Stop sending data to a consumer
    ///
    /// Returns false if it was not attached.
    pub fn remove_consumer(&mut self, id: ConsumerId) -> bool {
        self.mux.detach(id)
    }

    /// Detach every consumer, closing their sinks
    pub fn close(&mut self) -> usize {
        self.mux.clear()
    }

    /// The captured init segment, once complete
    pub fn init_segment(&self) -> Option<&InitSegment> {
        self.capture.init_segment()
    }

    /// Check if a fatal error ended this session
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Check if any producer input has arrived
    pub fn is_started(&self) -> bool {
        self.correlator.is_started()
    }

    pub fn consumer_count(&self) -> usize {
        self.mux.len()
    }

    pub fn is_attached(&self, id: ConsumerId) -> bool {
        self.mux.is_attached(id)
    }

    /// Snapshot of the session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            consumers_attached: self.mux.attached_total(),
            consumers_active: self.mux.len(),
            consumers_dropped: self.mux.dropped_total(),
            init_segment_len: self.capture.init_segment().map(InitSegment::len),
            ..self.stats.clone()
        }
    }

    fn apply_record(&mut self, record: MetadataRecord) -> std::result::Result<(), MetadataError> {
        let boundary = record.to_boundary()?;
        let segment = self.correlator.add_info(boundary)?;
        self.stats.metadata_records += 1;
        self.dispatch(segment.map(CorrelatorEvent::NewSegment));
        Ok(())
    }

    /// Hand each notification to the capture, then to the consumers
    fn dispatch(&mut self, events: impl IntoIterator<Item = CorrelatorEvent>) {
        for event in events {
            if let CorrelatorEvent::NewSegment(segment) = &event {
                self.stats.segments += 1;
                tracing::debug!(
                    session_id = self.stats.session_id,
                    kind = %segment.kind,
                    start = segment.start,
                    "New segment"
                );
            }

            let ready = self.capture.observe(&event);
            self.mux.dispatch(&event);

            if let Some(init) = ready {
                tracing::info!(
                    session_id = self.stats.session_id,
                    len = init.len(),
                    deferred = self.mux.deferred_count(),
                    "Init segment ready"
                );
                self.mux.promote(&init);
            }
        }
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.failed {
            Err(Error::SessionFailed)
        } else {
            Ok(())
        }
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::error!(session_id = self.stats.session_id, error = %error, "Stream session failed");
        self.failed = true;
        error
    }
}

impl Default for StreamSink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;
    use tokio_test::assert_ok;

    use super::*;
    use crate::segmenter::SequencingError;

    fn media(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn info_line(event: &str, offset: u64) -> String {
        format!("{{\"event\":\"{event}\",\"offset\":{offset}}}\n")
    }

    fn info_text(offsets: &[u64]) -> String {
        offsets
            .iter()
            .enumerate()
            .map(|(i, offset)| {
                let event = if i == 0 {
                    "INIT_SEGMENT_START"
                } else {
                    "MEDIA_SEGMENT_START"
                };
                info_line(event, *offset)
            })
            .collect()
    }

    fn attach(sink: &mut StreamSink, id: u64) -> mpsc::UnboundedReceiver<Bytes> {
        let (tx, rx) = mpsc::unbounded_channel();
        sink.add_consumer(ConsumerId(id), tx).unwrap();
        rx
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(buffer) = rx.try_recv() {
            out.extend_from_slice(&buffer);
        }
        out
    }

    #[test]
    fn test_full_stream_with_fragmented_metadata() {
        let bytes = media(1000);
        let text = info_text(&[0, 120, 400, 760]);
        let mut sink = StreamSink::new();
        let mut rx = attach(&mut sink, 1);

        // Interleave small metadata fragments with media chunks
        let mut text_pieces = text.as_bytes().chunks(7);
        for piece in bytes.chunks(90) {
            assert_ok!(sink.ingest_media(Bytes::copy_from_slice(piece)));
            if let Some(fragment) = text_pieces.next() {
                let fragment = std::str::from_utf8(fragment).unwrap();
                assert_ok!(sink.ingest_metadata(fragment));
            }
        }
        for fragment in text_pieces {
            assert_ok!(sink.ingest_metadata(std::str::from_utf8(fragment).unwrap()));
        }

        assert_eq!(drain(&mut rx), bytes);

        let stats = sink.stats();
        assert_eq!(stats.media_bytes, 1000);
        assert_eq!(stats.metadata_records, 4);
        assert_eq!(stats.segments, 4);
        assert_eq!(stats.init_segment_len, Some(120));
        assert_eq!(sink.init_segment().unwrap().data()[..], bytes[..120]);
    }

    #[test]
    fn test_info_leads_media_single_chunk() {
        let bytes = media(1500);
        let mut sink = StreamSink::new();
        let mut rx = attach(&mut sink, 1);

        sink.ingest_metadata(&info_text(&[0, 1000])).unwrap();
        sink.ingest_media(Bytes::from(bytes.clone())).unwrap();

        assert_eq!(sink.stats().segments, 2);
        assert_eq!(sink.init_segment().unwrap().len(), 1000);
        assert_eq!(drain(&mut rx), bytes);
    }

    #[test]
    fn test_late_attach_before_init_ready() {
        let bytes = media(600);
        let mut sink = StreamSink::new();

        sink.ingest_boundary(BoundaryEvent::init(0)).unwrap();
        sink.ingest_media(Bytes::copy_from_slice(&bytes[..50])).unwrap();

        let mut rx = attach(&mut sink, 1);
        sink.ingest_media(Bytes::copy_from_slice(&bytes[50..200])).unwrap();
        assert!(drain(&mut rx).is_empty());

        sink.ingest_boundary(BoundaryEvent::media(100)).unwrap();
        // Init segment delivered whole, never partially
        assert_eq!(drain(&mut rx), bytes[..100]);

        sink.ingest_boundary(BoundaryEvent::media(300)).unwrap();
        sink.ingest_media(Bytes::copy_from_slice(&bytes[200..])).unwrap();
        assert_eq!(drain(&mut rx), bytes[300..]);
    }

    #[test]
    fn test_detach_mid_stream() {
        let bytes = media(900);
        let mut sink = StreamSink::new();
        let mut rx = attach(&mut sink, 1);

        sink.ingest_metadata(&info_text(&[0, 300, 600])).unwrap();
        sink.ingest_media(Bytes::copy_from_slice(&bytes[..300])).unwrap();
        sink.ingest_media(Bytes::copy_from_slice(&bytes[300..600])).unwrap();
        assert!(sink.remove_consumer(ConsumerId(1)));
        sink.ingest_media(Bytes::copy_from_slice(&bytes[600..])).unwrap();

        assert_eq!(drain(&mut rx), bytes[..600]);
        assert!(!sink.remove_consumer(ConsumerId(1)));
    }

    #[test]
    fn test_repeated_offset_fails_session() {
        let mut sink = StreamSink::new();
        sink.ingest_metadata(&info_text(&[0, 500])).unwrap();

        let result = sink.ingest_metadata(&info_line("MEDIA_SEGMENT_START", 500));
        assert!(matches!(
            result,
            Err(Error::Metadata(MetadataError::Sequencing(
                SequencingError::NonIncreasingOffset {
                    previous: 500,
                    offset: 500
                }
            )))
        ));
        assert!(sink.is_failed());

        assert!(matches!(
            sink.ingest_media(Bytes::from_static(b"more")),
            Err(Error::SessionFailed)
        ));
    }

    #[test]
    fn test_decreasing_boundary_fails_session() {
        let mut sink = StreamSink::new();
        sink.ingest_boundary(BoundaryEvent::init(0)).unwrap();
        sink.ingest_boundary(BoundaryEvent::media(500)).unwrap();

        assert!(matches!(
            sink.ingest_boundary(BoundaryEvent::media(499)),
            Err(Error::Sequencing(SequencingError::NonIncreasingOffset { .. }))
        ));
        assert!(sink.is_failed());
    }

    #[test]
    fn test_malformed_metadata_fails_session() {
        let mut sink = StreamSink::new();

        let result = sink.ingest_metadata("{\"event\":\n");
        assert!(matches!(result, Err(Error::Metadata(MetadataError::Parse { .. }))));
        assert!(sink.is_failed());
    }

    #[test]
    fn test_endless_unterminated_metadata_fails_session() {
        let mut sink = StreamSink::new();
        let filler = " ".repeat(1024);

        sink.ingest_metadata("{\"event\":").unwrap();
        let result = (0..128)
            .map(|_| sink.ingest_metadata(&filler))
            .find(Result::is_err);

        assert!(matches!(
            result,
            Some(Err(Error::Metadata(MetadataError::FragmentTooLong { .. })))
        ));
        assert!(sink.is_failed());
    }

    #[test]
    fn test_incomplete_trailing_record_is_retained() {
        let mut sink = StreamSink::new();

        sink.ingest_metadata("{\"event\":\"INIT_SEGMENT_START\",\"off")
            .unwrap();
        assert_eq!(sink.stats().metadata_records, 0);

        sink.ingest_metadata("set\":0}\n").unwrap();
        assert_eq!(sink.stats().metadata_records, 1);
        assert!(!sink.is_failed());
    }

    #[test]
    fn test_double_attach_fails() {
        let mut sink = StreamSink::new();
        let _rx = attach(&mut sink, 1);

        let (tx, _rx2) = mpsc::unbounded_channel::<Bytes>();
        assert!(matches!(
            sink.add_consumer(ConsumerId(1), tx),
            Err(Error::Fanout(_))
        ));
        assert_eq!(sink.consumer_count(), 1);
    }

    #[test]
    fn test_close_detaches_everyone() {
        let mut sink = StreamSink::with_id(9);
        let mut rx1 = attach(&mut sink, 1);
        let mut rx2 = attach(&mut sink, 2);

        assert_eq!(sink.close(), 2);
        assert_eq!(sink.consumer_count(), 0);
        assert_eq!(sink.id(), 9);

        assert!(matches!(
            rx1.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(matches!(
            rx2.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }
}
