//! Live media segmenter and fan-out
//!
//! Correlates a raw media byte stream with an out-of-band feed of segment
//! boundary records, captures the initialization segment, and forwards
//! the stream to any number of consumers so that each one starts on a
//! clean segment boundary.
//!
//! # Layers
//!
//! - [`segmenter`]: boundary correlation and init segment capture
//! - [`fanout`]: per-consumer join state and dispatch
//! - [`sink`]: one producer session (metadata framing plus the above)
//! - [`server`]: TCP listeners and connection lifecycle
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use segcast::{ConsumerId, StreamSink};
//! use tokio::sync::mpsc;
//!
//! let mut sink = StreamSink::new();
//! let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
//! sink.add_consumer(ConsumerId(1), tx).unwrap();
//!
//! sink.ingest_metadata("{\"event\":\"INIT_SEGMENT_START\",\"offset\":0}\n").unwrap();
//! sink.ingest_metadata("{\"event\":\"MEDIA_SEGMENT_START\",\"offset\":4}\n").unwrap();
//! sink.ingest_media(Bytes::from_static(b"initdata")).unwrap();
//!
//! let mut received = Vec::new();
//! while let Ok(buffer) = rx.try_recv() {
//!     received.extend_from_slice(&buffer);
//! }
//! assert_eq!(received, b"initdata");
//! ```

pub mod error;
pub mod fanout;
pub mod media;
pub mod segmenter;
pub mod server;
pub mod sink;
pub mod stats;

pub use error::{Error, Result};
pub use fanout::{ChannelReceiver, ChannelSink, ConsumerId, ConsumerSink, Multiplexer};
pub use media::{BoundaryEvent, MediaChunk, Segment, SegmentKind};
pub use segmenter::{Correlator, CorrelatorEvent, InitCapture, InitSegment};
pub use server::{ServerConfig, ServerHandle, StreamingServer};
pub use sink::StreamSink;
pub use stats::{ServerStats, SessionStats};
