//! Consumer sinks
//!
//! A consumer is anything that accepts media buffers in order. The
//! multiplexer only forwards references to chunk views; it never copies or
//! modifies them.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

/// Identity of an attached consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Why a sink refused a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The receiving side has gone away
    #[error("consumer closed")]
    Closed,
    /// The consumer is not draining its queue fast enough
    #[error("consumer queue full")]
    Full,
}

/// Destination for a consumer's media stream
///
/// `send` must not block. A sink that cannot take a buffer right away
/// returns an error and is detached.
pub trait ConsumerSink: Send {
    fn send(&mut self, data: Bytes) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel drained by a connection task
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    /// Dropped with the sink, which wakes the receiver mid-write
    _detach: oneshot::Sender<()>,
}

impl ChannelSink {
    /// Create a sink and the receiver its buffers arrive on
    pub fn channel(capacity: usize) -> (Self, ChannelReceiver) {
        let (tx, buffers) = mpsc::channel(capacity.max(1));
        let (detach_tx, detach_rx) = oneshot::channel();
        let sink = Self {
            tx,
            _detach: detach_tx,
        };
        let receiver = ChannelReceiver {
            buffers,
            detached: Some(detach_rx),
        };
        (sink, receiver)
    }
}

/// Receiving end of a [`ChannelSink`]
#[derive(Debug)]
pub struct ChannelReceiver {
    buffers: mpsc::Receiver<Bytes>,
    detached: Option<oneshot::Receiver<()>>,
}

impl ChannelReceiver {
    /// Next queued buffer; `None` once the sink is dropped and the queue drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.buffers.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.buffers.try_recv()
    }

    /// Resolves once the sink has been dropped, even with buffers still queued
    ///
    /// Cancel safe.
    pub async fn detached(&mut self) {
        if let Some(signal) = self.detached.as_mut() {
            let _ = signal.await;
            self.detached = None;
        }
    }

    /// Check if the sink has been dropped
    pub fn is_detached(&mut self) -> bool {
        let Some(signal) = self.detached.as_mut() else {
            return true;
        };
        if matches!(signal.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
            return false;
        }
        // The receiver must not be polled again once resolved
        self.detached = None;
        true
    }
}

impl ConsumerSink for ChannelSink {
    fn send(&mut self, data: Bytes) -> Result<(), SinkError> {
        self.tx.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

impl ConsumerSink for mpsc::UnboundedSender<Bytes> {
    fn send(&mut self, data: Bytes) -> Result<(), SinkError> {
        mpsc::UnboundedSender::send(self, data).map_err(|_| SinkError::Closed)
    }
}
