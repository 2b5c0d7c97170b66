//! Consumer multiplexer
//!
//! Splits one segmented stream between any number of consumers. Each
//! consumer must start on a clean boundary, so where it starts depends on
//! when it attaches:
//!
//! | Stream state                      | Starting point                              |
//! |-----------------------------------|---------------------------------------------|
//! | init segment captured             | init segment now, then the next boundary    |
//! | no segment seen yet               | the init segment, live                      |
//! | inside the init segment           | deferred until the init segment is captured |
//!
//! A consumer that is waiting for a boundary receives nothing until the next
//! `NewSegment` notification, so it never sees a truncated segment.

use std::collections::HashMap;

use bytes::Bytes;

use super::consumer::{ConsumerId, ConsumerSink, SinkError};
use super::error::FanoutError;
use crate::segmenter::{CorrelatorEvent, InitCapture, InitSegment};

/// Delivery phase of one consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerPhase {
    /// Waiting for the init segment to be captured
    Deferred,
    /// Waiting for the next segment boundary
    AwaitingBoundary,
    /// Forwarding every chunk
    Live,
}

struct Consumer {
    sink: Box<dyn ConsumerSink>,
    phase: ConsumerPhase,
}

impl Consumer {
    fn deliver(&mut self, event: &CorrelatorEvent) -> Result<(), SinkError> {
        match (self.phase, event) {
            (ConsumerPhase::Live, CorrelatorEvent::Data(chunk)) => {
                self.sink.send(chunk.data.clone())
            }
            (ConsumerPhase::AwaitingBoundary, CorrelatorEvent::NewSegment(segment)) => {
                self.phase = ConsumerPhase::Live;
                segment
                    .buffers
                    .iter()
                    .filter(|buffer| !buffer.is_empty())
                    .try_for_each(|buffer| self.sink.send(buffer.clone()))
            }
            _ => Ok(()),
        }
    }

    fn start(&mut self, init: &InitSegment) -> Result<(), SinkError> {
        self.phase = ConsumerPhase::AwaitingBoundary;
        self.sink.send(Bytes::clone(init.data()))
    }
}

/// Fans a segmented stream out to attached consumers
#[derive(Default)]
pub struct Multiplexer {
    consumers: HashMap<ConsumerId, Consumer>,
    /// Consumers waiting for the init segment, in attach order
    deferred: Vec<ConsumerId>,
    /// Consumers attached over the multiplexer's lifetime
    attached_total: u64,
    /// Consumers detached because their sink failed
    dropped_total: u64,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a consumer
    ///
    /// Fails if `id` is already attached.
    pub fn attach(
        &mut self,
        id: ConsumerId,
        sink: Box<dyn ConsumerSink>,
        capture: &InitCapture,
    ) -> Result<(), FanoutError> {
        if self.consumers.contains_key(&id) {
            return Err(FanoutError::AlreadyAttached(id));
        }

        let mut consumer = Consumer {
            sink,
            phase: ConsumerPhase::AwaitingBoundary,
        };
        self.attached_total += 1;

        if let Some(init) = capture.init_segment() {
            if let Err(e) = consumer.start(init) {
                tracing::warn!(consumer_id = %id, error = %e, "Consumer failed on init segment");
                self.dropped_total += 1;
                return Ok(());
            }
        } else if capture.is_started() {
            consumer.phase = ConsumerPhase::Deferred;
            self.deferred.push(id);
        }

        tracing::debug!(consumer_id = %id, phase = ?consumer.phase, "Consumer attached");
        self.consumers.insert(id, consumer);
        Ok(())
    }

    /// Detach a consumer
    ///
    /// Returns false if it was not attached.
    pub fn detach(&mut self, id: ConsumerId) -> bool {
        if self.consumers.remove(&id).is_some() {
            self.deferred.retain(|deferred| *deferred != id);
            tracing::debug!(consumer_id = %id, "Consumer detached");
            true
        } else {
            false
        }
    }

    /// Forward one correlator notification to every attached consumer
    pub fn dispatch(&mut self, event: &CorrelatorEvent) {
        let failed: Vec<(ConsumerId, SinkError)> = self
            .consumers
            .iter_mut()
            .filter_map(|(id, consumer)| consumer.deliver(event).err().map(|e| (*id, e)))
            .collect();

        for (id, error) in failed {
            tracing::warn!(consumer_id = %id, error = %error, "Dropping consumer");
            self.detach(id);
            self.dropped_total += 1;
        }
    }

    /// Start every deferred consumer with the captured init segment
    ///
    /// Promoted consumers wait for the boundary after the one that completed
    /// the init segment.
    pub fn promote(&mut self, init: &InitSegment) {
        for id in std::mem::take(&mut self.deferred) {
            let Some(consumer) = self.consumers.get_mut(&id) else {
                continue;
            };
            if let Err(e) = consumer.start(init) {
                tracing::warn!(consumer_id = %id, error = %e, "Consumer failed on init segment");
                self.consumers.remove(&id);
                self.dropped_total += 1;
            }
        }
    }

    /// Detach every consumer, dropping their sinks
    pub fn clear(&mut self) -> usize {
        let count = self.consumers.len();
        self.consumers.clear();
        self.deferred.clear();
        count
    }

    pub fn is_attached(&self, id: ConsumerId) -> bool {
        self.consumers.contains_key(&id)
    }

    /// Delivery phase of an attached consumer
    pub fn phase(&self, id: ConsumerId) -> Option<ConsumerPhase> {
        self.consumers.get(&id).map(|consumer| consumer.phase)
    }

    /// Number of attached consumers
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Number of consumers waiting for the init segment
    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    pub fn attached_total(&self) -> u64 {
        self.attached_total
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("consumers", &self.consumers.len())
            .field("deferred", &self.deferred)
            .finish()
    }
}
