//! Session dispatcher
//!
//! A single task owns the current stream session. Producer reads, producer
//! lifecycle and consumer attach/detach all arrive as commands on one
//! channel, so the session is only ever touched by one task.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

use crate::fanout::{ChannelSink, ConsumerId};
use crate::sink::StreamSink;
use crate::stats::ServerStats;

/// Which producer feed a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerChannel {
    /// Raw media bytes
    Media,
    /// Newline-delimited JSON boundary records
    Info,
}

impl std::fmt::Display for ProducerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerChannel::Media => write!(f, "media"),
            ProducerChannel::Info => write!(f, "info"),
        }
    }
}

/// Commands processed by the dispatcher
#[derive(Debug)]
pub(crate) enum Command {
    ProducerOpened {
        channel: ProducerChannel,
        conn_id: u64,
        close: oneshot::Sender<()>,
    },
    ProducerClosed {
        channel: ProducerChannel,
        conn_id: u64,
    },
    Media {
        conn_id: u64,
        data: Bytes,
    },
    Metadata {
        conn_id: u64,
        text: String,
    },
    ConsumerOpened {
        id: ConsumerId,
        sink: ChannelSink,
    },
    ConsumerClosed {
        id: ConsumerId,
    },
    Shutdown,
}

/// An active producer connection
#[derive(Debug)]
struct ProducerSlot {
    conn_id: u64,
    close: oneshot::Sender<()>,
}

pub(crate) struct Dispatcher {
    commands: mpsc::UnboundedReceiver<Command>,
    session: Option<StreamSink>,
    media: Option<ProducerSlot>,
    info: Option<ProducerSlot>,
    next_session_id: u64,
    stats: ServerStats,
    stats_tx: watch::Sender<ServerStats>,
}

impl Dispatcher {
    pub(crate) fn new(
        commands: mpsc::UnboundedReceiver<Command>,
        stats_tx: watch::Sender<ServerStats>,
    ) -> Self {
        Self {
            commands,
            session: None,
            media: None,
            info: None,
            next_session_id: 1,
            stats: ServerStats::new(),
            stats_tx,
        }
    }

    /// Process commands until shutdown or until every sender is gone
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.handle(command);
            self.publish_stats();
        }

        self.teardown("server closing");
        self.publish_stats();
        tracing::debug!("Dispatcher stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::ProducerOpened {
                channel,
                conn_id,
                close,
            } => {
                self.stats.producer_connections += 1;
                if self.slot(channel).is_some() {
                    self.teardown("producer replaced");
                }
                self.session_mut();
                *self.slot_mut(channel) = Some(ProducerSlot { conn_id, close });
                tracing::info!(channel = %channel, conn_id, "Producer attached");
            }
            Command::ProducerClosed { channel, conn_id } => {
                if self.is_current(channel, conn_id) {
                    tracing::info!(channel = %channel, conn_id, "Producer disconnected");
                    self.teardown("producer disconnected");
                }
            }
            Command::Media { conn_id, data } => {
                if !self.is_current(ProducerChannel::Media, conn_id) {
                    return;
                }
                let result = self.session_mut().ingest_media(data);
                if result.is_err() {
                    self.fail_session();
                }
            }
            Command::Metadata { conn_id, text } => {
                if !self.is_current(ProducerChannel::Info, conn_id) {
                    return;
                }
                let result = self.session_mut().ingest_metadata(&text);
                if result.is_err() {
                    self.fail_session();
                }
            }
            Command::ConsumerOpened { id, sink } => {
                self.stats.consumer_connections += 1;
                if let Err(e) = self.session_mut().add_consumer(id, sink) {
                    tracing::error!(consumer_id = %id, error = %e, "Failed to attach consumer");
                }
            }
            Command::ConsumerClosed { id } => {
                if let Some(session) = self.session.as_mut() {
                    session.remove_consumer(id);
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Current session, created on first use
    fn session_mut(&mut self) -> &mut StreamSink {
        let next_session_id = &mut self.next_session_id;
        let stats = &mut self.stats;
        self.session.get_or_insert_with(|| {
            let id = *next_session_id;
            *next_session_id += 1;
            stats.sessions += 1;
            tracing::info!(session_id = id, "Stream session created");
            StreamSink::with_id(id)
        })
    }

    fn slot(&self, channel: ProducerChannel) -> Option<&ProducerSlot> {
        match channel {
            ProducerChannel::Media => self.media.as_ref(),
            ProducerChannel::Info => self.info.as_ref(),
        }
    }

    fn slot_mut(&mut self, channel: ProducerChannel) -> &mut Option<ProducerSlot> {
        match channel {
            ProducerChannel::Media => &mut self.media,
            ProducerChannel::Info => &mut self.info,
        }
    }

    fn is_current(&self, channel: ProducerChannel, conn_id: u64) -> bool {
        self.slot(channel).is_some_and(|slot| slot.conn_id == conn_id)
    }

    fn fail_session(&mut self) {
        self.stats.failed_sessions += 1;
        self.teardown("protocol error");
    }

    /// End the current session
    ///
    /// Signals both producer connections to close and drops every consumer
    /// sink, which closes their connections.
    fn teardown(&mut self, reason: &str) {
        for slot in [self.media.take(), self.info.take()].into_iter().flatten() {
            // The connection may already be gone
            let _ = slot.close.send(());
        }

        if let Some(mut session) = self.session.take() {
            let stats = session.stats();
            let consumers = session.close();
            tracing::info!(
                session_id = stats.session_id,
                reason,
                consumers,
                media_bytes = stats.media_bytes,
                segments = stats.segments,
                consumers_dropped = stats.consumers_dropped,
                bitrate = stats.bitrate(),
                duration_ms = stats.duration().as_millis() as u64,
                "Stream session closed"
            );
        }
    }

    fn publish_stats(&mut self) {
        self.stats.active_consumers = self
            .session
            .as_ref()
            .map_or(0, StreamSink::consumer_count);
        self.stats_tx.send_replace(self.stats.clone());
    }
}
