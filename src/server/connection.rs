//! Connection tasks
//!
//! Producer connections read their feed and forward it to the dispatcher.
//! Consumer connections drain their queue onto the socket. Neither touches
//! the stream session directly.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

use super::dispatcher::{Command, ProducerChannel};
use crate::fanout::{ChannelReceiver, ConsumerId};
use crate::sink::Utf8Decoder;

/// Reads one producer feed until EOF, error or a close signal
pub(crate) struct ProducerConnection<S> {
    pub(crate) channel: ProducerChannel,
    pub(crate) conn_id: u64,
    pub(crate) stream: S,
    pub(crate) read_buffer_size: usize,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    pub(crate) close: oneshot::Receiver<()>,
    /// Held until the connection finishes
    pub(crate) _drain: mpsc::Sender<()>,
}

impl<S> ProducerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) async fn run(mut self) {
        let mut buf = BytesMut::with_capacity(self.read_buffer_size);
        let mut decoder = Utf8Decoder::new();

        loop {
            buf.reserve(self.read_buffer_size);

            let read = tokio::select! {
                // Either an explicit close or the dispatcher dropping the slot
                _ = &mut self.close => break,
                read = self.stream.read_buf(&mut buf) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    let data = buf.split().freeze();
                    if !self.forward(data, &mut decoder) {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        channel = %self.channel,
                        conn_id = self.conn_id,
                        error = %e,
                        "Producer read error"
                    );
                    break;
                }
            }
        }

        let _ = self.commands.send(Command::ProducerClosed {
            channel: self.channel,
            conn_id: self.conn_id,
        });
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!(conn_id = self.conn_id, error = %e, "Producer shutdown failed");
        }
        tracing::debug!(channel = %self.channel, conn_id = self.conn_id, "Producer connection closed");
    }

    /// Forward one read to the dispatcher; false ends the connection
    fn forward(&self, data: Bytes, decoder: &mut Utf8Decoder) -> bool {
        let command = match self.channel {
            ProducerChannel::Media => Command::Media {
                conn_id: self.conn_id,
                data,
            },
            ProducerChannel::Info => match decoder.decode(&data) {
                Ok(text) => Command::Metadata {
                    conn_id: self.conn_id,
                    text,
                },
                Err(e) => {
                    tracing::error!(conn_id = self.conn_id, error = %e, "Rejecting metadata feed");
                    return false;
                }
            },
        };

        self.commands.send(command).is_ok()
    }
}

/// Writes a consumer's buffers to its connection
///
/// Ends as soon as its sink is dropped, even in the middle of a write to a
/// consumer that stopped reading.
pub(crate) struct ConsumerConnection<S> {
    pub(crate) id: ConsumerId,
    pub(crate) stream: S,
    pub(crate) buffers: ChannelReceiver,
    pub(crate) commands: mpsc::UnboundedSender<Command>,
    /// Held until the connection finishes
    pub(crate) _drain: mpsc::Sender<()>,
}

impl<S> ConsumerConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) async fn run(self) {
        let Self {
            id,
            stream,
            mut buffers,
            commands,
            _drain,
        } = self;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut scratch = [0u8; 512];

        loop {
            tokio::select! {
                next = buffers.recv() => match next {
                    Some(data) => {
                        let written = tokio::select! {
                            biased;
                            written = writer.write_all(&data) => written,
                            _ = buffers.detached() => {
                                tracing::debug!(consumer_id = %id, "Abandoning write to detached consumer");
                                break;
                            }
                        };
                        if let Err(e) = written {
                            tracing::debug!(consumer_id = %id, error = %e, "Consumer write error");
                            break;
                        }
                    }
                    // Detached or session torn down
                    None => break,
                },
                // Consumers never send anything meaningful; watch for hangup
                read = reader.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                },
            }
        }

        let _ = commands.send(Command::ConsumerClosed { id });
        if let Err(e) = writer.shutdown().await {
            tracing::trace!(consumer_id = %id, error = %e, "Consumer shutdown failed");
        }
        tracing::debug!(consumer_id = %id, "Consumer connection closed");
    }
}
