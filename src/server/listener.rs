//! Streaming server listeners
//!
//! Runs the three accept loops (media producer, metadata producer,
//! consumers) and spawns a connection task for each accepted socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::connection::{ConsumerConnection, ProducerConnection};
use super::dispatcher::{Command, Dispatcher, ProducerChannel};
use crate::error::{Error, Result};
use crate::fanout::{ChannelSink, ConsumerId};
use crate::server::config::ServerConfig;
use crate::stats::ServerStats;

/// What an accept loop hands its sockets to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerKind {
    Producer(ProducerChannel),
    Consumer,
}

impl std::fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerKind::Producer(channel) => write!(f, "{}", channel),
            ListenerKind::Consumer => write!(f, "consumer"),
        }
    }
}

/// State shared by the accept loops and the handle
struct Shared {
    config: ServerConfig,
    commands: mpsc::UnboundedSender<Command>,
    next_connection_id: AtomicU64,
    next_consumer_id: AtomicU64,
    /// Cloned into every connection task; closed once they all finish
    drain: mpsc::Sender<()>,
}

impl Shared {
    fn accept(&self, kind: ListenerKind, socket: TcpStream, peer_addr: SocketAddr) {
        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let result = match kind {
            ListenerKind::Producer(channel) => self.spawn_producer(channel, socket, peer_addr),
            ListenerKind::Consumer => self.spawn_consumer(socket).map(|_| ()),
        };
        if let Err(e) = result {
            tracing::debug!(peer = %peer_addr, error = %e, "Dropping connection");
        }
    }

    fn spawn_producer(
        &self,
        channel: ProducerChannel,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<()> {
        let conn_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (close_tx, close) = oneshot::channel();

        tracing::info!(channel = %channel, conn_id, peer = %peer_addr, "New producer connection");

        // Registered before the task starts so no data can overtake it
        self.commands
            .send(Command::ProducerOpened {
                channel,
                conn_id,
                close: close_tx,
            })
            .map_err(|_| Error::ServerClosed)?;

        let connection = ProducerConnection {
            channel,
            conn_id,
            stream: socket,
            read_buffer_size: self.config.read_buffer_size,
            commands: self.commands.clone(),
            close,
            _drain: self.drain.clone(),
        };
        tokio::spawn(connection.run());
        Ok(())
    }

    fn spawn_consumer<S>(&self, stream: S) -> Result<ConsumerId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = ConsumerId(self.next_consumer_id.fetch_add(1, Ordering::Relaxed));
        let (sink, buffers) = ChannelSink::channel(self.config.consumer_queue_capacity);

        tracing::info!(consumer_id = %id, "New consumer connection");

        self.commands
            .send(Command::ConsumerOpened { id, sink })
            .map_err(|_| Error::ServerClosed)?;

        let connection = ConsumerConnection {
            id,
            stream,
            buffers,
            commands: self.commands.clone(),
            _drain: self.drain.clone(),
        };
        tokio::spawn(connection.run());
        Ok(id)
    }
}

/// Media fan-out server
///
/// Accepts one media producer and one metadata producer at a time and any
/// number of consumers.
///
/// # Example
/// ```no_run
/// use segcast::{ServerConfig, StreamingServer};
///
/// # async fn example() -> segcast::error::Result<()> {
/// let server = StreamingServer::new(ServerConfig::default()).start().await?;
///
/// tokio::signal::ctrl_c().await?;
/// server.close().await;
/// # Ok(())
/// # }
/// ```
pub struct StreamingServer {
    config: ServerConfig,
}

impl StreamingServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Bind all three listeners and start serving
    pub async fn start(self) -> Result<ServerHandle> {
        let media = TcpListener::bind(self.config.media_addr).await?;
        let info = TcpListener::bind(self.config.info_addr).await?;
        let consumer = TcpListener::bind(self.config.consumer_addr).await?;

        let media_addr = media.local_addr()?;
        let info_addr = info.local_addr()?;
        let consumer_addr = consumer.local_addr()?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (stats_tx, stats) = watch::channel(ServerStats::new());
        let (shutdown, _) = watch::channel(false);
        let (drain, drained) = mpsc::channel(1);

        let shared = Arc::new(Shared {
            config: self.config,
            commands,
            next_connection_id: AtomicU64::new(1),
            next_consumer_id: AtomicU64::new(1),
            drain,
        });

        let dispatcher = tokio::spawn(Dispatcher::new(command_rx, stats_tx).run());
        let listeners = vec![
            spawn_accept_loop(
                ListenerKind::Producer(ProducerChannel::Media),
                media,
                Arc::clone(&shared),
                shutdown.subscribe(),
            ),
            spawn_accept_loop(
                ListenerKind::Producer(ProducerChannel::Info),
                info,
                Arc::clone(&shared),
                shutdown.subscribe(),
            ),
            spawn_accept_loop(
                ListenerKind::Consumer,
                consumer,
                Arc::clone(&shared),
                shutdown.subscribe(),
            ),
        ];

        tracing::info!(
            media = %media_addr,
            info = %info_addr,
            consumer = %consumer_addr,
            "Streaming server listening"
        );

        Ok(ServerHandle {
            shared,
            media_addr,
            info_addr,
            consumer_addr,
            stats,
            shutdown,
            listeners,
            dispatcher,
            drained,
        })
    }
}

fn spawn_accept_loop(
    kind: ListenerKind,
    listener: TcpListener,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer_addr)) => shared.accept(kind, socket, peer_addr),
                    Err(e) => {
                        tracing::error!(listener = %kind, error = %e, "Failed to accept connection");
                    }
                },
            }
        }
        tracing::info!(listener = %kind, "Listener closed");
    })
}

/// Handle to a running server
pub struct ServerHandle {
    shared: Arc<Shared>,
    media_addr: SocketAddr,
    info_addr: SocketAddr,
    consumer_addr: SocketAddr,
    stats: watch::Receiver<ServerStats>,
    shutdown: watch::Sender<bool>,
    listeners: Vec<JoinHandle<()>>,
    dispatcher: JoinHandle<()>,
    drained: mpsc::Receiver<()>,
}

impl ServerHandle {
    /// Bound address of the media producer listener
    pub fn media_addr(&self) -> SocketAddr {
        self.media_addr
    }

    /// Bound address of the metadata producer listener
    pub fn info_addr(&self) -> SocketAddr {
        self.info_addr
    }

    /// Bound address of the consumer listener
    pub fn consumer_addr(&self) -> SocketAddr {
        self.consumer_addr
    }

    /// Check if an upgrade request for `path` belongs to this server
    pub fn should_handle(&self, path: &str) -> bool {
        path == self.shared.config.stream_path
    }

    /// Take over a consumer connection upgraded by an external front door
    pub fn handle_consumer<S>(&self, stream: S) -> Result<ConsumerId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.shared.spawn_consumer(stream)
    }

    /// Snapshot of the server statistics
    pub fn stats(&self) -> ServerStats {
        self.stats.borrow().clone()
    }

    /// Close the listeners and every open connection
    ///
    /// Resolves once all listeners, the dispatcher and every connection
    /// task have finished.
    pub async fn close(self) {
        let Self {
            shared,
            shutdown,
            listeners,
            dispatcher,
            mut drained,
            ..
        } = self;

        let _ = shutdown.send(true);
        for listener in listeners {
            if let Err(e) = listener.await {
                tracing::error!(error = %e, "Listener task failed");
            }
        }

        let _ = shared.commands.send(Command::Shutdown);
        if let Err(e) = dispatcher.await {
            tracing::error!(error = %e, "Dispatcher task failed");
        }

        // Connection tasks hold the only remaining drain senders
        drop(shared);
        let _ = drained.recv().await;

        tracing::info!("Streaming server closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::{sleep, timeout};

    use super::*;

    const SEGMENT_SIZES: [usize; 4] = [64, 500, 300, 200];

    fn test_stream() -> (Vec<u8>, String) {
        let total: usize = SEGMENT_SIZES.iter().sum();
        let media = (0..total).map(|i| (i % 239) as u8).collect();
        let mut info = String::new();
        let mut offset = 0;
        for (i, size) in SEGMENT_SIZES.iter().enumerate() {
            let event = if i == 0 {
                "INIT_SEGMENT_START"
            } else {
                "MEDIA_SEGMENT_START"
            };
            info.push_str(&format!("{{\"event\":\"{event}\",\"offset\":{offset}}}\n"));
            offset += size;
        }
        (media, info)
    }

    async fn start() -> ServerHandle {
        start_with(ServerConfig::ephemeral()).await
    }

    async fn start_with(config: ServerConfig) -> ServerHandle {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        StreamingServer::new(config).start().await.unwrap()
    }

    async fn wait_for(server: &ServerHandle, check: impl Fn(&ServerStats) -> bool) {
        timeout(Duration::from_secs(5), async {
            while !check(&server.stats()) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    async fn read_exact_len<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        timeout(Duration::from_secs(5), reader.read_exact(&mut out))
            .await
            .expect("timed out reading stream")
            .unwrap();
        out
    }

    async fn assert_eof<R: AsyncRead + Unpin>(reader: &mut R) {
        let mut rest = Vec::new();
        timeout(Duration::from_secs(5), reader.read_to_end(&mut rest))
            .await
            .expect("connection not closed")
            .unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_serves_full_stream_to_early_consumer() {
        let server = start().await;
        let (media, info) = test_stream();

        let mut client = TcpStream::connect(server.consumer_addr()).await.unwrap();
        wait_for(&server, |stats| stats.active_consumers == 1).await;

        let mut media_sink = TcpStream::connect(server.media_addr()).await.unwrap();
        let mut info_sink = TcpStream::connect(server.info_addr()).await.unwrap();
        wait_for(&server, |stats| stats.producer_connections == 2).await;

        media_sink.write_all(&media).await.unwrap();
        info_sink.write_all(info.as_bytes()).await.unwrap();

        assert_eq!(read_exact_len(&mut client, media.len()).await, media);

        // Producer hangup ends the session and closes consumers
        drop(media_sink);
        assert_eof(&mut client).await;
        wait_for(&server, |stats| stats.active_consumers == 0).await;

        server.close().await;
    }

    #[tokio::test]
    async fn test_upgraded_consumer_joins_after_init() {
        let server = start().await;
        let (media, info) = test_stream();
        let init_end = SEGMENT_SIZES[0];
        let split = init_end + SEGMENT_SIZES[1] + 10;

        let mut early = TcpStream::connect(server.consumer_addr()).await.unwrap();
        wait_for(&server, |stats| stats.active_consumers == 1).await;

        let mut media_sink = TcpStream::connect(server.media_addr()).await.unwrap();
        let mut info_sink = TcpStream::connect(server.info_addr()).await.unwrap();
        wait_for(&server, |stats| stats.producer_connections == 2).await;

        info_sink.write_all(info.as_bytes()).await.unwrap();
        media_sink.write_all(&media[..split]).await.unwrap();

        // Once the early consumer has it, the session has dispatched it
        assert_eq!(read_exact_len(&mut early, split).await, &media[..split]);

        assert!(server.should_handle("/stream"));
        assert!(!server.should_handle("/control"));

        let (mut upgraded, server_side) = tokio::io::duplex(64 * 1024);
        server.handle_consumer(server_side).unwrap();
        wait_for(&server, |stats| stats.active_consumers == 2).await;

        media_sink.write_all(&media[split..]).await.unwrap();

        // Init segment first, then everything from the next boundary on
        let next_boundary = init_end + SEGMENT_SIZES[1] + SEGMENT_SIZES[2];
        let mut expected = media[..init_end].to_vec();
        expected.extend_from_slice(&media[next_boundary..]);
        assert_eq!(read_exact_len(&mut upgraded, expected.len()).await, expected);
        assert_eq!(
            read_exact_len(&mut early, media.len() - split).await,
            &media[split..]
        );

        server.close().await;
    }

    #[tokio::test]
    async fn test_protocol_error_closes_consumers() {
        let server = start().await;

        let mut client = TcpStream::connect(server.consumer_addr()).await.unwrap();
        let mut info_sink = TcpStream::connect(server.info_addr()).await.unwrap();
        wait_for(&server, |stats| stats.active_consumers == 1 && stats.producer_connections == 1).await;

        info_sink
            .write_all(b"{\"event\":\"MEDIA_SEGMENT_START\",\"offset\":10}\n")
            .await
            .unwrap();

        assert_eof(&mut client).await;
        wait_for(&server, |stats| stats.failed_sessions == 1).await;

        // The metadata producer is closed as well
        let mut rest = Vec::new();
        timeout(Duration::from_secs(5), info_sink.read_to_end(&mut rest))
            .await
            .expect("producer not closed")
            .unwrap();

        server.close().await;
    }

    #[tokio::test]
    async fn test_close_ends_open_connections() {
        let server = start().await;

        let mut client = TcpStream::connect(server.consumer_addr()).await.unwrap();
        let mut media_sink = TcpStream::connect(server.media_addr()).await.unwrap();
        wait_for(&server, |stats| stats.active_consumers == 1 && stats.producer_connections == 1).await;

        timeout(Duration::from_secs(5), server.close())
            .await
            .expect("close did not complete");

        assert_eof(&mut client).await;
        let mut rest = Vec::new();
        media_sink.read_to_end(&mut rest).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_with_consumer_that_never_reads() {
        // Large enough that the consumer is never dropped as too slow
        let server = start_with(ServerConfig::ephemeral().consumer_queue_capacity(1 << 20)).await;

        let _stalled = TcpStream::connect(server.consumer_addr()).await.unwrap();
        wait_for(&server, |stats| stats.active_consumers == 1).await;

        let mut media_sink = TcpStream::connect(server.media_addr()).await.unwrap();
        let mut info_sink = TcpStream::connect(server.info_addr()).await.unwrap();
        wait_for(&server, |stats| stats.producer_connections == 2).await;

        info_sink
            .write_all(b"{\"event\":\"INIT_SEGMENT_START\",\"offset\":0}\n")
            .await
            .unwrap();

        // Far more than the socket buffers can hold
        let chunk = vec![0x5au8; 64 * 1024];
        for _ in 0..512 {
            media_sink.write_all(&chunk).await.unwrap();
        }
        sleep(Duration::from_millis(100)).await;
        assert_eq!(server.stats().active_consumers, 1);

        timeout(Duration::from_secs(10), server.close())
            .await
            .expect("close blocked on a stalled consumer");
    }
}
