//! Server configuration

use std::net::SocketAddr;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the media producer connects to
    pub media_addr: SocketAddr,

    /// Address the metadata producer connects to
    pub info_addr: SocketAddr,

    /// Address consumers connect to
    pub consumer_addr: SocketAddr,

    /// Request path routed here by an external HTTP front door
    pub stream_path: String,

    /// Producer socket read buffer size
    pub read_buffer_size: usize,

    /// Buffers queued per consumer before it is dropped as too slow
    pub consumer_queue_capacity: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            media_addr: SocketAddr::from(([127, 0, 0, 1], 7001)),
            info_addr: SocketAddr::from(([127, 0, 0, 1], 7002)),
            consumer_addr: SocketAddr::from(([127, 0, 0, 1], 7003)),
            stream_path: "/stream".to_string(),
            read_buffer_size: 64 * 1024, // 64KB
            consumer_queue_capacity: 1024,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Config with every listener on an ephemeral localhost port
    pub fn ephemeral() -> Self {
        let any = SocketAddr::from(([127, 0, 0, 1], 0));
        Self {
            media_addr: any,
            info_addr: any,
            consumer_addr: any,
            ..Default::default()
        }
    }

    /// Set the media producer address
    pub fn media_addr(mut self, addr: SocketAddr) -> Self {
        self.media_addr = addr;
        self
    }

    /// Set the metadata producer address
    pub fn info_addr(mut self, addr: SocketAddr) -> Self {
        self.info_addr = addr;
        self
    }

    /// Set the consumer address
    pub fn consumer_addr(mut self, addr: SocketAddr) -> Self {
        self.consumer_addr = addr;
        self
    }

    /// Set the routed stream path
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Set the producer read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the per-consumer queue capacity
    pub fn consumer_queue_capacity(mut self, capacity: usize) -> Self {
        self.consumer_queue_capacity = capacity.max(1);
        self
    }

    /// Disable TCP_NODELAY
    pub fn disable_nodelay(mut self) -> Self {
        self.tcp_nodelay = false;
        self
    }
}
