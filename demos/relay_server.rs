//! Relay Server - Segment-aligned fan-out of a live media feed
//!
//! Run with: cargo run --example relay_server -- [host]
//!
//! Feed it with two producers, for example an encoder writing WebM to the
//! media port and a muxer side-channel writing boundary records to the
//! info port:
//!
//! ```text
//!   encoder ──media bytes──> :7001 ┐
//!                                   ├─> StreamSink ──> :7003 consumers
//!   muxer ───JSON records──> :7002 ┘
//! ```
//!
//! Each info line looks like `{"event":"MEDIA_SEGMENT_START","offset":123456}`.
//! Watch a stream with e.g. `nc localhost 7003 > out.webm`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use segcast::{ServerConfig, StreamingServer};

fn print_usage() {
    println!("Usage: relay_server [host]");
    println!();
    println!("Arguments:");
    println!("  host    Address to bind all three listeners on (default: 127.0.0.1)");
    println!();
    println!("Ports: 7001 media, 7002 info, 7003 consumers");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let host: IpAddr = match args.get(1) {
        Some(host) => host.parse()?,
        None => IpAddr::from([127, 0, 0, 1]),
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("segcast=debug".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let config = ServerConfig::default()
        .media_addr(SocketAddr::new(host, 7001))
        .info_addr(SocketAddr::new(host, 7002))
        .consumer_addr(SocketAddr::new(host, 7003));

    let server = StreamingServer::new(config).start().await?;

    println!("media producer:    tcp://{}", server.media_addr());
    println!("info producer:     tcp://{}", server.info_addr());
    println!("consumers:         tcp://{}", server.consumer_addr());
    println!();
    println!("Press Ctrl+C to stop");

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let stats = server.stats();
                tracing::info!(
                    sessions = stats.sessions,
                    failed_sessions = stats.failed_sessions,
                    active_consumers = stats.active_consumers,
                    "Server stats"
                );
            }
        }
    }

    println!("Shutting down...");
    server.close().await;
    Ok(())
}
