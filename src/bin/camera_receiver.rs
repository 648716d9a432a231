//! Desktop-side camera receiver
//!
//! Connects to the relay as the responder, waits for the camera page's offer
//! and logs what arrives on the remote track.
//!
//! ```bash
//! camera-receiver --relay http://192.168.0.112:3001
//! ```

use clap::Parser;
use std::sync::Arc;
use teleop_relay_lib::config::{ClientConfig, IceServerConfig, DEFAULT_RELAY_URL};
use teleop_relay_lib::peer::{RemoteStream, RtcSessionFactory};
use teleop_relay_lib::{logger, Endpoint, Side};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay address
    #[arg(long, default_value = DEFAULT_RELAY_URL, env = "TELEOP_RELAY_URL")]
    relay: String,

    /// Origin header to present to the relay
    #[arg(long, env = "TELEOP_ORIGIN")]
    origin: Option<String>,

    /// STUN servers (comma-separated)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302,stun:stun1.l.google.com:19302"
    )]
    stun_servers: Vec<String>,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

fn watch_track(stream: RemoteStream) {
    tokio::spawn(async move {
        info!(
            "Receiving {} track {} on stream {}",
            stream.track.kind(),
            stream.track.id(),
            stream.stream_id
        );
        let mut packets: u64 = 0;
        let mut bytes: u64 = 0;
        while let Ok((packet, _)) = stream.track.read_rtp().await {
            packets += 1;
            bytes += packet.payload.len() as u64;
            if packets % 500 == 0 {
                info!("{} RTP packets, {} payload bytes", packets, bytes);
            }
        }
        info!("Remote track ended after {} packets", packets);
    });
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logger::init(args.log_level.as_deref());

    let ice_servers: Vec<IceServerConfig> = args
        .stun_servers
        .iter()
        .enumerate()
        .map(|(i, url)| IceServerConfig::stun(format!("stun-{i}"), url.clone()))
        .collect();
    let mut config = ClientConfig::new(args.relay).with_ice_servers(ice_servers.clone());
    if let Some(origin) = args.origin {
        config = config.with_origin(origin);
    }

    let endpoint = Arc::new(Endpoint::new(
        Side::Receiver,
        config,
        RtcSessionFactory::new(ice_servers, None),
    ));
    endpoint.on_remote_stream(watch_track);

    let mut status = endpoint.subscribe_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            match &current.error {
                Some(e) => warn!("Status: {} ({})", current.message, e),
                None => info!("Status: {}", current.message),
            }
        }
    });

    let mut started = endpoint.start().await;
    while let Err(e) = started {
        if !e.is_retryable() {
            error!("Receiver cannot start: {}", e);
            return;
        }
        started = endpoint.retry().await;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    endpoint.shutdown().await;
}
