//! Signaling relay entry point
//!
//! ```bash
//! # Defaults: 0.0.0.0:3001, dev-page origins, credentials on
//! teleop-relay
//!
//! # Custom port and origins
//! teleop-relay --port 4000 \
//!   --allowed-origins http://localhost:5173,http://10.0.0.5:5173
//! ```

use clap::Parser;
use teleop_relay_lib::config::{
    RelayConfig, DEFAULT_ALLOWED_ORIGINS, DEFAULT_RELAY_HOST, DEFAULT_RELAY_PORT,
};
use teleop_relay_lib::{logger, RelayServer};
use tracing::{error, info};

/// Forwards `signal` frames between the connected camera pages
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Interface to bind
    #[arg(long, default_value = DEFAULT_RELAY_HOST, env = "RELAY_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_RELAY_PORT, env = "RELAY_PORT")]
    port: u16,

    /// Browser origins allowed to connect (comma-separated, `*` for any)
    #[arg(long, value_delimiter = ',', env = "RELAY_ALLOWED_ORIGINS")]
    allowed_origins: Vec<String>,

    /// Send Access-Control-Allow-Credentials on accepted handshakes
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "RELAY_ALLOW_CREDENTIALS")]
    allow_credentials: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> RelayConfig {
        let allowed_origins = if self.allowed_origins.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
        } else {
            self.allowed_origins
        };
        RelayConfig {
            host: self.host,
            port: self.port,
            allowed_origins,
            allow_credentials: self.allow_credentials,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logger::init(args.log_level.as_deref());

    let config = args.into_config();
    let server = match RelayServer::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start signaling relay: {}", e);
            std::process::exit(1);
        }
    };

    match server.local_addr() {
        Ok(addr) => info!("Signaling server running on port {}", addr.port()),
        Err(e) => error!("Could not read bound address: {}", e),
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    if let Err(e) = server.run_until(shutdown).await {
        error!("Signaling relay stopped with error: {}", e);
        std::process::exit(1);
    }
}
