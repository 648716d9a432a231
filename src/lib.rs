pub mod config;
pub mod endpoint;
pub mod error;
pub mod logger;
pub mod peer;
pub mod protocol;
pub mod relay;
pub mod retry;
pub mod signaling;
pub mod utils;

pub use config::{ClientConfig, IceServerConfig, RelayConfig};
pub use endpoint::{Endpoint, EndpointStatus, Side};
pub use error::{Error, Result};
pub use protocol::{SignalPayload, WireMessage};
pub use relay::{RelayHandle, RelayServer};
pub use signaling::{ConnectionState, SignalSink, SignalingClient};
