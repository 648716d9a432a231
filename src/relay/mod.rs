pub mod registry;
pub mod server;

pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use server::{RelayHandle, RelayServer};
