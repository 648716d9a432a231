pub mod connection;
pub mod ice;
pub mod media;
pub mod negotiator;
pub mod session;
pub mod state;
pub mod types;

pub use connection::{RemoteStream, RtcNegotiator, RtcSessionFactory};
pub use media::{LocalTrack, MediaSource, SampleVideoSource};
pub use negotiator::{Negotiator, NegotiatorEvents, SessionFactory};
pub use session::PeerSession;
pub use state::{Role, SessionState};
pub use types::{IceCandidate, NegotiationPayload, NegotiatorEvent, SessionEvent};
