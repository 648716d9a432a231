//! Error types for the relay, signaling client and peer sessions

/// Result type alias using the crate [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while relaying or negotiating
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Relay unreachable or the transport dropped
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation needs a live signaling connection
    #[error("Not connected to signaling server")]
    NotConnected,

    /// Peer-connection negotiation failed or a payload could not be applied
    #[error("Negotiation error: {0}")]
    Negotiation(String),

    /// Camera or other local media could not be acquired
    #[error("Media unavailable: {0}")]
    MediaUnavailable(String),

    /// Owner-requested retries used up
    #[error("Giving up after {0} retries")]
    RetriesExhausted(u32),

    /// Session was already closed or failed
    #[error("Session closed")]
    SessionClosed,

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtc(#[from] webrtc::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the owner may recover by trying again from scratch
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::NotConnected
                | Error::WebSocket(_)
                | Error::MediaUnavailable(_)
                | Error::Io(_)
        )
    }

    /// Whether the error ends the peer session it happened in
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::Negotiation(_) | Error::WebRtc(_) | Error::SessionClosed
        )
    }
}
