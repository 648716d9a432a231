use crate::error::{Error, Result};
use crate::protocol::SignalPayload;
use serde::{Deserialize, Serialize};

/// What the negotiation object reports back to its session
#[derive(Debug, Clone, PartialEq)]
pub enum NegotiatorEvent<S> {
    /// Local payload that must reach the remote side verbatim
    Signal(SignalPayload),
    Connected,
    Stream(S),
    Failed(String),
    Closed,
}

/// What a session reports to its owner
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent<S> {
    Connected,
    RemoteStream(S),
    /// Terminal failure; the session is already destroyed
    Error(String),
    Closed,
}

/// ICE candidate in the browser's JSON shape
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

/// Negotiation payloads as browser peer libraries exchange them
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NegotiationPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
    /// Renegotiation requests and other payloads this side does not act on
    #[serde(other)]
    Unsupported,
}

impl NegotiationPayload {
    pub fn from_signal(payload: SignalPayload) -> Result<Self> {
        serde_json::from_value(payload)
            .map_err(|e| Error::Negotiation(format!("malformed signal payload: {e}")))
    }

    pub fn into_signal(self) -> Result<SignalPayload> {
        Ok(serde_json::to_value(self)?)
    }
}
