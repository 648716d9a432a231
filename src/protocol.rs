//! Relay wire protocol
//!
//! Every WebSocket text frame carries exactly one JSON object of the form
//! `{"event":"signal","data":<payload>}`. The payload is opaque to the relay
//! and is forwarded byte-for-byte equivalent.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque negotiation payload carried by a `signal` event
pub type SignalPayload = Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum WireMessage {
    /// client→relay: "relay this to my peer"; relay→client: "this came from your peer"
    Signal(SignalPayload),
}

impl WireMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn into_payload(self) -> SignalPayload {
        match self {
            WireMessage::Signal(payload) => payload,
        }
    }
}
