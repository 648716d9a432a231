use crate::config::{IceServerConfig, IceServerKind};
use crate::error::{Error, Result};
use rand::Rng;

/// Opaque 16-hex-digit identifier
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefix the ICE server URL with its scheme if the user left it out
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
    {
        config.url.clone()
    } else {
        let scheme = match config.kind {
            IceServerKind::Turn => "turn:",
            IceServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

/// Relay addresses are usually written as page URLs (`http://host:3001`);
/// the transport needs the WebSocket scheme.
pub fn to_ws_url(relay_url: &str) -> Result<String> {
    let url = relay_url.trim();
    if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else if url.is_empty() || url.contains("://") {
        Err(Error::InvalidConfig(format!(
            "unsupported relay address: {relay_url}"
        )))
    } else {
        Ok(format!("ws://{url}"))
    }
}
