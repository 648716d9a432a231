// Relay and client configuration.
// Log verbosity defaults differ between debug and release builds.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(debug_assertions)]
pub const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Port the relay listens on unless told otherwise
pub const DEFAULT_RELAY_PORT: u16 = 3001;

pub const DEFAULT_RELAY_HOST: &str = "0.0.0.0";

pub const DEFAULT_RELAY_URL: &str = "http://localhost:3001";

/// Origins of the dev pages that may open a relay connection
pub const DEFAULT_ALLOWED_ORIGINS: [&str; 3] = [
    "http://localhost:5173",
    "http://192.168.137.1:5173",
    "http://192.168.0.112:5173",
];

/// How long a disconnected peer link may stay down before it is declared failed
pub const GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Delay before the first owner-requested retry
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Public STUN endpoints used when nothing else is configured
pub static DEFAULT_ICE_SERVERS: Lazy<Vec<IceServerConfig>> = Lazy::new(|| {
    vec![
        IceServerConfig::stun("default-stun", "stun:stun.l.google.com:19302"),
        IceServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
    ]
});

/// Relay process settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    /// Browser origins allowed to connect. `*` allows any origin.
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RELAY_HOST.to_string(),
            port: DEFAULT_RELAY_PORT,
            allowed_origins: DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|o| o.to_string())
                .collect(),
            allow_credentials: true,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether a browser handshake from `origin` may proceed
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed.trim_end_matches('/') == origin)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("relay host cannot be empty".into()));
        }
        if self.allow_credentials && self.allowed_origins.iter().any(|o| o == "*") {
            return Err(Error::InvalidConfig(
                "wildcard origin cannot be combined with credentials".into(),
            ));
        }
        Ok(())
    }
}

/// Signaling client and peer-session settings for one page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay address, `http(s)://` or `ws(s)://`
    pub relay_url: String,
    /// Sent as the handshake `Origin` header when set
    pub origin: Option<String>,
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            origin: None,
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
        }
    }
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            ..Default::default()
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_url.trim().is_empty() {
            return Err(Error::InvalidConfig("relay url cannot be empty".into()));
        }
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceServerKind {
    Stun,
    Turn,
}

/// One STUN/TURN endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IceServerKind,
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: IceServerKind::Stun,
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        id: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: IceServerKind::Turn,
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "ICE server {} has an empty url",
                self.id
            )));
        }
        if self.kind == IceServerKind::Turn
            && (self.username.is_none() || self.credential.is_none())
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server {} requires username and credential",
                self.id
            )));
        }
        Ok(())
    }
}
