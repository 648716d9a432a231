use super::state::Role;
use super::types::NegotiatorEvent;
use crate::error::Result;
use crate::protocol::SignalPayload;
use async_trait::async_trait;
use tokio::sync::mpsc;

pub type NegotiatorEvents<S> = mpsc::UnboundedSender<NegotiatorEvent<S>>;

/// The peer-connection object a session drives.
///
/// Implementations report everything asynchronous (local payloads, link
/// state, remote media) through the events channel handed to `start`.
#[async_trait]
pub trait Negotiator: Send + Sync + 'static {
    /// Remote media handle delivered once negotiation succeeds
    type Stream: Clone + Send + Sync + 'static;

    /// Set up the connection. An initiator emits its offer from here.
    async fn start(&self, role: Role, events: NegotiatorEvents<Self::Stream>) -> Result<()>;

    /// Apply one payload received from the remote side
    async fn apply_signal(&self, payload: SignalPayload) -> Result<()>;

    /// Release the connection. Must tolerate repeated calls.
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh negotiator for every session an owner creates
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Negotiator: Negotiator;

    /// Acquire local media. Runs before any signaling happens.
    async fn prepare(&self) -> Result<()>;

    async fn negotiator(&self) -> Result<Self::Negotiator>;

    /// Stop local media
    async fn release(&self);
}
