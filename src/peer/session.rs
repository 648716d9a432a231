//! Peer session
//!
//! Binds one [`Negotiator`] to the signaling channel. Local payloads go out
//! through a [`SignalSink`], remote payloads are applied strictly in the
//! order they are handed to [`PeerSession::signal`], and the owner hears
//! about the lifecycle through [`SessionEvent`]s. Every terminal event is
//! delivered exactly once.

use super::negotiator::Negotiator;
use super::state::{Role, SessionState};
use super::types::{NegotiatorEvent, SessionEvent};
use crate::error::{Error, Result};
use crate::protocol::SignalPayload;
use crate::signaling::SignalSink;
use crate::utils::random_id;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type Stream<N> = <N as Negotiator>::Stream;

struct SessionInner<N: Negotiator> {
    id: String,
    role: Role,
    negotiator: N,
    state: Mutex<SessionState>,
    remote_stream: Mutex<Option<Stream<N>>>,
    sink: Arc<dyn SignalSink>,
    events: mpsc::UnboundedSender<SessionEvent<Stream<N>>>,
    // Serialises `start` and every `apply_signal`
    apply_lock: Arc<tokio::sync::Mutex<()>>,
}

impl<N: Negotiator> SessionInner<N> {
    fn state_guard(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn state(&self) -> SessionState {
        *self.state_guard()
    }

    fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state_guard();
        if state.can_transition_to(next) {
            debug!("Session {} {:?} -> {:?}", self.id, *state, next);
            *state = next;
            true
        } else {
            false
        }
    }

    fn notify(&self, event: SessionEvent<Stream<N>>) {
        let _ = self.events.send(event);
    }

    async fn fail(&self, reason: String) {
        if !self.transition(SessionState::Failed) {
            debug!("Session {} already finished, dropping error: {}", self.id, reason);
            return;
        }
        warn!("Session {} failed: {}", self.id, reason);
        self.notify(SessionEvent::Error(reason));
        if let Err(e) = self.negotiator.close().await {
            debug!("Closing failed session {}: {}", self.id, e);
        }
    }

    async fn close(&self) {
        if !self.transition(SessionState::Closed) {
            return;
        }
        info!("Session {} closed", self.id);
        if let Err(e) = self.negotiator.close().await {
            debug!("Closing session {}: {}", self.id, e);
        }
        self.notify(SessionEvent::Closed);
    }

    async fn handle(&self, event: NegotiatorEvent<Stream<N>>) {
        match event {
            NegotiatorEvent::Signal(payload) => {
                if self.state().is_terminal() {
                    debug!("Session {} finished, not forwarding local signal", self.id);
                    return;
                }
                if let Err(e) = self.sink.send_signal(payload) {
                    warn!("Session {} could not forward local signal: {}", self.id, e);
                }
            }
            NegotiatorEvent::Connected => {
                if self.transition(SessionState::Connected) {
                    info!("Session {} connected", self.id);
                    self.notify(SessionEvent::Connected);
                }
            }
            NegotiatorEvent::Stream(stream) => {
                if self.state().is_terminal() {
                    return;
                }
                let mut slot = self.remote_stream.lock().unwrap_or_else(|e| e.into_inner());
                if slot.is_none() {
                    *slot = Some(stream.clone());
                    drop(slot);
                    self.notify(SessionEvent::RemoteStream(stream));
                }
            }
            NegotiatorEvent::Failed(reason) => self.fail(reason).await,
            NegotiatorEvent::Closed => self.close().await,
        }
    }
}

/// One side's negotiation object plus its role and resulting stream.
///
/// Cloning yields another handle to the same session.
pub struct PeerSession<N: Negotiator> {
    inner: Arc<SessionInner<N>>,
}

impl<N: Negotiator> Clone for PeerSession<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<N: Negotiator> PeerSession<N> {
    /// Create the session and start negotiating.
    ///
    /// Returns the session and the receiver for its owner-facing events.
    pub async fn create(
        role: Role,
        negotiator: N,
        sink: Arc<dyn SignalSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent<Stream<N>>>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            id: random_id(),
            role,
            negotiator,
            state: Mutex::new(SessionState::Idle),
            remote_stream: Mutex::new(None),
            sink,
            events,
            apply_lock: Arc::new(tokio::sync::Mutex::new(())),
        });

        // Taken before the driver runs so early remote payloads queue behind `start`.
        let start_guard = Arc::clone(&inner.apply_lock).lock_owned().await;
        inner.transition(SessionState::Negotiating);
        info!("Session {} created as {:?}", inner.id, role);

        let driver = Arc::clone(&inner);
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let started = driver.negotiator.start(driver.role, tx).await;
            drop(start_guard);
            if let Err(e) = started {
                driver.fail(e.to_string()).await;
                return;
            }

            while let Some(event) = rx.recv().await {
                driver.handle(event).await;
                if driver.state().is_terminal() {
                    break;
                }
            }
            debug!("Session {} driver finished", driver.id);
        });

        (Self { inner }, events_rx)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state().is_terminal()
    }

    pub fn remote_stream(&self) -> Option<Stream<N>> {
        self.inner
            .remote_stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Feed one payload from the remote side.
    ///
    /// Payloads are applied in call order. A payload that cannot be applied
    /// fails the session.
    pub async fn signal(&self, payload: SignalPayload) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::SessionClosed);
        }
        let _guard = self.inner.apply_lock.lock().await;
        if self.is_destroyed() {
            return Err(Error::SessionClosed);
        }
        match self.inner.negotiator.apply_signal(payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// End the session. Calling it again is a no-op.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}
