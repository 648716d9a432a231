//! Owner of one signaling client and one peer session
//!
//! Models a page on either end of the camera link. The sender acquires its
//! camera before any signaling starts; the receiver hands the remote stream
//! to whoever registered [`Endpoint::on_remote_stream`]. Progress is exposed
//! as human-readable status, and recovery only happens through an explicit
//! [`Endpoint::retry`].

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::peer::negotiator::{Negotiator, SessionFactory};
use crate::peer::session::PeerSession;
use crate::peer::state::Role;
use crate::peer::types::SessionEvent;
use crate::retry::ReconnectionPolicy;
use crate::signaling::{ConnectionState, SignalingClient};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

type Stream<F> = <<F as SessionFactory>::Negotiator as Negotiator>::Stream;
type StreamHandler<S> = Arc<dyn Fn(S) + Send + Sync>;

/// Which end of the camera link this endpoint is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Mobile page holding the camera
    Sender,
    /// Desktop page feeding the tracking pipeline
    Receiver,
}

impl Side {
    pub fn role(self) -> Role {
        match self {
            Side::Sender => Role::Initiator,
            Side::Receiver => Role::Responder,
        }
    }
}

/// What a page would show the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointStatus {
    pub message: String,
    pub error: Option<String>,
    pub retry_available: bool,
    pub signaling_connected: bool,
    pub streaming: bool,
}

struct ActiveLink<N: Negotiator> {
    client: SignalingClient,
    session: PeerSession<N>,
    pump: JoinHandle<()>,
    watcher: JoinHandle<()>,
    events: JoinHandle<()>,
}

impl<N: Negotiator> ActiveLink<N> {
    fn stop(&self) {
        self.pump.abort();
        self.watcher.abort();
        self.events.abort();
        self.client.disconnect();
    }
}

type LinkSlot<N> = Arc<Mutex<Option<ActiveLink<N>>>>;

fn lock_slot<N: Negotiator>(slot: &LinkSlot<N>) -> MutexGuard<'_, Option<ActiveLink<N>>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tear down the link of a session that ended on its own.
///
/// Runs on the link's event task, so that task is left to finish by itself.
async fn finish_link<F: SessionFactory>(
    slot: &LinkSlot<F::Negotiator>,
    session_id: &str,
    factory: &F,
    status: &watch::Sender<EndpointStatus>,
) {
    let link = {
        let mut guard = lock_slot(slot);
        let current = guard
            .as_ref()
            .is_some_and(|link| link.session.id() == session_id);
        if current {
            guard.take()
        } else {
            None
        }
    };
    let Some(link) = link else {
        return;
    };
    link.pump.abort();
    link.watcher.abort();
    link.client.disconnect();
    factory.release().await;
    status.send_modify(|s| {
        s.signaling_connected = false;
        s.streaming = false;
        s.retry_available = true;
    });
    debug!("Session {} finished, endpoint ready to start again", session_id);
}

pub struct Endpoint<F: SessionFactory> {
    side: Side,
    config: ClientConfig,
    factory: Arc<F>,
    policy: ReconnectionPolicy,
    attempts: Arc<AtomicU32>,
    status: Arc<watch::Sender<EndpointStatus>>,
    stream_handler: Arc<Mutex<Option<StreamHandler<Stream<F>>>>>,
    link: LinkSlot<F::Negotiator>,
    // Held across `start` and `shutdown` so only one link is ever built
    lifecycle: tokio::sync::Mutex<()>,
}

fn set_status(status: &watch::Sender<EndpointStatus>, message: &str) {
    status.send_modify(|s| s.message = message.to_string());
}

fn set_error(status: &watch::Sender<EndpointStatus>, message: &str, error: String) {
    warn!("{}: {}", message, error);
    status.send_modify(|s| {
        s.message = message.to_string();
        s.error = Some(error);
        s.retry_available = true;
        s.streaming = false;
    });
}

impl<F: SessionFactory> Endpoint<F> {
    pub fn new(side: Side, config: ClientConfig, factory: F) -> Self {
        let initial = EndpointStatus {
            message: "Initializing...".to_string(),
            ..Default::default()
        };
        let (status, _) = watch::channel(initial);
        Self {
            side,
            config,
            factory: Arc::new(factory),
            policy: ReconnectionPolicy::default(),
            attempts: Arc::new(AtomicU32::new(0)),
            status: Arc::new(status),
            stream_handler: Arc::new(Mutex::new(None)),
            link: Arc::new(Mutex::new(None)),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn status(&self) -> EndpointStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<EndpointStatus> {
        self.status.subscribe()
    }

    /// Called once per successful negotiation with the remote stream
    pub fn on_remote_stream<H>(&self, handler: H)
    where
        H: Fn(Stream<F>) + Send + Sync + 'static,
    {
        *self
            .stream_handler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    fn link(&self) -> MutexGuard<'_, Option<ActiveLink<F::Negotiator>>> {
        lock_slot(&self.link)
    }

    /// The live session, if any
    pub fn session(&self) -> Option<PeerSession<F::Negotiator>> {
        self.link().as_ref().map(|l| l.session.clone())
    }

    pub fn signaling_state(&self) -> ConnectionState {
        self.link()
            .as_ref()
            .map(|l| l.client.state())
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Acquire media, connect to the relay and create the session.
    ///
    /// A no-op while a live session exists. Once the session has closed or
    /// failed, builds a fresh one.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        let stale = {
            let mut link = self.link();
            match link.as_ref().map(|active| active.session.is_destroyed()) {
                Some(true) => link.take(),
                Some(false) => return Ok(()),
                None => None,
            }
        };
        if let Some(stale) = stale {
            stale.stop();
            self.factory.release().await;
        }

        self.status.send_modify(|s| {
            s.message = match self.side {
                Side::Sender => "Accessing camera...",
                Side::Receiver => "Preparing receiver...",
            }
            .to_string();
            s.error = None;
            s.retry_available = false;
        });
        if let Err(e) = self.factory.prepare().await {
            set_error(&self.status, "Camera access failed", format!("Camera Error: {e}"));
            return Err(e);
        }

        set_status(
            &self.status,
            match self.side {
                Side::Sender => "Camera ready, connecting to peer...",
                Side::Receiver => "Waiting for camera connection...",
            },
        );

        // Relayed payloads queue here until the session exists
        let client = SignalingClient::new(self.config.clone());
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        client.on_signal(move |payload| {
            let _ = signal_tx.send(payload);
        });

        if let Err(e) = client.connect().await {
            self.factory.release().await;
            set_error(&self.status, "Could not reach signaling server", e.to_string());
            return Err(e);
        }
        self.status.send_modify(|s| {
            s.message = "Connected to signaling server".to_string();
            s.signaling_connected = true;
        });

        let negotiator = match self.factory.negotiator().await {
            Ok(negotiator) => negotiator,
            Err(e) => {
                client.disconnect();
                self.factory.release().await;
                set_error(&self.status, "WebRTC error", format!("WebRTC Error: {e}"));
                return Err(e);
            }
        };
        let (session, mut events) =
            PeerSession::create(self.side.role(), negotiator, Arc::new(client.clone())).await;

        let pump_session = session.clone();
        let pump = tokio::spawn(async move {
            while let Some(payload) = signal_rx.recv().await {
                if let Err(e) = pump_session.signal(payload).await {
                    debug!("Relayed signal not applied: {}", e);
                }
            }
        });

        let mut states = client.subscribe_state();
        let status = Arc::clone(&self.status);
        let watcher = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = *states.borrow_and_update();
                if state == ConnectionState::Disconnected {
                    status.send_modify(|s| {
                        s.message = "Disconnected from signaling server".to_string();
                        s.signaling_connected = false;
                        s.retry_available = true;
                    });
                }
            }
        });

        let side = self.side;
        let status = Arc::clone(&self.status);
        let handler = Arc::clone(&self.stream_handler);
        let factory = Arc::clone(&self.factory);
        let attempts = Arc::clone(&self.attempts);
        let slot = Arc::clone(&self.link);
        let session_id = session.id().to_string();
        // The event task may tear the link down, so it only runs once the link is stored
        let mut link = self.link();
        let event_task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SessionEvent::Connected => {
                        attempts.store(0, Ordering::SeqCst);
                        status.send_modify(|s| {
                            s.message = match side {
                                Side::Sender => "Streaming to peer",
                                Side::Receiver => "Peer connected",
                            }
                            .to_string();
                            s.streaming = side == Side::Sender;
                        });
                    }
                    SessionEvent::RemoteStream(stream) => {
                        let callback = handler.lock().unwrap_or_else(|e| e.into_inner()).clone();
                        if let Some(callback) = callback {
                            callback(stream);
                        }
                        status.send_modify(|s| {
                            s.message = "Receiving video stream".to_string();
                            s.streaming = true;
                        });
                    }
                    SessionEvent::Error(e) => {
                        finish_link(&slot, &session_id, &*factory, &status).await;
                        set_error(&status, "WebRTC error", format!("WebRTC Error: {e}"));
                        break;
                    }
                    SessionEvent::Closed => {
                        finish_link(&slot, &session_id, &*factory, &status).await;
                        status.send_modify(|s| {
                            s.message = "WebRTC connection closed".to_string();
                        });
                        break;
                    }
                }
            }
        });

        info!("Endpoint started as {:?}, session {}", self.side, session.id());
        *link = Some(ActiveLink {
            client,
            session,
            pump,
            watcher,
            events: event_task,
        });
        Ok(())
    }

    /// Close the session, stop local media and leave the relay.
    ///
    /// Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let link = self.link().take();
        let Some(link) = link else {
            return;
        };
        link.stop();
        link.session.close().await;
        self.factory.release().await;
        self.status.send_modify(|s| {
            s.signaling_connected = false;
            s.streaming = false;
        });
        debug!("Endpoint shut down");
    }

    /// Throw everything away and start from scratch after a backoff delay
    pub async fn retry(&self) -> Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.policy.should_retry(attempt) {
            self.status.send_modify(|s| s.retry_available = false);
            return Err(Error::RetriesExhausted(attempt));
        }

        self.status.send_modify(|s| {
            s.error = None;
            s.retry_available = false;
            s.message = "Retrying...".to_string();
        });
        self.shutdown().await;

        let delay = self.policy.calculate_backoff(attempt);
        info!("Retry {} in {:?}", attempt + 1, delay);
        sleep(delay).await;
        self.start().await
    }
}
