//! Signaling client
//!
//! Holds one WebSocket connection to the relay, sends `signal` frames and
//! hands relayed payloads to a registered handler in arrival order. The
//! client never reconnects on its own; transport loss is reported through
//! [`ConnectionState`] and the owner decides what to do.

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::protocol::{SignalPayload, WireMessage};
use crate::utils::to_ws_url;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub type SignalHandler = Arc<dyn Fn(SignalPayload) + Send + Sync>;

/// Anything a peer session can push its local signals into
pub trait SignalSink: Send + Sync + 'static {
    fn send_signal(&self, payload: SignalPayload) -> Result<()>;
}

impl SignalSink for mpsc::UnboundedSender<SignalPayload> {
    fn send_signal(&self, payload: SignalPayload) -> Result<()> {
        self.send(payload).map_err(|_| Error::NotConnected)
    }
}

struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    reader: JoinHandle<()>,
}

struct Inner {
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
    handler: Mutex<Option<SignalHandler>>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
    }

    fn link(&self) -> MutexGuard<'_, Option<Link>> {
        self.link.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handler(&self) -> Option<SignalHandler> {
        self.handler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Called by a reader task when its transport is gone
    fn transport_lost(&self, generation: u64) {
        let mut link = self.link();
        if link.as_ref().map(|l| l.generation) == Some(generation) {
            link.take();
            drop(link);
            info!("Disconnected from signaling server");
            self.set_state(ConnectionState::Disconnected);
        }
    }
}

/// Connection to the signaling relay. Cheap to clone.
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

impl SignalingClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                handler: Mutex::new(None),
                link: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Open the transport. Returns once the handshake completed.
    ///
    /// A no-op while already connected.
    pub async fn connect(&self) -> Result<()> {
        if self.inner.link().is_some() {
            return Ok(());
        }
        self.inner.config.validate()?;
        self.inner.set_state(ConnectionState::Connecting);

        let url = to_ws_url(&self.inner.config.relay_url)?;
        let mut request = url.as_str().into_client_request()?;
        if let Some(origin) = &self.inner.config.origin {
            let value = HeaderValue::from_str(origin)
                .map_err(|e| Error::InvalidConfig(format!("bad origin {origin}: {e}")))?;
            request.headers_mut().insert("origin", value);
        }

        let ws = match connect_async(request).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!("Could not reach signaling server at {}: {}", url, e);
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(Error::Transport(e.to_string()));
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut rx) = mpsc::unbounded_channel::<Message>();

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Hold the slot until the link is stored so a reader that dies
        // immediately still finds its own generation there.
        let mut slot = self.inner.link();
        let inner = Arc::clone(&self.inner);
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match WireMessage::decode(&text) {
                        Ok(message) => match inner.handler() {
                            Some(handler) => handler(message.into_payload()),
                            None => debug!("Dropping signal, no handler registered"),
                        },
                        Err(e) => debug!("Ignoring unrecognised frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Signaling transport error: {}", e);
                        break;
                    }
                }
            }
            inner.transport_lost(generation);
        });

        *slot = Some(Link {
            generation,
            outbound,
            reader,
        });
        info!("Connected to signaling server at {}", url);
        self.inner.set_state(ConnectionState::Connected);
        Ok(())
    }

    /// Hand a payload to the relay for forwarding. Fire-and-forget.
    pub fn send_signal(&self, payload: SignalPayload) -> Result<()> {
        let text = WireMessage::Signal(payload).encode()?;
        let link = self.inner.link();
        let link = link.as_ref().ok_or(Error::NotConnected)?;
        link.outbound
            .send(Message::Text(text))
            .map_err(|_| Error::NotConnected)
    }

    /// Register the callback for relayed payloads, replacing any previous one
    pub fn on_signal<F>(&self, handler: F)
    where
        F: Fn(SignalPayload) + Send + Sync + 'static,
    {
        *self.inner.handler.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Tear down the transport. Safe to call any number of times.
    pub fn disconnect(&self) {
        let Some(link) = self.inner.link().take() else {
            return;
        };
        let _ = link.outbound.send(Message::Close(None));
        link.reader.abort();
        debug!("Signaling client disconnected by owner");
        self.inner.set_state(ConnectionState::Disconnected);
    }
}

impl SignalSink for SignalingClient {
    fn send_signal(&self, payload: SignalPayload) -> Result<()> {
        SignalingClient::send_signal(self, payload)
    }
}
