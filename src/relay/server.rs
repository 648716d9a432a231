//! WebSocket relay server
//!
//! Accepts WebSocket connections, registers each one in the shared
//! [`ConnectionRegistry`] and forwards every `signal` frame to all other
//! registered connections. A failing connection only ends its own task; the
//! accept loop and the registry are never affected.

use super::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::protocol::WireMessage;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Signaling relay bound to a TCP port
pub struct RelayServer {
    config: Arc<RelayConfig>,
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
}

impl RelayServer {
    /// Bind the listener. Port 0 picks a free port.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.bind_addr()).await?;
        info!(
            "Signaling relay bound on {} (allowed origins: {:?})",
            listener.local_addr()?,
            config.allowed_origins
        );
        Ok(Self {
            config: Arc::new(config),
            listener,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run the accept loop until `shutdown` resolves.
    ///
    /// Open connections are sent a close frame on shutdown.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let (close_tx, close_rx) = watch::channel(false);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("Accepted TCP connection from {}", peer_addr);
                            let config = Arc::clone(&self.config);
                            let registry = Arc::clone(&self.registry);
                            let close_rx = close_rx.clone();
                            tokio::spawn(async move {
                                if let Err(e) =
                                    handle_connection(stream, peer_addr, config, registry, close_rx).await
                                {
                                    warn!("Connection from {} ended with error: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Signaling relay shutting down");
                    break;
                }
            }
        }

        let _ = close_tx.send(true);
        Ok(())
    }

    /// Run the relay on a background task
    pub fn spawn(self) -> Result<RelayHandle> {
        let addr = self.local_addr()?;
        let registry = self.registry();
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(self.run_until(async move {
            let _ = shutdown_rx.await;
        }));
        Ok(RelayHandle {
            addr,
            registry,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Handle to a relay running on a background task
pub struct RelayHandle {
    addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<JoinHandle<Result<()>>>,
}

impl RelayHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://` address clients can connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Stop accepting and close open connections
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| Error::Transport(format!("relay task panicked: {e}")))?,
            None => Ok(()),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Origin policy for the upgrade request.
///
/// Requests without an `Origin` header are not from a browser and pass.
fn check_origin(
    config: &RelayConfig,
    request: &Request,
    response: &mut Response,
) -> std::result::Result<Option<String>, ErrorResponse> {
    let Some(origin) = request.headers().get("origin") else {
        return Ok(None);
    };
    let Ok(origin) = origin.to_str() else {
        return Err(reject(StatusCode::BAD_REQUEST, "malformed origin"));
    };
    if !config.origin_allowed(origin) {
        return Err(reject(StatusCode::FORBIDDEN, "origin not allowed"));
    }

    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(origin) {
        headers.insert("access-control-allow-origin", value);
    }
    if config.allow_credentials {
        headers.insert(
            "access-control-allow-credentials",
            HeaderValue::from_static("true"),
        );
    }
    Ok(Some(origin.to_string()))
}

fn reject(status: StatusCode, reason: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason.to_string()));
    *response.status_mut() = status;
    response
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<RelayConfig>,
    registry: Arc<ConnectionRegistry>,
    mut close_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut origin = None;
    let ws = accept_hdr_async(stream, |request: &Request, mut response: Response| {
        match check_origin(&config, request, &mut response) {
            Ok(allowed) => {
                origin = allowed;
                Ok(response)
            }
            Err(rejection) => {
                warn!(
                    "Rejected handshake from {}: {:?}",
                    peer_addr,
                    rejection.body()
                );
                Err(rejection)
            }
        }
    })
    .await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let outbound = tx.clone();
    let connection = Connection::new(Some(peer_addr), origin, tx);
    let id = connection.id.clone();
    let open = registry.register(connection);
    info!("Client {} connected from {} ({} open)", id, peer_addr, open);

    let (mut sink, stream) = ws.split();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let result = tokio::select! {
        result = read_loop(&id, stream, &registry) => result,
        _ = close_rx.wait_for(|closed| *closed) => {
            let _ = outbound.send(Message::Close(None));
            Ok(())
        }
    };

    registry.unregister(&id);
    info!("Client {} disconnected ({} open)", id, registry.len());
    result
}

async fn read_loop(
    id: &ConnectionId,
    mut stream: SplitStream<WebSocketStream<TcpStream>>,
    registry: &ConnectionRegistry,
) -> Result<()> {
    while let Some(frame) = stream.next().await {
        match frame? {
            Message::Text(text) => match WireMessage::decode(&text) {
                Ok(WireMessage::Signal(_)) => {
                    let delivered = registry.broadcast_except(id, &Message::Text(text));
                    debug!("Relayed signal from {} to {} peer(s)", id, delivered);
                }
                Err(e) => {
                    debug!("Ignoring unrecognised frame from {}: {}", id, e);
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
