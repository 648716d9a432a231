//! Shared harness for the integration tests
//!
//! Spins up a relay on an ephemeral port and provides a scripted negotiator
//! so sessions and endpoints can be driven without a real peer connection.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use teleop_relay_lib::config::{ClientConfig, RelayConfig};
use teleop_relay_lib::peer::{
    NegotiatorEvent, Negotiator, NegotiatorEvents, Role, SessionFactory,
};
use teleop_relay_lib::{Error, RelayHandle, RelayServer, Result, SignalingClient};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(300);

pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn local_relay_config() -> RelayConfig {
    RelayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..Default::default()
    }
}

pub async fn start_relay() -> RelayHandle {
    start_relay_with(local_relay_config()).await
}

pub async fn start_relay_with(config: RelayConfig) -> RelayHandle {
    init_logging();
    RelayServer::bind(config)
        .await
        .expect("Failed to bind relay")
        .spawn()
        .expect("Failed to spawn relay")
}

/// Poll `condition` until it holds or [`WAIT`] runs out
pub async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "Condition not met within {:?}", WAIT);
        sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_connections(relay: &RelayHandle, expected: usize) {
    wait_until(|| relay.connection_count() == expected).await;
}

/// Client whose relayed payloads land in the returned receiver
pub async fn connected_client(relay: &RelayHandle) -> (SignalingClient, mpsc::UnboundedReceiver<Value>) {
    let client = SignalingClient::new(ClientConfig::new(relay.url()));
    let (tx, rx) = mpsc::unbounded_channel();
    client.on_signal(move |payload| {
        let _ = tx.send(payload);
    });
    client.connect().await.expect("Failed to connect to relay");
    (client, rx)
}

pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    timeout(WAIT, rx.recv())
        .await
        .expect("Timeout waiting for message")
        .expect("Channel closed")
}

/// Asserts nothing arrives on `rx` for a short while
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(unexpected)) = timeout(QUIET, rx.recv()).await {
        panic!("Unexpected message: {:?}", unexpected);
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    timeout(WAIT, future).await.expect("Timeout")
}

struct ScriptState {
    events: Mutex<Option<NegotiatorEvents<String>>>,
    applied: Mutex<Vec<Value>>,
    started: AtomicBool,
    closes: AtomicUsize,
    fail_start: bool,
    apply_delay: Option<Duration>,
}

/// Negotiator that follows a fixed offer/answer script.
///
/// * an initiator emits `{"type":"offer"}` from `start`
/// * applying an offer emits an answer, `Connected` and a `remote-camera` stream
/// * applying an answer emits `Connected`
/// * applying `{"type":"broken"}` fails
///
/// Tests can also push arbitrary events with [`ScriptedNegotiator::emit`].
#[derive(Clone)]
pub struct ScriptedNegotiator {
    state: Arc<ScriptState>,
}

impl ScriptedNegotiator {
    pub fn new() -> Self {
        Self::build(false, None)
    }

    pub fn failing_start() -> Self {
        Self::build(true, None)
    }

    /// Every apply sleeps first, so out-of-order completion would show
    pub fn slow(delay: Duration) -> Self {
        Self::build(false, Some(delay))
    }

    fn build(fail_start: bool, apply_delay: Option<Duration>) -> Self {
        Self {
            state: Arc::new(ScriptState {
                events: Mutex::new(None),
                applied: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
                fail_start,
                apply_delay,
            }),
        }
    }

    pub fn is_started(&self) -> bool {
        self.state.started.load(Ordering::SeqCst)
    }

    pub fn applied(&self) -> Vec<Value> {
        self.state.applied.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: NegotiatorEvent<String>) {
        if let Some(events) = self.state.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

#[async_trait]
impl Negotiator for ScriptedNegotiator {
    type Stream = String;

    async fn start(&self, role: Role, events: NegotiatorEvents<String>) -> Result<()> {
        if self.state.fail_start {
            return Err(Error::Negotiation("no peer connection".into()));
        }
        if role.is_initiator() {
            let _ = events.send(NegotiatorEvent::Signal(json!({"type": "offer", "sdp": "fake-offer"})));
        }
        *self.state.events.lock().unwrap() = Some(events);
        self.state.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn apply_signal(&self, payload: Value) -> Result<()> {
        if let Some(delay) = self.state.apply_delay {
            sleep(delay).await;
        }
        self.state.applied.lock().unwrap().push(payload.clone());
        match payload["type"].as_str() {
            Some("offer") => {
                self.emit(NegotiatorEvent::Signal(json!({"type": "answer", "sdp": "fake-answer"})));
                self.emit(NegotiatorEvent::Connected);
                self.emit(NegotiatorEvent::Stream("remote-camera".to_string()));
            }
            Some("answer") => self.emit(NegotiatorEvent::Connected),
            Some("broken") => return Err(Error::Negotiation("cannot apply payload".into())),
            _ => {}
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory handing out [`ScriptedNegotiator`]s, optionally with no camera
pub struct ScriptedFactory {
    camera_available: bool,
    prepared: AtomicUsize,
    released: Arc<AtomicUsize>,
    created: Arc<Mutex<Vec<ScriptedNegotiator>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self {
            camera_available: true,
            prepared: AtomicUsize::new(0),
            released: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn without_camera() -> Self {
        Self {
            camera_available: false,
            ..Self::new()
        }
    }

    /// Shared view of the negotiators created so far
    pub fn created(&self) -> Arc<Mutex<Vec<ScriptedNegotiator>>> {
        Arc::clone(&self.created)
    }

    pub fn released(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.released)
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    type Negotiator = ScriptedNegotiator;

    async fn prepare(&self) -> Result<()> {
        self.prepared.fetch_add(1, Ordering::SeqCst);
        if self.camera_available {
            Ok(())
        } else {
            Err(Error::MediaUnavailable("permission denied".into()))
        }
    }

    async fn negotiator(&self) -> Result<ScriptedNegotiator> {
        let negotiator = ScriptedNegotiator::new();
        self.created.lock().unwrap().push(negotiator.clone());
        Ok(negotiator)
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
