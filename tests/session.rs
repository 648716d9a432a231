//! Peer session lifecycle driven by a scripted negotiator

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use teleop_relay_lib::peer::{NegotiatorEvent, PeerSession, Role, SessionEvent, SessionState};
use teleop_relay_lib::{Error, SignalSink};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

type Events = mpsc::UnboundedReceiver<SessionEvent<String>>;

async fn session(
    role: Role,
    negotiator: ScriptedNegotiator,
) -> (PeerSession<ScriptedNegotiator>, Events, mpsc::UnboundedReceiver<Value>) {
    init_logging();
    let (sink_tx, sink_rx) = mpsc::unbounded_channel::<Value>();
    let sink: Arc<dyn SignalSink> = Arc::new(sink_tx);
    let (session, events) = PeerSession::create(role, negotiator, sink).await;
    (session, events, sink_rx)
}

async fn started(negotiator: &ScriptedNegotiator) {
    wait_until(|| negotiator.is_started()).await;
}

#[tokio::test]
async fn test_initiator_offer_goes_out_through_sink() {
    let negotiator = ScriptedNegotiator::new();
    let (session, _events, mut outbound) = session(Role::Initiator, negotiator.clone()).await;

    assert_eq!(session.role(), Role::Initiator);
    assert_eq!(session.state(), SessionState::Negotiating);
    let offer = recv_within(&mut outbound).await;
    assert_eq!(offer["type"], "offer");
}

#[tokio::test]
async fn test_failure_after_connect_is_reported_once() {
    let negotiator = ScriptedNegotiator::new();
    let (session, mut events, mut outbound) = session(Role::Responder, negotiator.clone()).await;
    started(&negotiator).await;

    negotiator.emit(NegotiatorEvent::Connected);
    assert!(matches!(recv_within(&mut events).await, SessionEvent::Connected));
    assert_eq!(session.state(), SessionState::Connected);

    negotiator.emit(NegotiatorEvent::Failed("ICE failed".into()));
    match recv_within(&mut events).await {
        SessionEvent::Error(reason) => assert_eq!(reason, "ICE failed"),
        other => panic!("Expected an error event, got {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.is_destroyed());

    // Nothing more leaves a failed session
    negotiator.emit(NegotiatorEvent::Signal(json!({"type": "candidate"})));
    negotiator.emit(NegotiatorEvent::Failed("again".into()));
    session.close().await;
    assert_silent(&mut events).await;
    assert_silent(&mut outbound).await;
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(negotiator.close_count(), 1);
}

#[tokio::test]
async fn test_close_twice_reports_closed_once() {
    let negotiator = ScriptedNegotiator::new();
    let (session, mut events, _outbound) = session(Role::Initiator, negotiator.clone()).await;
    started(&negotiator).await;

    session.close().await;
    session.close().await;

    assert!(matches!(recv_within(&mut events).await, SessionEvent::Closed));
    assert_silent(&mut events).await;
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(negotiator.close_count(), 1);

    let err = session.signal(json!({"type": "answer"})).await.unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
    assert!(negotiator.applied().is_empty());
}

#[tokio::test]
async fn test_negotiator_close_ends_session() {
    let negotiator = ScriptedNegotiator::new();
    let (session, mut events, _outbound) = session(Role::Responder, negotiator.clone()).await;
    started(&negotiator).await;

    negotiator.emit(NegotiatorEvent::Closed);
    assert!(matches!(recv_within(&mut events).await, SessionEvent::Closed));
    assert_eq!(session.state(), SessionState::Closed);

    session.close().await;
    assert_silent(&mut events).await;
}

#[tokio::test]
async fn test_remote_payloads_apply_in_order_after_start() {
    let negotiator = ScriptedNegotiator::slow(Duration::from_millis(5));
    let (session, _events, _outbound) = session(Role::Responder, negotiator.clone()).await;

    // Issued before the driver may have started; must still land after `start`
    assert_ok!(session.signal(json!({"type": "candidate", "seq": 0})).await);
    assert!(negotiator.is_started());

    for seq in 1..10 {
        assert_ok!(session.signal(json!({"type": "candidate", "seq": seq})).await);
    }
    let seqs: Vec<i64> = negotiator
        .applied()
        .iter()
        .map(|p| p["seq"].as_i64().unwrap())
        .collect();
    assert_eq!(seqs, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_concurrent_signals_are_serialised() {
    let negotiator = ScriptedNegotiator::slow(Duration::from_millis(20));
    let (session, _events, _outbound) = session(Role::Responder, negotiator.clone()).await;
    started(&negotiator).await;

    let (a, b) = tokio::join!(
        session.signal(json!({"type": "candidate", "seq": 1})),
        session.signal(json!({"type": "candidate", "seq": 2})),
    );
    assert_ok!(a);
    assert_ok!(b);
    assert_eq!(negotiator.applied().len(), 2);
}

#[tokio::test]
async fn test_offer_yields_answer_connection_and_stream() {
    let negotiator = ScriptedNegotiator::new();
    let (session, mut events, mut outbound) = session(Role::Responder, negotiator.clone()).await;

    assert_ok!(session.signal(json!({"type": "offer", "sdp": "fake-offer"})).await);

    assert_eq!(recv_within(&mut outbound).await["type"], "answer");
    assert!(matches!(recv_within(&mut events).await, SessionEvent::Connected));
    match recv_within(&mut events).await {
        SessionEvent::RemoteStream(stream) => assert_eq!(stream, "remote-camera"),
        other => panic!("Expected the remote stream, got {:?}", other),
    }

    // A second stream for the same session is not announced
    negotiator.emit(NegotiatorEvent::Stream("second-camera".into()));
    assert_silent(&mut events).await;
    assert_eq!(session.remote_stream().as_deref(), Some("remote-camera"));
}

#[tokio::test]
async fn test_unapplicable_payload_fails_session() {
    let negotiator = ScriptedNegotiator::new();
    let (session, mut events, _outbound) = session(Role::Responder, negotiator.clone()).await;

    let err = session.signal(json!({"type": "broken"})).await.unwrap_err();
    assert!(matches!(err, Error::Negotiation(_)));
    assert!(matches!(recv_within(&mut events).await, SessionEvent::Error(_)));
    assert_eq!(session.state(), SessionState::Failed);

    assert_err!(session.signal(json!({"type": "offer"})).await);
    assert_eq!(negotiator.applied().len(), 1);
}

#[tokio::test]
async fn test_start_failure_fails_session() {
    let negotiator = ScriptedNegotiator::failing_start();
    let (session, mut events, mut outbound) = session(Role::Initiator, negotiator.clone()).await;

    assert!(matches!(recv_within(&mut events).await, SessionEvent::Error(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_silent(&mut outbound).await;
}

#[tokio::test]
async fn test_sessions_negotiate_across_relay() {
    let relay = start_relay().await;
    let (caller_client, mut caller_inbox) = connected_client(&relay).await;
    let (callee_client, mut callee_inbox) = connected_client(&relay).await;
    wait_for_connections(&relay, 2).await;

    let callee_negotiator = ScriptedNegotiator::new();
    let (callee, mut callee_events) = PeerSession::create(
        Role::Responder,
        callee_negotiator.clone(),
        Arc::new(callee_client.clone()),
    )
    .await;
    let (caller, mut caller_events) = PeerSession::create(
        Role::Initiator,
        ScriptedNegotiator::new(),
        Arc::new(caller_client.clone()),
    )
    .await;

    let offer = recv_within(&mut callee_inbox).await;
    assert_ok!(callee.signal(offer).await);
    let answer = recv_within(&mut caller_inbox).await;
    assert_ok!(caller.signal(answer).await);

    assert!(matches!(recv_within(&mut caller_events).await, SessionEvent::Connected));
    assert!(matches!(recv_within(&mut callee_events).await, SessionEvent::Connected));
    assert!(matches!(
        recv_within(&mut callee_events).await,
        SessionEvent::RemoteStream(_)
    ));
    assert_eq!(caller.state(), SessionState::Connected);
    assert_eq!(callee.state(), SessionState::Connected);
    assert_eq!(callee_negotiator.applied()[0]["sdp"], "fake-offer");
}
