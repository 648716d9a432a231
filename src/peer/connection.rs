//! `webrtc`-backed negotiator
//!
//! Trickle ICE is off: a local description is only emitted once candidate
//! gathering has finished, so each side sends a single offer or answer.

use super::ice::{rtc_config, PendingCandidates};
use super::media::{LocalTrack, MediaSource};
use super::negotiator::{Negotiator, NegotiatorEvents, SessionFactory};
use super::state::Role;
use super::types::{NegotiationPayload, NegotiatorEvent};
use crate::config::{IceServerConfig, GRACE_PERIOD};
use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::protocol::SignalPayload;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

/// Remote media delivered by a completed negotiation
#[derive(Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track: Arc<TrackRemote>,
}

type Events = NegotiatorEvents<RemoteStream>;

pub struct RtcNegotiator {
    ice_servers: Vec<IceServerConfig>,
    local_tracks: Vec<LocalTrack>,
    grace_period: Duration,
    pc: Mutex<Option<Arc<RTCPeerConnection>>>,
    events: Mutex<Option<Events>>,
    pending: PendingCandidates,
    disconnect_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RtcNegotiator {
    pub fn new(ice_servers: Vec<IceServerConfig>, local_tracks: Vec<LocalTrack>) -> Self {
        Self {
            ice_servers,
            local_tracks,
            grace_period: GRACE_PERIOD,
            pc: Mutex::new(None),
            events: Mutex::new(None),
            pending: PendingCandidates::default(),
            disconnect_task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn peer(&self) -> Result<Arc<RTCPeerConnection>> {
        self.pc
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| Error::Negotiation("peer connection not started".into()))
    }

    fn emit(&self, event: NegotiatorEvent<RemoteStream>) {
        if let Some(events) = self.events.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            let _ = events.send(event);
        }
    }

    async fn build_peer(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Arc::new(
            api.new_peer_connection(rtc_config(&self.ice_servers)).await?,
        ))
    }

    fn install_handlers(&self, pc: &Arc<RTCPeerConnection>, events: Events) {
        pc.on_ice_candidate(Box::new(|cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => dump_candidate("LOCAL", &c),
                None => debug!("ICE candidate gathering completed"),
            }
            Box::pin(async {})
        }));

        let stream_seen = Arc::new(AtomicBool::new(false));
        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                if !stream_seen.swap(true, Ordering::SeqCst) {
                    info!("Remote track {} on stream {}", track.id(), track.stream_id());
                    let _ = track_events.send(NegotiatorEvent::Stream(RemoteStream {
                        stream_id: track.stream_id(),
                        track,
                    }));
                }
                Box::pin(async {})
            },
        ));

        let weak_pc: Weak<RTCPeerConnection> = Arc::downgrade(pc);
        let disconnect_task = Arc::clone(&self.disconnect_task);
        let grace_period = self.grace_period;
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);
            let mut pending = disconnect_task.lock().unwrap_or_else(|e| e.into_inner());

            match st {
                RTCPeerConnectionState::Connected => {
                    if let Some(handle) = pending.take() {
                        info!("Peer link recovered during grace period");
                        handle.abort();
                    }
                    let _ = events.send(NegotiatorEvent::Connected);
                }
                RTCPeerConnectionState::Disconnected => {
                    if pending.is_some() {
                        return Box::pin(async {});
                    }
                    let Some(pc) = weak_pc.upgrade() else {
                        return Box::pin(async {});
                    };
                    warn!("Peer link disconnected, waiting {} s", grace_period.as_secs());
                    let events = events.clone();
                    *pending = Some(tokio::spawn(async move {
                        dump_selected_pair(&pc, "BEFORE-FAIL").await;
                        sleep(grace_period).await;
                        if pc.connection_state() != RTCPeerConnectionState::Connected {
                            let _ = events.send(NegotiatorEvent::Failed(
                                "peer link lost and did not recover".into(),
                            ));
                        }
                    }));
                }
                RTCPeerConnectionState::Failed => {
                    if let Some(handle) = pending.take() {
                        handle.abort();
                    }
                    let _ = events.send(NegotiatorEvent::Failed("ICE connection failed".into()));
                }
                RTCPeerConnectionState::Closed => {
                    if let Some(handle) = pending.take() {
                        handle.abort();
                    }
                    let _ = events.send(NegotiatorEvent::Closed);
                }
                _ => {}
            }
            Box::pin(async {})
        }));
    }

    /// Set the local description, wait for gathering and emit it
    async fn publish_local(&self, pc: &RTCPeerConnection, desc: RTCSessionDescription) -> Result<()> {
        let mut gather_complete = pc.gathering_complete_promise().await;
        pc.set_local_description(desc).await?;
        let _ = gather_complete.recv().await;

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::Negotiation("local description missing".into()))?;
        let payload = match local.sdp_type {
            RTCSdpType::Offer => NegotiationPayload::Offer { sdp: local.sdp },
            RTCSdpType::Answer => NegotiationPayload::Answer { sdp: local.sdp },
            other => {
                return Err(Error::Negotiation(format!(
                    "unexpected local description type {other}"
                )))
            }
        };
        self.emit(NegotiatorEvent::Signal(payload.into_signal()?));
        Ok(())
    }
}

#[async_trait]
impl Negotiator for RtcNegotiator {
    type Stream = RemoteStream;

    async fn start(&self, role: Role, events: Events) -> Result<()> {
        let pc = self.build_peer().await?;
        self.install_handlers(&pc, events.clone());
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = Some(events);
        *self.pc.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&pc));

        for track in &self.local_tracks {
            let sender = pc.add_track(Arc::clone(track)).await?;
            // RTCP has to be drained for the interceptors to work
            tokio::spawn(async move {
                let mut rtcp_buf = vec![0u8; 1500];
                while sender.read(&mut rtcp_buf).await.is_ok() {}
            });
        }

        if role.is_initiator() {
            if self.local_tracks.is_empty() {
                // An offer needs at least one m-line
                pc.create_data_channel("teleop", None).await?;
            }
            let offer = pc.create_offer(None).await?;
            self.publish_local(&pc, offer).await?;
            info!("Offer published");
        }
        Ok(())
    }

    async fn apply_signal(&self, payload: SignalPayload) -> Result<()> {
        let pc = self.peer()?;
        match NegotiationPayload::from_signal(payload)? {
            NegotiationPayload::Offer { sdp } => {
                pc.set_remote_description(RTCSessionDescription::offer(sdp)?)
                    .await?;
                self.pending.apply(&pc).await;
                let answer = pc.create_answer(None).await?;
                self.publish_local(&pc, answer).await?;
                info!("Answer published");
            }
            NegotiationPayload::Answer { sdp } => {
                pc.set_remote_description(RTCSessionDescription::answer(sdp)?)
                    .await?;
                self.pending.apply(&pc).await;
                info!("Remote answer applied");
            }
            NegotiationPayload::Candidate { candidate } => {
                if pc.remote_description().await.is_some() {
                    pc.add_ice_candidate(candidate.into()).await?;
                } else {
                    self.pending.push(candidate);
                }
            }
            NegotiationPayload::Unsupported => {
                debug!("Ignoring unsupported negotiation payload");
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(handle) = self
            .disconnect_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        self.pending.clear();
        let pc = self.pc.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(pc) = pc {
            pc.close().await?;
        }
        Ok(())
    }
}

/// Creates [`RtcNegotiator`]s, attaching local media when a source is set
pub struct RtcSessionFactory {
    ice_servers: Vec<IceServerConfig>,
    media: Option<Arc<dyn MediaSource>>,
    tracks: Mutex<Vec<LocalTrack>>,
}

impl RtcSessionFactory {
    pub fn new(ice_servers: Vec<IceServerConfig>, media: Option<Arc<dyn MediaSource>>) -> Self {
        Self {
            ice_servers,
            media,
            tracks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SessionFactory for RtcSessionFactory {
    type Negotiator = RtcNegotiator;

    async fn prepare(&self) -> Result<()> {
        if let Some(media) = &self.media {
            let tracks = media.acquire().await?;
            *self.tracks.lock().unwrap_or_else(|e| e.into_inner()) = tracks;
        }
        Ok(())
    }

    async fn negotiator(&self) -> Result<RtcNegotiator> {
        for server in &self.ice_servers {
            server.validate()?;
        }
        let tracks = self.tracks.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(RtcNegotiator::new(self.ice_servers.clone(), tracks))
    }

    async fn release(&self) {
        self.tracks.lock().unwrap_or_else(|e| e.into_inner()).clear();
        if let Some(media) = &self.media {
            media.release().await;
        }
    }
}
