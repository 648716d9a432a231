use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::info;
use webrtc::api::media_engine::MIME_TYPE_VP8;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

pub type LocalTrack = Arc<dyn TrackLocal + Send + Sync>;

/// Local camera (or other capture device) feeding an initiator session
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    /// Open the device. Errors carry a human-readable cause.
    async fn acquire(&self) -> Result<Vec<LocalTrack>>;

    /// Stop every track handed out by `acquire`
    async fn release(&self);
}

/// One VP8 video track whose samples are written by the capture pipeline
pub struct SampleVideoSource {
    stream_id: String,
    track: Mutex<Option<Arc<TrackLocalStaticSample>>>,
}

impl SampleVideoSource {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            track: Mutex::new(None),
        }
    }

    /// The live track, for writing samples into
    pub fn track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.track.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MediaSource for SampleVideoSource {
    async fn acquire(&self) -> Result<Vec<LocalTrack>> {
        if self.stream_id.is_empty() {
            return Err(Error::MediaUnavailable("no capture stream selected".into()));
        }
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            "video".to_owned(),
            self.stream_id.clone(),
        ));
        *self.track.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&track));
        info!("Camera track ready on stream {}", self.stream_id);
        Ok(vec![track as LocalTrack])
    }

    async fn release(&self) {
        if self
            .track
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .is_some()
        {
            info!("Camera track on stream {} stopped", self.stream_id);
        }
    }
}
