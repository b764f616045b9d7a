//! WebRTC implementation of the session transport
//!
//! One [`RtcSession`] wraps one `RTCPeerConnection`. The factory owns the
//! shared API object (media engine with default codecs plus the default
//! interceptor chain) so every session negotiates the same capabilities.

use super::{SessionTransport, TransportEvent, TransportFactory, TransportState};
use crate::media::{TrackKind, TrackRef};
use crate::signaling::CandidatePayload;
use crate::{Error, ParticipantId, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::TrackLocal;

/// Opens WebRTC-backed session transports
pub struct RtcTransportFactory {
    api: API,
    stun_servers: Vec<String>,
}

impl RtcTransportFactory {
    /// Build the factory
    ///
    /// # Arguments
    ///
    /// * `stun_servers` - STUN server URLs applied to every session
    pub fn new(stun_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::Transport(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::Transport(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        Ok(Self { api, stun_servers })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn open(
        &self,
        peer: &ParticipantId,
        events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    ) -> Result<Arc<dyn SessionTransport>> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.rtc_config())
                .await
                .map_err(|e| Error::Transport(format!("Failed to create peer connection: {}", e)))?,
        );

        let candidate_peer = peer.clone();
        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let peer = candidate_peer.clone();
            let events = candidate_events.clone();

            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };

                match candidate.to_json() {
                    Ok(json) => {
                        let payload = CandidatePayload {
                            candidate: json.candidate,
                            sdp_mid: json.sdp_mid,
                            sdp_mline_index: json.sdp_mline_index,
                        };
                        if events
                            .send((peer, TransportEvent::Candidate(payload)))
                            .await
                            .is_err()
                        {
                            debug!("Transport event receiver dropped");
                        }
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                }
            })
        }));

        let state_peer = peer.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer = state_peer.clone();
            let events = events.clone();

            Box::pin(async move {
                debug!("Peer {} connection state: {}", peer, state);
                let mapped = map_state(state);
                if events
                    .send((peer, TransportEvent::StateChanged(mapped)))
                    .await
                    .is_err()
                {
                    debug!("Transport event receiver dropped");
                }
            })
        }));

        Ok(Arc::new(RtcSession {
            pc,
            pending_offer: Mutex::new(None),
            audio_sender: Mutex::new(None),
            video_sender: Mutex::new(None),
        }))
    }
}

fn map_state(state: RTCPeerConnectionState) -> TransportState {
    match state {
        RTCPeerConnectionState::Unspecified | RTCPeerConnectionState::New => TransportState::New,
        RTCPeerConnectionState::Connecting => TransportState::Connecting,
        RTCPeerConnectionState::Connected => TransportState::Connected,
        RTCPeerConnectionState::Disconnected => TransportState::Disconnected,
        RTCPeerConnectionState::Failed => TransportState::Failed,
        RTCPeerConnectionState::Closed => TransportState::Closed,
    }
}

/// One WebRTC peer connection plus its outbound sender slots
///
/// A created offer is held in `pending_offer` and installed as the local
/// description only once the matching answer arrives. Until then the
/// connection stays in the stable signaling state, so a colliding remote
/// offer can be applied directly; the underlying stack cannot roll back a
/// local offer.
pub struct RtcSession {
    pc: Arc<RTCPeerConnection>,
    pending_offer: Mutex<Option<RTCSessionDescription>>,
    audio_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
}

#[async_trait]
impl SessionTransport for RtcSession {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create offer: {}", e)))?;

        let sdp = offer.sdp.clone();
        *self.pending_offer.lock() = Some(offer);

        Ok(sdp)
    }

    async fn apply_remote_offer(&self, sdp: String) -> Result<()> {
        // A not-yet-answered local offer lost the collision; drop it so
        // the remote offer applies from the stable state.
        if self.pending_offer.lock().take().is_some() {
            debug!("Discarding pending local offer for colliding remote offer");
        }

        let desc = RTCSessionDescription::offer(sdp)
            .map_err(|e| Error::Transport(format!("Malformed remote offer: {}", e)))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set remote offer: {}", e)))
    }

    async fn create_answer(&self) -> Result<String> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Transport(format!("Failed to create answer: {}", e)))?;

        let sdp = answer.sdp.clone();
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set local answer: {}", e)))?;

        Ok(sdp)
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<()> {
        let offer = self
            .pending_offer
            .lock()
            .take()
            .ok_or_else(|| Error::Transport("No pending local offer to answer".to_string()))?;

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set local offer: {}", e)))?;

        let desc = RTCSessionDescription::answer(sdp)
            .map_err(|e| Error::Transport(format!("Malformed remote answer: {}", e)))?;

        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| Error::Transport(format!("Failed to set remote answer: {}", e)))
    }

    async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            ..Default::default()
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Transport(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_track(&self, track: &TrackRef) -> Result<()> {
        let sender = self
            .pc
            .add_track(Arc::clone(track.local()) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::Transport(format!("Failed to add track: {}", e)))?;

        match track.kind() {
            TrackKind::Audio => *self.audio_sender.lock() = Some(sender),
            TrackKind::Video => *self.video_sender.lock() = Some(sender),
        }

        Ok(())
    }

    async fn replace_video_track(&self, track: &TrackRef) -> Result<()> {
        let sender = self.video_sender.lock().clone();

        match sender {
            Some(sender) => sender
                .replace_track(Some(
                    Arc::clone(track.local()) as Arc<dyn TrackLocal + Send + Sync>
                ))
                .await
                .map_err(|e| Error::Transport(format!("Failed to replace video track: {}", e))),
            None => self.attach_track(track).await,
        }
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| Error::Transport(format!("Failed to close peer connection: {}", e)))
    }
}
