//! In-process test doubles for the mesh coordinator
//!
//! Everything the coordinator touches through a trait gets a scripted
//! double here: the signaling relay, the capture devices, and the session
//! transports. Tests drive the relay side by injecting `SignalEvent`s and
//! observe the coordinator through the messages it sends and the notices
//! it emits.

#![allow(dead_code)]

use async_trait::async_trait;
use meshcall::config::{MediaConstraints, MeshConfig};
use meshcall::error::{DeviceError, ScreenShareError};
use meshcall::media::{MediaDevices, ScreenCapture, TrackKind, TrackRef, TrackSource};
use meshcall::registry::ParticipantMeta;
use meshcall::signaling::{
    CandidatePayload, ClientMessage, MemberInfo, SignalEvent, SignalingClient,
};
use meshcall::transport::{
    SessionTransport, TransportEvent, TransportFactory, TransportState,
};
use meshcall::{Error, MeshCoordinator, MeshHandle, MeshNotice, ParticipantId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

const WAIT: Duration = Duration::from_secs(1);
const SETTLE: Duration = Duration::from_millis(100);

/// Build an in-memory track of the given kind
pub fn test_track(kind: TrackKind, source: TrackSource) -> TrackRef {
    let mime = match kind {
        TrackKind::Audio => MIME_TYPE_OPUS,
        TrackKind::Video => MIME_TYPE_VP8,
    };
    let local = Arc::new(TrackLocalStaticSample::new(
        RTCRtpCodecCapability {
            mime_type: mime.to_owned(),
            ..Default::default()
        },
        "test".to_owned(),
        "meshcall-test".to_owned(),
    ));
    TrackRef::new(kind, source, local)
}

/// Relay double: records every outbound message
pub struct MockSignaling {
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl MockSignaling {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ClientMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl SignalingClient for MockSignaling {
    async fn send(&self, msg: ClientMessage) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| Error::Signaling("test relay closed".to_string()))
    }
}

/// Capture device double with switchable failure modes
#[derive(Default)]
pub struct MockDevices {
    pub deny_camera: AtomicBool,
    pub deny_microphone: AtomicBool,
    pub deny_screen: AtomicBool,
    screen_ended: Mutex<Option<oneshot::Sender<()>>>,
}

impl MockDevices {
    /// Simulate the platform ending the active screen share
    pub fn end_screen_share(&self) {
        if let Some(tx) = self.screen_ended.lock().take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl MediaDevices for MockDevices {
    async fn open_camera(&self) -> std::result::Result<TrackRef, DeviceError> {
        if self.deny_camera.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        Ok(test_track(TrackKind::Video, TrackSource::Camera))
    }

    async fn open_microphone(&self) -> std::result::Result<TrackRef, DeviceError> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(DeviceError::PermissionDenied);
        }
        Ok(test_track(TrackKind::Audio, TrackSource::Microphone))
    }

    async fn open_screen(&self) -> std::result::Result<ScreenCapture, ScreenShareError> {
        if self.deny_screen.load(Ordering::SeqCst) {
            return Err(ScreenShareError::Denied);
        }
        let (tx, rx) = oneshot::channel();
        *self.screen_ended.lock() = Some(tx);
        Ok(ScreenCapture {
            track: test_track(TrackKind::Video, TrackSource::Screen),
            ended: rx,
        })
    }
}

/// Session transport double: scripted SDP, full call log
pub struct MockTransport {
    peer: ParticipantId,
    pub events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    offers: AtomicUsize,
    pub applied: Mutex<Vec<String>>,
    pub candidates: Mutex<Vec<String>>,
    pub attached: AtomicUsize,
    pub video_replacements: Mutex<Vec<TrackSource>>,
    pub closed: AtomicBool,
}

impl MockTransport {
    fn new(peer: ParticipantId, events: mpsc::Sender<(ParticipantId, TransportEvent)>) -> Self {
        Self {
            peer,
            events,
            offers: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            attached: AtomicUsize::new(0),
            video_replacements: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn candidate_lines(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    /// Push a connectivity change as if it came from the ICE stack
    pub async fn push_state(&self, state: TransportState) {
        self.events
            .send((self.peer.clone(), TransportEvent::StateChanged(state)))
            .await
            .expect("coordinator gone");
    }

    /// Push a locally gathered candidate
    pub async fn push_candidate(&self, line: &str) {
        let payload = CandidatePayload {
            candidate: line.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        self.events
            .send((self.peer.clone(), TransportEvent::Candidate(payload)))
            .await
            .expect("coordinator gone");
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn create_offer(&self) -> Result<String> {
        let n = self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(format!("offer-{}-{}", self.peer, n))
    }

    async fn apply_remote_offer(&self, sdp: String) -> Result<()> {
        self.applied.lock().push(format!("offer:{}", sdp));
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        Ok(format!("answer-{}", self.peer))
    }

    async fn apply_remote_answer(&self, sdp: String) -> Result<()> {
        self.applied.lock().push(format!("answer:{}", sdp));
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        self.candidates.lock().push(candidate.candidate);
        Ok(())
    }

    async fn attach_track(&self, _track: &TrackRef) -> Result<()> {
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_video_track(&self, track: &TrackRef) -> Result<()> {
        self.video_replacements.lock().push(track.source());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory double: remembers every transport it opened
#[derive(Default)]
pub struct MockFactory {
    transports: Mutex<HashMap<ParticipantId, Arc<MockTransport>>>,
}

impl MockFactory {
    pub fn transport(&self, peer: &str) -> Arc<MockTransport> {
        self.transports
            .lock()
            .get(&ParticipantId::from(peer))
            .cloned()
            .unwrap_or_else(|| panic!("no transport opened for {}", peer))
    }

    pub fn opened(&self) -> usize {
        self.transports.lock().len()
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn open(
        &self,
        peer: &ParticipantId,
        events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    ) -> Result<Arc<dyn SessionTransport>> {
        let transport = Arc::new(MockTransport::new(peer.clone(), events));
        self.transports.lock().insert(peer.clone(), transport.clone());
        Ok(transport)
    }
}

/// A room member as the relay would report it on join
pub fn member(id: &str, name: &str) -> MemberInfo {
    MemberInfo {
        id: ParticipantId::from(id),
        meta: ParticipantMeta {
            display_name: name.to_string(),
            ..Default::default()
        },
    }
}

/// One coordinator wired to doubles, plus every observation point
pub struct TestMesh {
    pub handle: MeshHandle,
    pub notices: mpsc::Receiver<MeshNotice>,
    pub sent: mpsc::UnboundedReceiver<ClientMessage>,
    pub events: mpsc::Sender<SignalEvent>,
    pub factory: Arc<MockFactory>,
    pub devices: Arc<MockDevices>,
}

impl TestMesh {
    /// Spawn a coordinator against fresh doubles and consume its JoinRoom
    pub async fn start() -> Self {
        Self::start_with(MockDevices::default()).await
    }

    pub async fn start_with(devices: MockDevices) -> Self {
        let config = MeshConfig {
            room: "R1".to_string(),
            display_name: "alice".to_string(),
            constraints: MediaConstraints {
                video: true,
                audio: true,
            },
            ..Default::default()
        };

        let (signaling, sent) = MockSignaling::new();
        let (event_tx, event_rx) = mpsc::channel(64);
        let devices = Arc::new(devices);
        let factory = Arc::new(MockFactory::default());

        let (coordinator, handle, notices) = MeshCoordinator::new(
            config,
            signaling,
            event_rx,
            devices.clone(),
            factory.clone(),
        )
        .expect("valid test config");
        tokio::spawn(coordinator.run());

        let mut mesh = Self {
            handle,
            notices,
            sent,
            events: event_tx,
            factory,
            devices,
        };

        match mesh.next_sent().await {
            ClientMessage::JoinRoom { room, .. } => assert_eq!(room, "R1"),
            other => panic!("expected JoinRoom first, got {:?}", other),
        }
        mesh
    }

    /// Deliver the relay's join acknowledgment
    pub async fn joined_as(&self, self_id: &str, members: Vec<MemberInfo>) {
        self.events
            .send(SignalEvent::RoomJoined {
                self_id: ParticipantId::from(self_id),
                members,
            })
            .await
            .expect("coordinator gone");
    }

    pub async fn deliver(&self, event: SignalEvent) {
        self.events.send(event).await.expect("coordinator gone");
    }

    /// Next outbound relay message, or panic after a second
    pub async fn next_sent(&mut self) -> ClientMessage {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for a relay message")
            .expect("relay channel closed")
    }

    /// Assert the coordinator stays quiet on the relay
    pub async fn assert_no_sent(&mut self) {
        if let Ok(Some(msg)) = tokio::time::timeout(SETTLE, self.sent.recv()).await {
            panic!("unexpected relay message: {:?}", msg);
        }
    }

    /// Next notice matching the predicate, skipping the rest
    pub async fn expect_notice<F>(&mut self, mut pred: F) -> MeshNotice
    where
        F: FnMut(&MeshNotice) -> bool,
    {
        loop {
            let notice = tokio::time::timeout(WAIT, self.notices.recv())
                .await
                .expect("timed out waiting for a notice")
                .expect("notice channel closed");
            if pred(&notice) {
                return notice;
            }
        }
    }

    /// Let in-flight events settle
    pub async fn settle(&self) {
        tokio::time::sleep(SETTLE).await;
    }
}
