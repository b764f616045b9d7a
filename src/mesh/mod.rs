//! Mesh coordinator: the single event loop driving the whole call
//!
//! Everything that can mutate mesh state funnels through one task: relay
//! signal events, transport events (ICE candidates, connectivity changes),
//! media lifecycle events, and local user actions. The loop dispatches each
//! to the owning [`PeerConnection`](crate::peer::PeerConnection) or to the
//! [`MediaSource`], so per-peer operations are naturally serialized and no
//! callback ever re-enters mesh state.
//!
//! The application talks to a running coordinator through a cloneable
//! [`MeshHandle`] and observes it through a stream of [`MeshNotice`]s.

use crate::config::MeshConfig;
use crate::media::{MediaDevices, MediaEvent, MediaSource, TrackRef};
use crate::peer::{PeerConnection, PeerState, RemoteOfferOutcome};
use crate::registry::{ParticipantMeta, PeerRegistry};
use crate::signaling::{ClientMessage, MemberInfo, SignalEvent, SignalingClient, StateAnnounce};
use crate::transport::{TransportEvent, TransportFactory};
use crate::{Error, ParticipantId, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const ACTION_CHANNEL_CAPACITY: usize = 16;
const NOTICE_CHANNEL_CAPACITY: usize = 64;
const TRANSPORT_EVENT_CAPACITY: usize = 64;
const MEDIA_EVENT_CAPACITY: usize = 8;

/// User-initiated actions accepted by a running coordinator
#[derive(Debug)]
pub enum LocalAction {
    /// Flip the microphone
    ToggleMic,
    /// Flip the camera
    ToggleCamera,
    /// Replace outbound video with a screen capture
    StartScreenShare,
    /// Revert outbound video to the camera
    StopScreenShare,
    /// Request a roster snapshot
    Roster(oneshot::Sender<Vec<PeerInfo>>),
    /// Leave the room and tear everything down
    HangUp,
}

/// One roster entry
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// The peer's relay-assigned id
    pub id: ParticipantId,
    /// Lifecycle state of our connection to it
    pub state: PeerState,
    /// State the peer announced about itself
    pub meta: ParticipantMeta,
}

/// Observable mesh events, delivered to the application
#[derive(Debug, Clone)]
pub enum MeshNotice {
    /// Room membership granted
    Joined {
        /// Our relay-assigned id
        self_id: ParticipantId,
    },
    /// A remote participant entered the mesh
    PeerJoined {
        /// The new participant
        peer: ParticipantId,
        /// Its announced state
        meta: ParticipantMeta,
    },
    /// A remote participant left and its connection was closed
    PeerLeft {
        /// The departed participant
        peer: ParticipantId,
    },
    /// Our connection to a peer changed lifecycle state
    PeerStateChanged {
        /// The peer
        peer: ParticipantId,
        /// The new state
        state: PeerState,
    },
    /// A peer announced a mute/camera change
    PeerMetaChanged {
        /// The peer
        peer: ParticipantId,
        /// Its updated state
        meta: ParticipantMeta,
    },
    /// Local camera/microphone/screen state changed
    LocalMediaChanged {
        /// Camera flag
        camera: bool,
        /// Microphone flag
        mic: bool,
        /// Whether outbound video is the screen capture
        screen_share: bool,
    },
    /// A device could not be accessed; the call continues without it
    MediaError {
        /// Human-readable description
        message: String,
    },
    /// Current room population, as reported by the relay
    MemberCount {
        /// Number of members
        count: u32,
    },
    /// The session ended (hang-up or relay disconnect)
    Left,
}

/// Cloneable application-side handle to a running coordinator
#[derive(Clone)]
pub struct MeshHandle {
    actions: mpsc::Sender<LocalAction>,
}

impl MeshHandle {
    /// Flip the microphone
    pub async fn toggle_mic(&self) -> Result<()> {
        self.send(LocalAction::ToggleMic).await
    }

    /// Flip the camera
    pub async fn toggle_camera(&self) -> Result<()> {
        self.send(LocalAction::ToggleCamera).await
    }

    /// Replace outbound video with a screen capture
    pub async fn start_screen_share(&self) -> Result<()> {
        self.send(LocalAction::StartScreenShare).await
    }

    /// Revert outbound video to the camera
    pub async fn stop_screen_share(&self) -> Result<()> {
        self.send(LocalAction::StopScreenShare).await
    }

    /// Current roster: every remote peer with connection state and meta
    pub async fn roster(&self) -> Result<Vec<PeerInfo>> {
        let (tx, rx) = oneshot::channel();
        self.send(LocalAction::Roster(tx)).await?;
        rx.await
            .map_err(|_| Error::Internal("Coordinator stopped".to_string()))
    }

    /// Leave the room and stop the coordinator
    pub async fn hang_up(&self) -> Result<()> {
        self.send(LocalAction::HangUp).await
    }

    async fn send(&self, action: LocalAction) -> Result<()> {
        self.actions
            .send(action)
            .await
            .map_err(|_| Error::Internal("Coordinator stopped".to_string()))
    }
}

/// The mesh event loop; consumed by [`run`](MeshCoordinator::run)
pub struct MeshCoordinator {
    config: MeshConfig,
    signaling: Arc<dyn SignalingClient>,
    signal_events: mpsc::Receiver<SignalEvent>,

    factory: Arc<dyn TransportFactory>,
    transport_tx: mpsc::Sender<(ParticipantId, TransportEvent)>,
    transport_events: mpsc::Receiver<(ParticipantId, TransportEvent)>,

    media: MediaSource,
    media_events: mpsc::Receiver<MediaEvent>,

    actions: mpsc::Receiver<LocalAction>,
    notices: mpsc::Sender<MeshNotice>,

    registry: Option<Arc<PeerRegistry>>,

    /// Announced state from peers not yet registered; a newcomer's
    /// announcement can arrive ahead of the offer that registers it.
    pending_meta: HashMap<ParticipantId, ParticipantMeta>,
}

impl MeshCoordinator {
    /// Build a coordinator
    ///
    /// Returns the coordinator (to be spawned via [`run`](Self::run)), the
    /// application handle, and the notice stream.
    ///
    /// # Arguments
    ///
    /// * `config` - validated before anything is created
    /// * `signaling` - outbound half of the relay connection
    /// * `signal_events` - inbound half of the relay connection
    /// * `devices` - platform capture devices
    /// * `factory` - opens one transport per peer
    pub fn new(
        config: MeshConfig,
        signaling: Arc<dyn SignalingClient>,
        signal_events: mpsc::Receiver<SignalEvent>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn TransportFactory>,
    ) -> Result<(Self, MeshHandle, mpsc::Receiver<MeshNotice>)> {
        config.validate()?;

        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CHANNEL_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);
        let (media_tx, media_rx) = mpsc::channel(MEDIA_EVENT_CAPACITY);

        let coordinator = Self {
            config,
            signaling,
            signal_events,
            factory,
            transport_tx,
            transport_events: transport_rx,
            media: MediaSource::new(devices, media_tx),
            media_events: media_rx,
            actions: action_rx,
            notices: notice_tx,
            registry: None,
            pending_meta: HashMap::new(),
        };

        Ok((coordinator, MeshHandle { actions: action_tx }, notice_rx))
    }

    /// Run the event loop until hang-up or relay disconnect
    pub async fn run(mut self) {
        match self.media.acquire(self.config.constraints).await {
            Ok(state) => {
                debug!(
                    "Local media ready: camera={}, mic={}",
                    state.camera_enabled, state.mic_enabled
                );
            }
            Err(e) => {
                warn!("Could not acquire local media: {}", e);
                self.notify(MeshNotice::MediaError {
                    message: format!("Unable to access camera/microphone: {}", e),
                })
                .await;
            }
        }
        self.notify_local_media().await;

        let join = ClientMessage::JoinRoom {
            room: self.config.room.clone(),
            display_name: self.config.display_name.clone(),
        };
        if let Err(e) = self.signaling.send(join).await {
            error!("Failed to join room: {}", e);
            self.notify(MeshNotice::Left).await;
            return;
        }
        info!("Joining room {}", self.config.room);

        loop {
            tokio::select! {
                event = self.signal_events.recv() => match event {
                    Some(event) => self.handle_signal(event).await,
                    None => {
                        info!("Signaling connection lost, ending session");
                        self.shutdown(false).await;
                        break;
                    }
                },
                Some((peer, event)) = self.transport_events.recv() => {
                    self.handle_transport(peer, event).await;
                }
                Some(event) = self.media_events.recv() => {
                    self.handle_media_event(event).await;
                }
                action = self.actions.recv() => match action {
                    Some(LocalAction::HangUp) | None => {
                        self.shutdown(true).await;
                        break;
                    }
                    Some(action) => self.handle_action(action).await,
                },
            }
        }
    }

    async fn handle_signal(&mut self, event: SignalEvent) {
        match event {
            SignalEvent::RoomJoined { self_id, members } => {
                self.handle_room_joined(self_id, members).await;
            }
            SignalEvent::Offer { from, sdp } => self.handle_offer(from, sdp).await,
            SignalEvent::Answer { from, sdp } => self.handle_answer(from, sdp).await,
            SignalEvent::IceCandidate { from, candidate } => {
                let Some(conn) = self.lookup(&from) else {
                    debug!("Candidate from unknown peer {}, dropping", from);
                    return;
                };
                if let Err(e) = conn.add_remote_candidate(candidate).await {
                    warn!("Failed to add candidate from {}: {}", from, e);
                }
            }
            SignalEvent::StateAnnounce { from, state } => {
                let applied = self
                    .registry
                    .as_ref()
                    .and_then(|r| r.apply_announce(&from, state));
                match applied {
                    Some(meta) => {
                        self.notify(MeshNotice::PeerMetaChanged { peer: from, meta })
                            .await;
                    }
                    None => {
                        debug!("Holding announcement from unregistered peer {}", from);
                        self.pending_meta.entry(from).or_default().apply(state);
                    }
                }
            }
            SignalEvent::PeerLeft { peer } => {
                self.pending_meta.remove(&peer);
                let Some(registry) = &self.registry else { return };
                if let Err(e) = registry.remove_peer(&peer).await {
                    warn!("Error removing peer {}: {}", peer, e);
                }
                self.notify(MeshNotice::PeerLeft { peer }).await;
            }
            SignalEvent::MemberCount { count } => {
                self.notify(MeshNotice::MemberCount { count }).await;
            }
        }
    }

    /// Bring the mesh up: one connection and one offer per existing member
    async fn handle_room_joined(&mut self, self_id: ParticipantId, members: Vec<MemberInfo>) {
        if self.registry.is_some() {
            warn!("Duplicate room join acknowledgment, ignoring");
            return;
        }

        info!(
            "Joined room {} as {} with {} existing members",
            self.config.room,
            self_id,
            members.len()
        );

        let registry = Arc::new(PeerRegistry::new(
            self_id.clone(),
            self.factory.clone(),
            self.transport_tx.clone(),
        ));
        self.registry = Some(registry.clone());
        self.notify(MeshNotice::Joined {
            self_id: self_id.clone(),
        })
        .await;

        self.announce_initial_state().await;

        let tracks = self.media.current_tracks();
        for member in members {
            if member.id == self_id {
                continue;
            }
            let peer = member.id.clone();
            match registry.add_peer(member.id, member.meta.clone()).await {
                Ok(conn) => {
                    self.notify(MeshNotice::PeerJoined {
                        peer: peer.clone(),
                        meta: member.meta,
                    })
                    .await;
                    if let Err(e) = conn.attach_tracks(&tracks).await {
                        warn!("Failed to attach tracks for {}: {}", peer, e);
                    }
                    self.begin_offer_and_send(&conn).await;
                }
                Err(e) => warn!("Failed to register peer {}: {}", peer, e),
            }
        }
    }

    async fn handle_offer(&mut self, from: ParticipantId, sdp: String) {
        let conn = match self.lookup(&from) {
            Some(conn) => conn,
            // First contact: the offerer joined after us.
            None => {
                let Some(registry) = &self.registry else {
                    warn!("Offer from {} before room join, dropping", from);
                    return;
                };
                let meta = self.pending_meta.remove(&from).unwrap_or_default();
                let conn = match registry.add_peer(from.clone(), meta.clone()).await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Failed to register offering peer {}: {}", from, e);
                        return;
                    }
                };
                self.notify(MeshNotice::PeerJoined {
                    peer: from.clone(),
                    meta,
                })
                .await;
                let tracks = self.media.current_tracks();
                if let Err(e) = conn.attach_tracks(&tracks).await {
                    warn!("Failed to attach tracks for {}: {}", from, e);
                }
                conn
            }
        };

        match conn.handle_remote_offer(sdp).await {
            Ok(RemoteOfferOutcome::Answer { sdp, renegotiate }) => {
                if let Err(e) = self
                    .signaling
                    .send(ClientMessage::Answer {
                        to: from.clone(),
                        sdp,
                    })
                    .await
                {
                    error!("Failed to send answer to {}: {}", from, e);
                }
                if renegotiate {
                    self.begin_offer_and_send(&conn).await;
                }
            }
            Ok(RemoteOfferOutcome::Ignored) => {
                debug!("Discarded offer from {}", from);
            }
            Err(e) => warn!("Failed to answer offer from {}: {}", from, e),
        }
    }

    async fn handle_answer(&mut self, from: ParticipantId, sdp: String) {
        let Some(conn) = self.lookup(&from) else {
            warn!("Answer from unknown peer {}, dropping", from);
            return;
        };

        match conn.handle_remote_answer(sdp).await {
            Ok(true) => self.begin_offer_and_send(&conn).await,
            Ok(false) => {}
            Err(e) => warn!("Failed to apply answer from {}: {}", from, e),
        }
    }

    async fn handle_transport(&mut self, peer: ParticipantId, event: TransportEvent) {
        match event {
            TransportEvent::Candidate(candidate) => {
                if let Err(e) = self
                    .signaling
                    .send(ClientMessage::IceCandidate {
                        to: peer.clone(),
                        candidate,
                    })
                    .await
                {
                    error!("Failed to relay candidate to {}: {}", peer, e);
                }
            }
            TransportEvent::StateChanged(state) => {
                let Some(conn) = self.lookup(&peer) else {
                    debug!("Transport event for unknown peer {}, dropping", peer);
                    return;
                };
                let peer_state = conn.handle_transport_state(state);
                self.notify(MeshNotice::PeerStateChanged {
                    peer,
                    state: peer_state,
                })
                .await;
            }
        }
    }

    async fn handle_media_event(&mut self, event: MediaEvent) {
        match event {
            MediaEvent::ScreenShareEnded => {
                if self.media.screen_share_active() {
                    info!("Screen share ended by the platform, reverting");
                    self.revert_screen_share().await;
                }
            }
        }
    }

    async fn handle_action(&mut self, action: LocalAction) {
        match action {
            LocalAction::ToggleMic => {
                match self.media.toggle_mic().await {
                    Ok(outcome) => {
                        let state = if outcome.enabled {
                            StateAnnounce::MicOn
                        } else {
                            StateAnnounce::MicOff
                        };
                        self.announce(state).await;
                        if let Some(track) = outcome.new_track {
                            self.fan_out_new_track(track).await;
                        }
                    }
                    Err(e) => {
                        self.notify(MeshNotice::MediaError {
                            message: format!("Unable to access microphone: {}", e),
                        })
                        .await;
                    }
                }
                self.notify_local_media().await;
            }
            LocalAction::ToggleCamera => {
                match self.media.toggle_camera().await {
                    Ok(outcome) => {
                        let state = if outcome.enabled {
                            StateAnnounce::CamOn
                        } else {
                            StateAnnounce::CamOff
                        };
                        self.announce(state).await;
                        if let Some(track) = outcome.new_track {
                            if self.media.screen_share_active() {
                                // The video slot belongs to the capture; the
                                // camera attaches when the share reverts.
                                debug!("Screen share active, deferring camera attachment");
                            } else {
                                self.fan_out_new_track(track).await;
                            }
                        }
                    }
                    Err(e) => {
                        self.notify(MeshNotice::MediaError {
                            message: format!("Unable to access camera: {}", e),
                        })
                        .await;
                    }
                }
                self.notify_local_media().await;
            }
            LocalAction::StartScreenShare => {
                match self.media.start_screen_share().await {
                    Ok(track) => self.fan_out_video_replacement(track).await,
                    Err(e) => {
                        // A declined share picker is a normal outcome.
                        debug!("Screen share not started: {}", e);
                        if !matches!(e, Error::ScreenShare(crate::ScreenShareError::Denied)) {
                            self.notify(MeshNotice::MediaError {
                                message: format!("Unable to share screen: {}", e),
                            })
                            .await;
                        }
                    }
                }
                self.notify_local_media().await;
            }
            LocalAction::StopScreenShare => {
                self.revert_screen_share().await;
            }
            LocalAction::Roster(reply) => {
                let roster = self
                    .registry
                    .as_ref()
                    .map(|r| {
                        r.snapshot()
                            .into_iter()
                            .map(|(id, state, meta)| PeerInfo { id, state, meta })
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = reply.send(roster);
            }
            LocalAction::HangUp => unreachable!("handled in the event loop"),
        }
    }

    async fn revert_screen_share(&mut self) {
        match self.media.stop_screen_share().await {
            Ok(Some(track)) => self.fan_out_video_replacement(track).await,
            Ok(None) => {}
            Err(e) => {
                self.notify(MeshNotice::MediaError {
                    message: format!("Unable to restore camera: {}", e),
                })
                .await;
            }
        }
        self.notify_local_media().await;
    }

    /// Swap the outbound video slot on every peer, without renegotiation
    async fn fan_out_video_replacement(&self, track: TrackRef) {
        let Some(registry) = &self.registry else { return };
        for conn in registry.connections() {
            if let Err(e) = conn.replace_video(&track).await {
                warn!("Failed to swap video track for {}: {}", conn.id(), e);
            }
        }
    }

    /// Attach a brand-new track on every peer and renegotiate
    async fn fan_out_new_track(&self, track: TrackRef) {
        let Some(registry) = &self.registry else { return };
        for conn in registry.connections() {
            if let Err(e) = conn.attach_tracks(std::slice::from_ref(&track)).await {
                warn!("Failed to attach track for {}: {}", conn.id(), e);
                continue;
            }
            self.begin_offer_and_send(conn.as_ref()).await;
        }
    }

    async fn begin_offer_and_send(&self, conn: &PeerConnection) {
        match conn.begin_offer().await {
            Ok(Some(sdp)) => {
                if let Err(e) = self
                    .signaling
                    .send(ClientMessage::Offer {
                        to: conn.id().clone(),
                        sdp,
                    })
                    .await
                {
                    error!("Failed to send offer to {}: {}", conn.id(), e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to start negotiation with {}: {}", conn.id(), e),
        }
    }

    /// Broadcast mic/cam flags that differ from the announced default
    async fn announce_initial_state(&self) {
        let state = self.media.state();
        if !state.mic_enabled {
            self.announce(StateAnnounce::MicOff).await;
        }
        if !state.camera_enabled {
            self.announce(StateAnnounce::CamOff).await;
        }
    }

    async fn announce(&self, state: StateAnnounce) {
        if let Err(e) = self
            .signaling
            .send(ClientMessage::StateAnnounce { state })
            .await
        {
            warn!("Failed to announce state: {}", e);
        }
    }

    async fn notify_local_media(&self) {
        let state = self.media.state();
        self.notify(MeshNotice::LocalMediaChanged {
            camera: state.camera_enabled,
            mic: state.mic_enabled,
            screen_share: state.screen_share_active,
        })
        .await;
    }

    async fn notify(&self, notice: MeshNotice) {
        if self.notices.send(notice).await.is_err() {
            debug!("Notice receiver dropped");
        }
    }

    fn lookup(&self, peer: &ParticipantId) -> Option<Arc<PeerConnection>> {
        self.registry.as_ref().and_then(|r| r.get(peer))
    }

    async fn shutdown(&mut self, announce_leave: bool) {
        if announce_leave {
            if let Err(e) = self.signaling.send(ClientMessage::LeaveRoom).await {
                debug!("Failed to announce departure: {}", e);
            }
        }

        if let Some(registry) = self.registry.take() {
            registry.close_all().await;
        }
        self.media.release();
        self.notify(MeshNotice::Left).await;
        info!("Session ended");
    }
}
