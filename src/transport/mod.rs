//! Session transport: the per-peer media connection boundary
//!
//! The negotiation state machine in [`peer`](crate::peer) drives a
//! transport only through [`SessionTransport`], and the mesh opens new ones
//! only through [`TransportFactory`]. The production implementation in
//! [`rtc`] wraps a WebRTC peer connection; tests substitute scripted
//! in-memory transports.
//!
//! Transports never call back into the mesh directly. ICE candidates and
//! connection state changes are reported as [`TransportEvent`]s on the
//! channel given to [`TransportFactory::open`], and the coordinator
//! dispatches them from its event loop.

pub mod rtc;

pub use rtc::RtcTransportFactory;

use crate::media::TrackRef;
use crate::signaling::CandidatePayload;
use crate::{ParticipantId, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connectivity state of one session transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Created, no connectivity checks yet
    New,
    /// ICE/DTLS in progress
    Connecting,
    /// Media is flowing
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity lost for good
    Failed,
    /// Torn down
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Out-of-band events emitted by a transport, tagged with the owning peer
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A local ICE candidate is ready to be relayed to the peer
    Candidate(CandidatePayload),
    /// The transport's connectivity state changed
    StateChanged(TransportState),
}

/// One peer's media connection, as seen by the negotiation state machine
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Create an offer to relay to the peer
    ///
    /// The transport installs it as its local description no later than
    /// when the matching answer is applied.
    async fn create_offer(&self) -> Result<String>;

    /// Install a remote offer, discarding any local offer still awaiting
    /// its answer (the glare loser's)
    async fn apply_remote_offer(&self, sdp: String) -> Result<()>;

    /// Create an answer to the installed remote offer and install it as
    /// the local description
    async fn create_answer(&self) -> Result<String>;

    /// Install a remote answer to the offer from [`create_offer`](Self::create_offer)
    async fn apply_remote_answer(&self, sdp: String) -> Result<()>;

    /// Feed one remote ICE candidate to the transport
    ///
    /// Callers must not invoke this before a remote description is
    /// installed; the peer state machine buffers early candidates.
    async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()>;

    /// Attach a local outbound track
    async fn attach_track(&self, track: &TrackRef) -> Result<()>;

    /// Swap the outbound video track in place, without renegotiation
    ///
    /// Falls back to attaching when no video track was sent before.
    async fn replace_video_track(&self, track: &TrackRef) -> Result<()>;

    /// Tear the transport down; idempotent
    async fn close(&self) -> Result<()>;
}

/// Opens session transports for the mesh
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a transport for the given peer
    ///
    /// Events from the transport arrive on `events`, tagged with `peer` so
    /// a single channel serves the whole mesh.
    async fn open(
        &self,
        peer: &ParticipantId,
        events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    ) -> Result<Arc<dyn SessionTransport>>;
}
