//! Local media: capture device boundary, track handles, and the
//! [`MediaSource`] that owns the active outbound track set
//!
//! Outbound tracks are shared read-only across all peer connections; only
//! the [`MediaSource`] decides which concrete capture backs the logical
//! camera/microphone slot. Peer connections attach, detach, or replace
//! track references, never mutate track content.

pub mod devices;
pub mod source;

pub use devices::{MediaDevices, ScreenCapture};
pub use source::{MediaSource, ToggleOutcome};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use webrtc::track::track_local::TrackLocal;

/// Out-of-band media lifecycle events delivered to the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaEvent {
    /// The OS or browser chrome ended the screen share unilaterally; the
    /// coordinator reverts to the camera. This is a lifecycle event, not an
    /// error.
    ScreenShareEnded,
}

/// Track media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Which capture device backs a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackSource {
    /// Camera capture
    Camera,
    /// Microphone capture
    Microphone,
    /// Screen capture
    Screen,
}

/// Cloneable handle to one local outbound track
///
/// The enabled flag is shared: flipping it affects what every attached
/// peer connection sends, without renegotiation.
#[derive(Clone)]
pub struct TrackRef {
    id: Arc<str>,
    kind: TrackKind,
    source: TrackSource,
    enabled: Arc<AtomicBool>,
    local: Arc<dyn TrackLocal + Send + Sync>,
}

impl TrackRef {
    /// Create a track handle around an underlying WebRTC local track
    pub fn new(
        kind: TrackKind,
        source: TrackSource,
        local: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string().into(),
            kind,
            source,
            enabled: Arc::new(AtomicBool::new(true)),
            local,
        }
    }

    /// Unique track id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Backing capture device
    pub fn source(&self) -> TrackSource {
        self.source
    }

    /// Whether content is currently being sent on this track
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Flip the shared enabled flag; only the [`MediaSource`] calls this
    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// The underlying WebRTC local track, for attachment to a transport
    pub fn local(&self) -> &Arc<dyn TrackLocal + Send + Sync> {
        &self.local
    }
}

impl std::fmt::Debug for TrackRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackRef")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Snapshot of the local media state
#[derive(Debug, Clone, Default)]
pub struct LocalMediaState {
    /// Camera toggle as requested by the user
    pub camera_enabled: bool,

    /// Microphone toggle as requested by the user
    pub mic_enabled: bool,

    /// Whether the outbound video slot is backed by a screen capture
    pub screen_share_active: bool,

    /// The track currently backing the outbound video slot
    pub active_video: Option<TrackRef>,

    /// The track currently backing the outbound audio slot
    pub active_audio: Option<TrackRef>,
}
