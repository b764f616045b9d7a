//! Full-mesh WebRTC call manager
//!
//! This crate coordinates an N-participant audio/video call in a full-mesh
//! topology: every participant holds one direct peer connection to every
//! other participant, negotiated through a lightweight relay (signaling)
//! service.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Relay (Socket-style room signaling, external)           │
//! │  ↕ (typed messages over WebSocket)                       │
//! │  WsSignalingClient                                       │
//! │  ↕                                                       │
//! │  MeshCoordinator (single event loop)                     │
//! │  ├─ PeerRegistry (ParticipantId → PeerConnection + meta) │
//! │  │   └─ PeerConnection (per-peer negotiation machine)    │
//! │  │       └─ SessionTransport (ICE/DTLS/SRTP session)     │
//! │  └─ MediaSource (camera/microphone/screen tracks)        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The hard part is the per-peer negotiation state machine replicated N-1
//! times: it is driven both by local renegotiation needs (track changes,
//! screen share) and by remote signaling events arriving out of order, and
//! the two must never race on the same peer. The [`MeshCoordinator`] owns a
//! single dispatch loop; per-peer serialization is enforced inside
//! [`PeerConnection`](peer::PeerConnection) by coalescing renegotiation
//! requests while one is in flight.
//!
//! # Example
//!
//! ```ignore
//! use meshcall::{MeshConfig, MeshCoordinator, WsSignalingClient};
//! use meshcall::transport::RtcTransportFactory;
//! use std::sync::Arc;
//!
//! let config = MeshConfig {
//!     signaling_url: "wss://relay.example.com/ws".into(),
//!     room: "R1".into(),
//!     display_name: "alice".into(),
//!     ..Default::default()
//! };
//!
//! let (signaling, events) = WsSignalingClient::connect(&config.signaling_url).await?;
//! let factory = Arc::new(RtcTransportFactory::new(config.stun_servers.clone())?);
//! let (coordinator, handle, notices) =
//!     MeshCoordinator::new(config, Arc::new(signaling), events, devices, factory)?;
//!
//! tokio::spawn(coordinator.run());
//! handle.toggle_mic().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;
pub mod media;
pub mod mesh;
pub mod peer;
pub mod registry;
pub mod signaling;
pub mod transport;

// Re-exports for public API
pub use config::{MediaConstraints, MeshConfig};
pub use error::{DeviceError, Error, Result, ScreenShareError};
pub use mesh::{LocalAction, MeshCoordinator, MeshHandle, MeshNotice, PeerInfo};
pub use registry::{MediaFlag, ParticipantMeta, PeerRegistry};
pub use signaling::{SignalingClient, WsSignalingClient};

/// Stable opaque identifier assigned by the signaling relay to each
/// connected client, unique within a room.
///
/// `Ord` is derived so the glare tie-break (smaller id stays offerer) is
/// lexicographic by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a relay-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
