//! Typed signaling messages exchanged with the relay
//!
//! The relay delivers named messages to specific room members or broadcasts
//! them to a room. Delivery order is preserved per ordered pair of
//! participants but not across different peers; the core layers its own
//! candidate-buffering discipline on top (see
//! [`PeerConnection`](crate::peer::PeerConnection)).

use crate::registry::ParticipantMeta;
use crate::ParticipantId;
use serde::{Deserialize, Serialize};

/// Messages sent from this client to the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Request room membership; the relay replies with [`SignalEvent::RoomJoined`]
    JoinRoom {
        /// Room identifier
        room: String,
        /// Display name announced to other members
        display_name: String,
    },

    /// SDP offer addressed to one peer
    Offer {
        /// Target participant
        to: ParticipantId,
        /// Session description
        sdp: String,
    },

    /// SDP answer addressed to one peer
    Answer {
        /// Target participant
        to: ParticipantId,
        /// Session description
        sdp: String,
    },

    /// ICE candidate addressed to one peer (order-preserving per pair)
    IceCandidate {
        /// Target participant
        to: ParticipantId,
        /// Candidate payload
        candidate: CandidatePayload,
    },

    /// Broadcast mute/camera state change; meta-only, no renegotiation
    StateAnnounce {
        /// The new state
        state: StateAnnounce,
    },

    /// Leave the room; the relay notifies remaining members
    LeaveRoom,
}

/// Messages delivered from the relay to this client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalEvent {
    /// Membership granted; carries our relay-assigned id and the members
    /// already present (triggers mesh bring-up)
    RoomJoined {
        /// The id the relay assigned to this client
        self_id: ParticipantId,
        /// Members already in the room with their announced state
        members: Vec<MemberInfo>,
    },

    /// SDP offer from a remote peer
    Offer {
        /// Originating participant
        from: ParticipantId,
        /// Session description
        sdp: String,
    },

    /// SDP answer from a remote peer
    Answer {
        /// Originating participant
        from: ParticipantId,
        /// Session description
        sdp: String,
    },

    /// ICE candidate from a remote peer
    IceCandidate {
        /// Originating participant
        from: ParticipantId,
        /// Candidate payload
        candidate: CandidatePayload,
    },

    /// A remote peer's mute/camera state changed; meta-only
    StateAnnounce {
        /// Originating participant
        from: ParticipantId,
        /// The new state
        state: StateAnnounce,
    },

    /// A participant left the room
    PeerLeft {
        /// The departed participant
        peer: ParticipantId,
    },

    /// Current room population; cosmetic, not part of the core contract
    MemberCount {
        /// Number of members currently joined
        count: u32,
    },
}

/// One existing room member, as reported by the relay on join
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberInfo {
    /// The member's relay-assigned id
    pub id: ParticipantId,

    /// Display name and mute/camera flags
    pub meta: ParticipantMeta,
}

/// ICE candidate attributes carried over signaling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    /// The candidate-attribute line
    pub candidate: String,

    /// Media stream identification tag
    pub sdp_mid: Option<String>,

    /// Index of the media description the candidate belongs to
    pub sdp_mline_index: Option<u16>,
}

/// Mute/camera state announcements; applied to the sender's
/// [`ParticipantMeta`] only, never to connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateAnnounce {
    /// Microphone unmuted
    MicOn,
    /// Microphone muted
    MicOff,
    /// Camera enabled
    CamOn,
    /// Camera disabled
    CamOff,
}
