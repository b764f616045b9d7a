//! Per-peer negotiation state machine
//!
//! One [`PeerConnection`] exists per remote participant and owns that
//! participant's session transport. All offer/answer sequencing rules live
//! here: glare resolution, renegotiation coalescing, and ICE candidate
//! buffering. The coordinator calls into this module from its event loop;
//! the state machine never talks to the signaling relay itself, it returns
//! the SDP the caller must relay.

pub mod connection;

pub use connection::{NegotiationRole, PeerConnection, PeerState, RemoteOfferOutcome};
