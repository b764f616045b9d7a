//! Relay signaling: typed protocol plus the WebSocket client
//!
//! The mesh core depends on the relay only through the narrow
//! [`SignalingClient`] trait for sending and an
//! [`mpsc`](tokio::sync::mpsc) receiver of [`SignalEvent`]s for receiving;
//! the wire transport is interchangeable (tests use an in-process channel
//! pair).

pub mod protocol;
pub mod websocket;

pub use protocol::{
    CandidatePayload, ClientMessage, MemberInfo, SignalEvent, StateAnnounce,
};
pub use websocket::WsSignalingClient;

use crate::Result;
use async_trait::async_trait;

/// Outbound half of the relay interface consumed by the mesh core
#[async_trait]
pub trait SignalingClient: Send + Sync {
    /// Send one message to the relay
    async fn send(&self, msg: ClientMessage) -> Result<()>;
}
