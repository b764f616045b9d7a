//! Error types for the mesh call manager
//!
//! The taxonomy separates media acquisition failures ([`DeviceError`]),
//! per-peer offer/answer failures ([`Error::Negotiation`]), underlying
//! ICE/DTLS failures ([`Error::Transport`]) and malformed or
//! out-of-sequence signaling ([`Error::Protocol`]). One peer's failure
//! never closes or degrades another peer's connection; the coordinator
//! logs and continues.

use crate::ParticipantId;
use thiserror::Error;

/// Result type alias for mesh call operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the mesh call manager
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration validation error
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Local capture device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Screen capture failure
    #[error(transparent)]
    ScreenShare(#[from] ScreenShareError),

    /// Description or candidate application failed for one peer; the
    /// affected connection returns to Idle and the next
    /// renegotiation-needed trigger retries
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Underlying ICE/DTLS/SRTP session failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or out-of-sequence signaling payload; dropped with a
    /// diagnostic, never fatal for the coordinator
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Relay communication failure
    #[error("Signaling error: {0}")]
    Signaling(String),

    /// A connection for this participant already exists; callers are
    /// expected to check membership first
    #[error("Peer already registered: {0}")]
    PeerExists(ParticipantId),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Media acquisition failure, distinguished so callers can apply the
/// per-variant policy: `PermissionDenied` is a silent, recoverable no-op
/// (the feature simply stays off); the others are surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// No camera and/or microphone was found
    #[error("No capture device found")]
    NotFound,

    /// The user (or platform) denied capture permission; never alert
    #[error("Capture permission denied")]
    PermissionDenied,

    /// Any other device failure, surfaced for user notification
    #[error("Device error: {0}")]
    Other(String),
}

/// Screen capture failure
///
/// A screen share that the OS or browser chrome ends unilaterally is not an
/// error; it surfaces as a lifecycle event
/// ([`MediaEvent::ScreenShareEnded`](crate::media::MediaEvent)).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScreenShareError {
    /// The user declined the capture prompt
    #[error("Screen capture denied")]
    Denied,

    /// Screen capture is not available on this platform
    #[error("Screen capture unsupported")]
    Unsupported,

    /// Any other capture failure
    #[error("Screen capture error: {0}")]
    Other(String),
}
