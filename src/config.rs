//! Configuration types for the mesh coordinator

use serde::{Deserialize, Serialize};

/// Main configuration for a mesh call session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    /// WebSocket signaling relay URL (ws:// or wss://)
    pub signaling_url: String,

    /// Room identifier to join (opaque, owned by the relay)
    pub room: String,

    /// Display name announced to other participants
    pub display_name: String,

    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// Which local media to acquire on join
    pub constraints: MediaConstraints,
}

/// Requested local capture kinds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Acquire a camera track
    pub video: bool,

    /// Acquire a microphone track
    pub audio: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            room: String::new(),
            display_name: "guest".to_string(),
            stun_servers: vec!["stun:stun.stunprotocol.org".to_string()],
            constraints: MediaConstraints::default(),
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            video: true,
            audio: true,
        }
    }
}

impl MeshConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `room` is empty
    /// - `display_name` is empty
    /// - `stun_servers` is empty
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.room.is_empty() {
            return Err(Error::InvalidConfig(
                "room must not be empty".to_string(),
            ));
        }

        if self.display_name.is_empty() {
            return Err(Error::InvalidConfig(
                "display_name must not be empty".to_string(),
            ));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        Ok(())
    }
}
