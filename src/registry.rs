//! Peer registry: one live connection and announced meta per remote member
//!
//! The registry is the mesh's population map. It enforces the topology
//! invariants: exactly one connection per remote participant, never one to
//! ourselves, and removal tears the connection down exactly once no matter
//! how many departure signals arrive.

use crate::peer::{PeerConnection, PeerState};
use crate::signaling::StateAnnounce;
use crate::transport::{TransportEvent, TransportFactory};
use crate::{Error, ParticipantId, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Announced on/off state for a peer's microphone or camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaFlag {
    /// Device enabled
    On,
    /// Device disabled
    Off,
}

impl MediaFlag {
    /// Whether the flag is [`MediaFlag::On`]
    pub fn is_on(self) -> bool {
        self == MediaFlag::On
    }
}

/// Display state a peer announced about itself
///
/// Updated only by explicit announcements; connection state never feeds
/// into it, and announcements never touch connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantMeta {
    /// Human-readable name shown in rosters
    pub display_name: String,

    /// Announced microphone state
    pub mic: MediaFlag,

    /// Announced camera state
    pub camera: MediaFlag,
}

impl ParticipantMeta {
    /// Fold one state announcement into the flags
    pub fn apply(&mut self, state: StateAnnounce) {
        match state {
            StateAnnounce::MicOn => self.mic = MediaFlag::On,
            StateAnnounce::MicOff => self.mic = MediaFlag::Off,
            StateAnnounce::CamOn => self.camera = MediaFlag::On,
            StateAnnounce::CamOff => self.camera = MediaFlag::Off,
        }
    }
}

impl Default for ParticipantMeta {
    fn default() -> Self {
        Self {
            display_name: String::new(),
            mic: MediaFlag::On,
            camera: MediaFlag::On,
        }
    }
}

struct PeerEntry {
    conn: Arc<PeerConnection>,
    meta: ParticipantMeta,
}

/// Map of remote participants to their connections and announced state
pub struct PeerRegistry {
    local_id: ParticipantId,
    factory: Arc<dyn TransportFactory>,
    transport_events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    peers: RwLock<HashMap<ParticipantId, PeerEntry>>,
}

impl PeerRegistry {
    /// Create an empty registry
    ///
    /// # Arguments
    ///
    /// * `local_id` - our relay-assigned id, used to refuse self connections
    /// * `factory` - opens one transport per added peer
    /// * `transport_events` - channel every opened transport reports on
    pub fn new(
        local_id: ParticipantId,
        factory: Arc<dyn TransportFactory>,
        transport_events: mpsc::Sender<(ParticipantId, TransportEvent)>,
    ) -> Self {
        Self {
            local_id,
            factory,
            transport_events,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Add a remote participant, opening a transport for it
    ///
    /// Fails with [`Error::PeerExists`] when a connection for `id` is
    /// already registered; callers check membership first.
    pub async fn add_peer(
        &self,
        id: ParticipantId,
        meta: ParticipantMeta,
    ) -> Result<Arc<PeerConnection>> {
        if id == self.local_id {
            return Err(Error::Protocol(
                "Refusing to open a connection to self".to_string(),
            ));
        }

        if self.peers.read().contains_key(&id) {
            return Err(Error::PeerExists(id));
        }

        let transport = self
            .factory
            .open(&id, self.transport_events.clone())
            .await?;
        let conn = Arc::new(PeerConnection::new(
            id.clone(),
            self.local_id.clone(),
            transport,
        ));

        info!("Registered peer {} ({})", id, meta.display_name);
        self.peers
            .write()
            .insert(id, PeerEntry {
                conn: conn.clone(),
                meta,
            });

        Ok(conn)
    }

    /// Remove a participant and close its connection; no-op when absent
    pub async fn remove_peer(&self, id: &ParticipantId) -> Result<()> {
        let entry = self.peers.write().remove(id);

        match entry {
            Some(entry) => {
                info!("Removing peer {}", id);
                entry.conn.close().await
            }
            None => {
                debug!("Remove for unknown peer {}, ignoring", id);
                Ok(())
            }
        }
    }

    /// Look up a participant's connection
    pub fn get(&self, id: &ParticipantId) -> Option<Arc<PeerConnection>> {
        self.peers.read().get(id).map(|e| e.conn.clone())
    }

    /// Look up a participant's announced meta
    pub fn meta(&self, id: &ParticipantId) -> Option<ParticipantMeta> {
        self.peers.read().get(id).map(|e| e.meta.clone())
    }

    /// Apply a state announcement to the sender's meta
    ///
    /// Returns the updated meta, or `None` when the sender is unknown (the
    /// announcement is dropped).
    pub fn apply_announce(
        &self,
        from: &ParticipantId,
        state: StateAnnounce,
    ) -> Option<ParticipantMeta> {
        let mut peers = self.peers.write();
        let entry = match peers.get_mut(from) {
            Some(entry) => entry,
            None => {
                debug!("State announcement from unregistered peer {}", from);
                return None;
            }
        };

        entry.meta.apply(state);
        Some(entry.meta.clone())
    }

    /// All current connections, for fan-out operations
    pub fn connections(&self) -> Vec<Arc<PeerConnection>> {
        self.peers.read().values().map(|e| e.conn.clone()).collect()
    }

    /// Roster snapshot: id, lifecycle state, and announced meta per peer
    pub fn snapshot(&self) -> Vec<(ParticipantId, PeerState, ParticipantMeta)> {
        self.peers
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), e.conn.state(), e.meta.clone()))
            .collect()
    }

    /// Number of registered remote participants
    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Close every connection and empty the registry
    pub async fn close_all(&self) {
        let entries: Vec<PeerEntry> = self.peers.write().drain().map(|(_, e)| e).collect();

        info!("Closing {} peer connections", entries.len());
        for entry in entries {
            if let Err(e) = entry.conn.close().await {
                warn!("Error closing connection to {}: {}", entry.conn.id(), e);
            }
        }
    }
}
