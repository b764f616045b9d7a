//! Negotiation state machine for a single remote participant
//!
//! State model:
//!
//! ```text
//! Idle ──offer/answer──▶ Negotiating(Offerer|Answerer) ──done──▶ Idle
//!   ▲                                                             │
//!   └──────────── transport connected promotes to ────▶ Connected ┘
//!                                      (any state) ──▶ Closed (terminal)
//! ```
//!
//! Rules enforced here:
//!
//! * At most one negotiation is in flight per peer. Offer requests that
//!   arrive mid-negotiation are coalesced into a single queued follow-up.
//! * Simultaneous offers (glare) resolve deterministically: the side with
//!   the lexicographically smaller participant id keeps its offer, the
//!   other side discards its own, answers, and queues a follow-up offer.
//! * Remote ICE candidates are buffered until a remote description is
//!   installed, then flushed in arrival order.

use crate::signaling::CandidatePayload;
use crate::transport::{SessionTransport, TransportState};
use crate::{Error, ParticipantId, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side of the current negotiation this peer connection is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    /// We sent the offer and are waiting for the answer
    Offerer,
    /// We received an offer and are producing the answer
    Answerer,
}

/// Lifecycle state of one peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// No negotiation in flight, transport not (yet) connected
    Idle,
    /// An offer/answer exchange is in flight
    Negotiating(NegotiationRole),
    /// Negotiation settled and the transport is connected
    Connected,
    /// Torn down; terminal
    Closed,
}

/// What to do with a remote offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOfferOutcome {
    /// Send this answer back to the peer
    Answer {
        /// Answer SDP
        sdp: String,
        /// A follow-up offer was queued (glare loser, or a coalesced
        /// request); the caller should begin a new offer now
        renegotiate: bool,
    },
    /// Glare and this side keeps its own pending offer; the remote offer
    /// is discarded
    Ignored,
}

struct Inner {
    state: PeerState,
    transport_state: TransportState,
    remote_description_set: bool,
    renegotiate_queued: bool,
    pending_candidates: Vec<CandidatePayload>,
}

/// One remote participant's connection: transport plus negotiation state
pub struct PeerConnection {
    id: ParticipantId,
    local_id: ParticipantId,
    transport: Arc<dyn SessionTransport>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id)
            .field("local_id", &self.local_id)
            .finish_non_exhaustive()
    }
}

impl PeerConnection {
    /// Wrap a freshly opened transport for the given remote participant
    pub fn new(
        id: ParticipantId,
        local_id: ParticipantId,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        Self {
            id,
            local_id,
            transport,
            inner: Mutex::new(Inner {
                state: PeerState::Idle,
                transport_state: TransportState::New,
                remote_description_set: false,
                renegotiate_queued: false,
                pending_candidates: Vec::new(),
            }),
        }
    }

    /// Remote participant id
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> PeerState {
        self.inner.lock().state
    }

    /// Start (or queue) a negotiation as offerer
    ///
    /// Returns the offer SDP to relay, or `None` when the peer is closed
    /// or a negotiation is already in flight. In the latter case a single
    /// follow-up offer is queued regardless of how many requests arrive.
    pub async fn begin_offer(&self) -> Result<Option<String>> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PeerState::Closed => return Ok(None),
                PeerState::Negotiating(_) => {
                    debug!(
                        "Negotiation with {} already in flight, queueing follow-up",
                        self.id
                    );
                    inner.renegotiate_queued = true;
                    return Ok(None);
                }
                PeerState::Idle | PeerState::Connected => {
                    self.transition(
                        &mut inner,
                        PeerState::Negotiating(NegotiationRole::Offerer),
                    );
                }
            }
        }

        match self.transport.create_offer().await {
            Ok(sdp) => Ok(Some(sdp)),
            Err(e) => {
                self.abort_negotiation();
                Err(Error::Negotiation(format!(
                    "Failed to create offer for {}: {}",
                    self.id, e
                )))
            }
        }
    }

    /// Handle an offer from the remote participant
    pub async fn handle_remote_offer(&self, sdp: String) -> Result<RemoteOfferOutcome> {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PeerState::Closed => {
                    debug!("Dropping offer from closed peer {}", self.id);
                    return Ok(RemoteOfferOutcome::Ignored);
                }
                PeerState::Negotiating(NegotiationRole::Offerer) => {
                    if self.local_id < self.id {
                        info!("Offer glare with {}, keeping local offer", self.id);
                        return Ok(RemoteOfferOutcome::Ignored);
                    }
                    info!("Offer glare with {}, discarding local offer to answer", self.id);
                    inner.renegotiate_queued = true;
                    self.transition(
                        &mut inner,
                        PeerState::Negotiating(NegotiationRole::Answerer),
                    );
                }
                PeerState::Negotiating(NegotiationRole::Answerer) => {
                    return Err(Error::Protocol(format!(
                        "Unexpected offer from {} while already answering",
                        self.id
                    )));
                }
                PeerState::Idle | PeerState::Connected => {
                    self.transition(
                        &mut inner,
                        PeerState::Negotiating(NegotiationRole::Answerer),
                    );
                }
            }
        }

        let answer = match self.answer_offer(sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                self.abort_negotiation();
                return Err(Error::Negotiation(format!(
                    "Failed to answer offer from {}: {}",
                    self.id, e
                )));
            }
        };

        let renegotiate = self.complete_negotiation();
        Ok(RemoteOfferOutcome::Answer {
            sdp: answer,
            renegotiate,
        })
    }

    /// Handle an answer to our pending offer
    ///
    /// Returns `true` when a coalesced follow-up offer was queued during
    /// the exchange and the caller should begin a new offer now.
    pub async fn handle_remote_answer(&self, sdp: String) -> Result<bool> {
        {
            let inner = self.inner.lock();
            match inner.state {
                PeerState::Closed => return Ok(false),
                PeerState::Negotiating(NegotiationRole::Offerer) => {}
                _ => {
                    return Err(Error::Protocol(format!(
                        "Answer from {} without a pending offer",
                        self.id
                    )));
                }
            }
        }

        if let Err(e) = self.transport.apply_remote_answer(sdp).await {
            self.abort_negotiation();
            return Err(Error::Negotiation(format!(
                "Failed to apply answer from {}: {}",
                self.id, e
            )));
        }
        if let Err(e) = self.flush_candidates().await {
            self.abort_negotiation();
            return Err(Error::Negotiation(format!(
                "Failed to flush candidates for {}: {}",
                self.id, e
            )));
        }

        Ok(self.complete_negotiation())
    }

    /// Feed one remote ICE candidate
    ///
    /// Buffered until a remote description is installed; candidates for a
    /// closed peer are dropped silently.
    pub async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == PeerState::Closed {
                debug!("Dropping candidate for closed peer {}", self.id);
                return Ok(());
            }
            if !inner.remote_description_set {
                debug!("Buffering candidate from {} until remote description", self.id);
                inner.pending_candidates.push(candidate);
                return Ok(());
            }
        }

        self.transport.add_remote_candidate(candidate).await
    }

    /// Apply a transport connectivity change; returns the resulting state
    pub fn handle_transport_state(&self, state: TransportState) -> PeerState {
        let mut inner = self.inner.lock();
        inner.transport_state = state;

        match state {
            TransportState::Connected => {
                if inner.state == PeerState::Idle {
                    self.transition(&mut inner, PeerState::Connected);
                }
            }
            TransportState::Failed => {
                warn!("Transport to {} failed", self.id);
                if matches!(inner.state, PeerState::Negotiating(_) | PeerState::Connected) {
                    inner.renegotiate_queued = false;
                    self.transition(&mut inner, PeerState::Idle);
                }
            }
            TransportState::Disconnected => {
                warn!("Transport to {} disconnected, may recover", self.id);
            }
            _ => {}
        }

        inner.state
    }

    /// Attach local outbound tracks to the transport
    pub async fn attach_tracks(&self, tracks: &[crate::media::TrackRef]) -> Result<()> {
        if self.state() == PeerState::Closed {
            return Ok(());
        }
        for track in tracks {
            self.transport.attach_track(track).await?;
        }
        Ok(())
    }

    /// Swap the outbound video track without renegotiation
    pub async fn replace_video(&self, track: &crate::media::TrackRef) -> Result<()> {
        if self.state() == PeerState::Closed {
            return Ok(());
        }
        self.transport.replace_video_track(track).await
    }

    /// Tear the connection down; safe to call more than once
    pub async fn close(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state == PeerState::Closed {
                return Ok(());
            }
            self.transition(&mut inner, PeerState::Closed);
            inner.pending_candidates.clear();
            inner.renegotiate_queued = false;
        }

        self.transport.close().await
    }

    async fn answer_offer(&self, sdp: String) -> Result<String> {
        self.transport.apply_remote_offer(sdp).await?;
        self.flush_candidates().await?;
        self.transport.create_answer().await
    }

    /// Install the remote-description flag and drain the candidate buffer
    /// in arrival order
    async fn flush_candidates(&self) -> Result<()> {
        let pending = {
            let mut inner = self.inner.lock();
            inner.remote_description_set = true;
            std::mem::take(&mut inner.pending_candidates)
        };

        if !pending.is_empty() {
            debug!(
                "Flushing {} buffered candidates to {}",
                pending.len(),
                self.id
            );
        }
        for candidate in pending {
            self.transport.add_remote_candidate(candidate).await?;
        }
        Ok(())
    }

    fn complete_negotiation(&self) -> bool {
        let mut inner = self.inner.lock();
        let renegotiate = std::mem::take(&mut inner.renegotiate_queued);
        let next = if inner.transport_state == TransportState::Connected {
            PeerState::Connected
        } else {
            PeerState::Idle
        };
        self.transition(&mut inner, next);
        renegotiate
    }

    fn abort_negotiation(&self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, PeerState::Negotiating(_)) {
            inner.renegotiate_queued = false;
            self.transition(&mut inner, PeerState::Idle);
        }
    }

    fn transition(&self, inner: &mut Inner, next: PeerState) {
        if inner.state != next {
            debug!("Peer {} state: {:?} -> {:?}", self.id, inner.state, next);
            inner.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MockTransport {
        offers: AtomicUsize,
        fail_offer: bool,
        applied: Mutex<Vec<String>>,
        candidates: Mutex<Vec<CandidatePayload>>,
    }

    #[async_trait]
    impl SessionTransport for MockTransport {
        async fn create_offer(&self) -> Result<String> {
            if self.fail_offer {
                return Err(Error::Transport("offer failed".to_string()));
            }
            let n = self.offers.fetch_add(1, Ordering::SeqCst);
            Ok(format!("offer-{}", n))
        }

        async fn apply_remote_offer(&self, sdp: String) -> Result<()> {
            self.applied.lock().push(format!("offer:{}", sdp));
            Ok(())
        }

        async fn create_answer(&self) -> Result<String> {
            Ok("answer-0".to_string())
        }

        async fn apply_remote_answer(&self, sdp: String) -> Result<()> {
            self.applied.lock().push(format!("answer:{}", sdp));
            Ok(())
        }

        async fn add_remote_candidate(&self, candidate: CandidatePayload) -> Result<()> {
            self.candidates.lock().push(candidate);
            Ok(())
        }

        async fn attach_track(&self, _track: &crate::media::TrackRef) -> Result<()> {
            Ok(())
        }

        async fn replace_video_track(&self, _track: &crate::media::TrackRef) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn candidate(n: u32) -> CandidatePayload {
        CandidatePayload {
            candidate: format!("candidate-{}", n),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        }
    }

    fn peer(local: &str, remote: &str) -> (PeerConnection, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::default());
        let conn = PeerConnection::new(
            ParticipantId::from(remote),
            ParticipantId::from(local),
            transport.clone(),
        );
        (conn, transport)
    }

    #[tokio::test]
    async fn test_offer_from_idle() {
        let (conn, _) = peer("a", "b");

        let sdp = conn.begin_offer().await.unwrap();
        assert_eq!(sdp.as_deref(), Some("offer-0"));
        assert_eq!(
            conn.state(),
            PeerState::Negotiating(NegotiationRole::Offerer)
        );
    }

    #[tokio::test]
    async fn test_offers_coalesce_while_negotiating() {
        let (conn, _) = peer("a", "b");

        conn.begin_offer().await.unwrap();
        // Three requests mid-negotiation collapse into one follow-up.
        assert!(conn.begin_offer().await.unwrap().is_none());
        assert!(conn.begin_offer().await.unwrap().is_none());
        assert!(conn.begin_offer().await.unwrap().is_none());

        let renegotiate = conn.handle_remote_answer("their-answer".to_string()).await.unwrap();
        assert!(renegotiate);

        // The follow-up runs once; afterwards nothing else is queued.
        let sdp = conn.begin_offer().await.unwrap();
        assert_eq!(sdp.as_deref(), Some("offer-1"));
        let renegotiate = conn.handle_remote_answer("their-answer".to_string()).await.unwrap();
        assert!(!renegotiate);
    }

    #[tokio::test]
    async fn test_glare_smaller_id_keeps_offer() {
        let (conn, transport) = peer("a", "b");

        conn.begin_offer().await.unwrap();
        let outcome = conn.handle_remote_offer("their-offer".to_string()).await.unwrap();

        assert_eq!(outcome, RemoteOfferOutcome::Ignored);
        assert_eq!(
            conn.state(),
            PeerState::Negotiating(NegotiationRole::Offerer)
        );
        assert!(transport.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_glare_larger_id_discards_and_answers() {
        let (conn, transport) = peer("b", "a");

        conn.begin_offer().await.unwrap();
        let outcome = conn.handle_remote_offer("their-offer".to_string()).await.unwrap();

        match outcome {
            RemoteOfferOutcome::Answer { sdp, renegotiate } => {
                assert_eq!(sdp, "answer-0");
                assert!(renegotiate);
            }
            RemoteOfferOutcome::Ignored => panic!("glare loser must answer"),
        }
        assert_eq!(conn.state(), PeerState::Idle);
        assert_eq!(transport.applied.lock()[0], "offer:their-offer");
    }

    #[tokio::test]
    async fn test_candidates_buffer_until_remote_description() {
        let (conn, transport) = peer("a", "b");

        conn.add_remote_candidate(candidate(1)).await.unwrap();
        conn.add_remote_candidate(candidate(2)).await.unwrap();
        assert!(transport.candidates.lock().is_empty());

        conn.handle_remote_offer("their-offer".to_string()).await.unwrap();

        // Flushed in arrival order, then passthrough.
        conn.add_remote_candidate(candidate(3)).await.unwrap();
        let seen: Vec<String> = transport
            .candidates
            .lock()
            .iter()
            .map(|c| c.candidate.clone())
            .collect();
        assert_eq!(seen, vec!["candidate-1", "candidate-2", "candidate-3"]);
    }

    #[tokio::test]
    async fn test_answer_without_offer_is_protocol_error() {
        let (conn, _) = peer("a", "b");

        let err = conn
            .handle_remote_answer("their-answer".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let (conn, transport) = peer("a", "b");

        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), PeerState::Closed);

        // Everything after close is a silent no-op.
        assert!(conn.begin_offer().await.unwrap().is_none());
        conn.add_remote_candidate(candidate(1)).await.unwrap();
        assert!(transport.candidates.lock().is_empty());
        assert_eq!(
            conn.handle_remote_offer("late-offer".to_string()).await.unwrap(),
            RemoteOfferOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn test_transport_connected_promotes_idle_peer() {
        let (conn, _) = peer("a", "b");

        conn.handle_remote_offer("their-offer".to_string()).await.unwrap();
        assert_eq!(conn.state(), PeerState::Idle);

        let state = conn.handle_transport_state(TransportState::Connected);
        assert_eq!(state, PeerState::Connected);
    }

    #[tokio::test]
    async fn test_negotiation_completing_after_connect_lands_connected() {
        let (conn, _) = peer("a", "b");

        conn.begin_offer().await.unwrap();
        conn.handle_transport_state(TransportState::Connected);
        conn.handle_remote_answer("their-answer".to_string()).await.unwrap();

        assert_eq!(conn.state(), PeerState::Connected);
    }

    #[tokio::test]
    async fn test_transport_failure_aborts_negotiation() {
        let (conn, _) = peer("a", "b");

        conn.begin_offer().await.unwrap();
        conn.begin_offer().await.unwrap(); // queue a follow-up

        let state = conn.handle_transport_state(TransportState::Failed);
        assert_eq!(state, PeerState::Idle);

        // The queued follow-up died with the negotiation.
        let sdp = conn.begin_offer().await.unwrap();
        assert_eq!(sdp.as_deref(), Some("offer-1"));
        let renegotiate = conn.handle_remote_answer("their-answer".to_string()).await.unwrap();
        assert!(!renegotiate);
    }

    #[tokio::test]
    async fn test_failed_offer_reverts_to_idle() {
        let transport = Arc::new(MockTransport {
            fail_offer: true,
            ..Default::default()
        });
        let conn = PeerConnection::new(
            ParticipantId::from("b"),
            ParticipantId::from("a"),
            transport,
        );

        let err = conn.begin_offer().await.unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(conn.state(), PeerState::Idle);
    }
}
