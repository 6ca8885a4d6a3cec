//! A fake peer connection standing in for the RTC layer contract (§6).
//! Its signaling-state transitions follow plain WebRTC rules closely enough
//! to exercise the engine's guards without touching media or a network.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::row::{IceCandidateRecord, SdpType, SessionDescription};
use crate::rtc::{
    IceConnectionState, LocalIceEvent, PeerConnectionState, RtcError, RtcEvent, RtcObserver,
    RtcPeerConnection, SignalingState,
};

struct Inner {
    signaling: SignalingState,
    ice: IceConnectionState,
    connection: PeerConnectionState,
    remote_set: bool,
    closed: bool,
    senders: usize,
    added: HashSet<String>,
    add_ice_candidate_calls: usize,
    set_remote_description_calls: usize,
    add_track_calls: usize,
    observer: Arc<dyn RtcObserver>,
}

/// Cheaply `Clone`-able handle sharing one underlying connection: the
/// engine owns one clone, tests hold another to drive `fire_*` events and
/// observe state the way the real RTC layer's callbacks would.
#[derive(Clone)]
pub struct SimPeerConnection(Arc<Mutex<Inner>>);

impl SimPeerConnection {
    pub fn new(observer: Arc<dyn RtcObserver>) -> Self {
        SimPeerConnection(Arc::new(Mutex::new(Inner {
            signaling: SignalingState::Stable,
            ice: IceConnectionState::New,
            connection: PeerConnectionState::New,
            remote_set: false,
            closed: false,
            senders: 0,
            added: HashSet::new(),
            add_ice_candidate_calls: 0,
            set_remote_description_calls: 0,
            add_track_calls: 0,
            observer,
        })))
    }

    /// Test fixture hook: simulates a call where media never attached a
    /// sender track (or lost the one it had).
    pub fn clear_senders(&self) {
        self.0.lock().unwrap().senders = 0;
    }

    pub fn add_track_call_count(&self) -> usize {
        self.0.lock().unwrap().add_track_calls
    }

    /// Total number of `add_ice_candidate(Some(_))` invocations, counting
    /// every call including ones the fake itself rejected as a duplicate —
    /// this measures how many times the engine *tried*, which is what the
    /// dedupe property (one call survives N deliveries of the same
    /// candidate) needs to assert.
    pub fn add_ice_candidate_call_count(&self) -> usize {
        self.0.lock().unwrap().add_ice_candidate_calls
    }

    pub fn set_remote_description_call_count(&self) -> usize {
        self.0.lock().unwrap().set_remote_description_calls
    }

    pub fn fire_local_candidate(&self, candidate: IceCandidateRecord) {
        self.fire(RtcEvent::LocalIceCandidateGathered(LocalIceEvent::Candidate(candidate)));
    }

    pub fn fire_end_of_candidates(&self) {
        self.fire(RtcEvent::LocalIceCandidateGathered(LocalIceEvent::EndOfCandidates));
    }

    pub fn fire_ice_connection_state(&self, state: IceConnectionState) {
        self.0.lock().unwrap().ice = state;
        self.fire(RtcEvent::IceConnectionStateChanged(state));
    }

    pub fn fire_connection_state(&self, state: PeerConnectionState) {
        self.0.lock().unwrap().connection = state;
        self.fire(RtcEvent::ConnectionStateChanged(state));
    }

    fn fire(&self, event: RtcEvent) {
        let observer = self.0.lock().unwrap().observer.clone();
        observer.on_event(event);
    }
}

impl RtcPeerConnection for SimPeerConnection {
    fn signaling_state(&self) -> SignalingState {
        self.0.lock().unwrap().signaling
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.0.lock().unwrap().ice
    }

    fn connection_state(&self) -> PeerConnectionState {
        self.0.lock().unwrap().connection
    }

    fn remote_description_set(&self) -> bool {
        self.0.lock().unwrap().remote_set
    }

    fn create_offer(&self) -> Result<SessionDescription, RtcError> {
        if self.0.lock().unwrap().closed {
            return Err(RtcError::Closed);
        }
        Ok(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: fake_sdp(),
        })
    }

    fn create_answer(&self) -> Result<SessionDescription, RtcError> {
        let inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(RtcError::Closed);
        }
        if inner.signaling != SignalingState::HaveRemoteOffer {
            return Err(RtcError::InvalidState);
        }
        Ok(SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: fake_sdp(),
        })
    }

    fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(RtcError::Closed);
        }
        match (inner.signaling, desc.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => {
                inner.signaling = SignalingState::HaveLocalOffer;
                Ok(())
            }
            (SignalingState::HaveRemoteOffer, SdpType::Answer) => {
                inner.signaling = SignalingState::Stable;
                Ok(())
            }
            _ => Err(RtcError::InvalidState),
        }
    }

    fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(RtcError::Closed);
        }
        inner.set_remote_description_calls += 1;
        match (inner.signaling, desc.sdp_type) {
            (SignalingState::Stable, SdpType::Offer) => {
                inner.signaling = SignalingState::HaveRemoteOffer;
                inner.remote_set = true;
                Ok(())
            }
            (SignalingState::HaveLocalOffer, SdpType::Answer) => {
                inner.signaling = SignalingState::Stable;
                inner.remote_set = true;
                Ok(())
            }
            _ => Err(RtcError::InvalidState),
        }
    }

    fn add_ice_candidate(&self, candidate: Option<IceCandidateRecord>) -> Result<(), RtcError> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(RtcError::Closed);
        }
        let Some(c) = candidate else {
            // End-of-candidates marker: forwarded, never deduped.
            return Ok(());
        };
        inner.add_ice_candidate_calls += 1;
        let key = c.dedupe_key();
        if inner.added.contains(&key) {
            return Err(RtcError::Duplicate);
        }
        inner.added.insert(key);
        Ok(())
    }

    fn add_track(&self, _stream: &dyn crate::media::MediaStream) -> Result<(), RtcError> {
        let mut inner = self.0.lock().unwrap();
        if inner.closed {
            return Err(RtcError::Closed);
        }
        inner.add_track_calls += 1;
        inner.senders += 1;
        Ok(())
    }

    fn has_senders(&self) -> bool {
        self.0.lock().unwrap().senders > 0
    }

    fn close(&self) {
        let mut inner = self.0.lock().unwrap();
        inner.closed = true;
        inner.signaling = SignalingState::Closed;
        inner.connection = PeerConnectionState::Closed;
    }
}

fn fake_sdp() -> String {
    "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n\
     m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\n"
        .to_string()
}
