//! The RTC-layer contract (§6, "RTC layer contract (consumed)").
//!
//! The concrete peer-connection implementation is an external collaborator
//! (out of scope, §1); this module only describes the capability surface the
//! engine needs from it. `famcall_engine::sim::rtc` provides an in-memory
//! fake used by the tests in `tests/`.

use thiserror::Error;

use crate::row::{IceCandidateRecord, SessionDescription};

#[derive(Error, Debug)]
pub enum RtcError {
    /// The peer connection rejected the operation given its current
    /// signaling/ICE state.
    #[error("invalid state for this operation")]
    InvalidState,
    /// This exact candidate was already added.
    #[error("duplicate ice candidate")]
    Duplicate,
    /// The peer connection has been closed; no further operations apply.
    #[error("peer connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// A local ICE candidate emitted by the peer connection, or the
/// end-of-candidates marker (the `null` candidate in the WebRTC API).
#[derive(Clone, Debug)]
pub enum LocalIceEvent {
    Candidate(IceCandidateRecord),
    EndOfCandidates,
}

/// A peer-connection abstraction supporting offer/answer/ICE negotiation
/// with audio+video receive intent (§6).
///
/// Every method here is synchronous from the engine's point of view: the
/// real RTC layer's awaitable operations (create offer/answer, set
/// descriptions) are expected to be bridged to this synchronous surface by
/// the host, or the implementor may block internally. This mirrors the
/// teacher's FFI `PeerConnection`, which exposes the same operations as
/// plain (non-async) calls into the underlying C++ object.
pub trait RtcPeerConnection: Send + 'static {
    fn signaling_state(&self) -> SignalingState;
    fn ice_connection_state(&self) -> IceConnectionState;
    fn connection_state(&self) -> PeerConnectionState;

    /// `true` once `set_local_description` or `set_remote_description` has
    /// been called with a remote description (used by the answer applier's
    /// "already set" guard).
    fn remote_description_set(&self) -> bool;

    /// Requests an offer with both audio and video receive intent. The
    /// returned SDP must contain `m=audio` and `m=video` sections (§4.H).
    fn create_offer(&self) -> Result<SessionDescription, RtcError>;
    /// Requests an answer with both audio and video receive intent (§4.I).
    fn create_answer(&self) -> Result<SessionDescription, RtcError>;

    fn set_local_description(&self, desc: SessionDescription) -> Result<(), RtcError>;
    fn set_remote_description(&self, desc: SessionDescription) -> Result<(), RtcError>;

    /// Adds an ICE candidate, or (when `None`) forwards the end-of-candidates
    /// marker to the RTC layer explicitly, per the redesign in §9 item 5.
    fn add_ice_candidate(&self, candidate: Option<IceCandidateRecord>) -> Result<(), RtcError>;

    /// Attaches the local media stream's tracks to this connection so they
    /// are sent once negotiation completes (§4.H step 2). Called once, right
    /// after `create_connection`, whenever media acquisition succeeded; a
    /// connection that never receives this call has no outbound sender
    /// (`has_senders` stays `false`).
    fn add_track(&self, stream: &dyn crate::media::MediaStream) -> Result<(), RtcError>;

    /// `true` if at least one outbound media sender exists.
    fn has_senders(&self) -> bool;

    fn close(&self);
}

/// An event fired by the RTC layer's observer interfaces (§6: "fire change
/// events for all three"), mirroring the teacher's
/// `PeerConnectionObserverTrait::handle_ice_candidate_gathered` /
/// `handle_ice_connection_state_changed`.
#[derive(Clone, Debug)]
pub enum RtcEvent {
    LocalIceCandidateGathered(LocalIceEvent),
    SignalingStateChanged(SignalingState),
    IceConnectionStateChanged(IceConnectionState),
    ConnectionStateChanged(PeerConnectionState),
}

/// Receives observer events from an `RtcPeerConnection`. The engine's own
/// implementation just forwards each event into its single event loop as an
/// `EngineEvent`, so no RTC callback ever touches engine state directly.
pub trait RtcObserver: Send + Sync + 'static {
    fn on_event(&self, event: RtcEvent);
}
