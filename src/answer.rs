//! Idempotent Answer Applier (§4.D).
//!
//! Invoked from every path that might surface the remote answer: a realtime
//! UPDATE event, an ICE/answer poll tick, or the one-shot fetch performed
//! right after subscribing. Consolidating these three call sites behind one
//! guarded procedure is the fix for the redesign note "Three overlapping
//! answer-arrival paths."

use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::common::CallId;
use crate::ice::IceExchange;
use crate::row::SessionDescription;
use crate::rtc::{RtcPeerConnection, SignalingState};
use crate::state::{Event, StateMachine};

/// What happened when `AnswerApplier::apply` was invoked. All four outcomes
/// are success from the caller's point of view — the applier never returns
/// an error, per §4.D's "all failures ... are logged; the call continues."
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AnswerOutcome {
    /// The remote description was set on this call.
    Applied,
    /// This exact answer (or an equivalent one) was already applied.
    AlreadyApplied,
    /// `call_id` did not match the active call; dropped as stale.
    Stale,
    /// The RTC layer's signaling state ruled out applying the answer right now.
    WrongState,
}

/// SDP hash used to memoize whether a given answer has already been
/// applied, so repeated deliveries of the same answer are cheap no-ops
/// (§4.D step 2-3).
fn sdp_hash(sdp: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(sdp.as_bytes());
    hasher.into()
}

#[derive(Default)]
pub struct AnswerApplier {
    applied: bool,
    applied_hash: Option<[u8; 32]>,
}

impl AnswerApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> bool {
        self.applied
    }

    /// Applies `answer` for `call_id`, following the procedure in §4.D.
    /// `active_call_id` discards callbacks from a prior call (runtime state
    /// "Active call id ref").
    pub fn apply<C: RtcPeerConnection>(
        &mut self,
        pc: &C,
        ice: &mut IceExchange,
        state_machine: &mut StateMachine,
        active_call_id: CallId,
        call_id: CallId,
        answer: &SessionDescription,
    ) -> AnswerOutcome {
        if call_id != active_call_id {
            debug!("answer applier: dropping answer for stale call {call_id}");
            return AnswerOutcome::Stale;
        }

        let hash = sdp_hash(&answer.sdp);
        if self.applied_hash == Some(hash) {
            debug!("answer applier: duplicate answer, short-circuiting");
            return AnswerOutcome::AlreadyApplied;
        }

        match pc.signaling_state() {
            SignalingState::Stable => {
                // Already applied from the RTC layer's point of view.
                self.applied = true;
                self.applied_hash = Some(hash);
                return AnswerOutcome::AlreadyApplied;
            }
            SignalingState::HaveLocalOffer => {}
            _ => {
                warn!("answer applier: wrong signaling state to apply answer");
                return AnswerOutcome::WrongState;
            }
        }

        if pc.remote_description_set() {
            self.applied = true;
            self.applied_hash = Some(hash);
            return AnswerOutcome::AlreadyApplied;
        }

        if let Err(e) = pc.set_remote_description(answer.clone()) {
            warn!("answer applier: set_remote_description failed: {e}");
            return AnswerOutcome::WrongState;
        }

        self.applied = true;
        self.applied_hash = Some(hash);
        ice.flush_buffered(pc);
        state_machine.apply(Event::AnswerApplied);
        AnswerOutcome::Applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::common::{CallId, Role};
    use crate::row::SdpType;
    use crate::sim::rtc::SimPeerConnection;

    struct NoopObserver;
    impl crate::rtc::RtcObserver for NoopObserver {
        fn on_event(&self, _event: crate::rtc::RtcEvent) {}
    }

    fn answer(sdp: &str) -> SessionDescription {
        SessionDescription {
            sdp_type: SdpType::Answer,
            sdp: sdp.to_string(),
        }
    }

    /// Drives a fake connection to `have-local-offer`, the state the answer
    /// applier expects a caller's peer connection to be in.
    fn pc_with_local_offer() -> SimPeerConnection {
        let pc = SimPeerConnection::new(Arc::new(NoopObserver));
        pc.set_local_description(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 m=audio m=video".into(),
        })
        .unwrap();
        pc
    }

    #[test]
    fn applies_once_and_flushes_buffered_ice() {
        let pc = pc_with_local_offer();
        let mut ice = IceExchange::new();
        ice.deliver_remote_candidate(
            &pc,
            Some(crate::row::IceCandidateRecord {
                candidate: "candidate:1 1 UDP 1 10.0.0.1 1 typ host".into(),
                sdp_mline_index: 0,
                sdp_mid: None,
            }),
        );
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        let call_id = CallId::new();
        sm.set_call_id(Some(call_id));

        let mut applier = AnswerApplier::new();
        let outcome = applier.apply(&pc, &mut ice, &mut sm, call_id, call_id, &answer("sdp-a"));
        assert_eq!(outcome, AnswerOutcome::Applied);
        assert!(applier.applied());
        assert_eq!(pc.set_remote_description_call_count(), 1);
        assert_eq!(pc.add_ice_candidate_call_count(), 1, "buffered ICE flushed on apply");
        assert_eq!(sm.state(), crate::common::CallState::Connecting);
    }

    #[test]
    fn reapplying_the_same_answer_is_a_no_op() {
        let pc = pc_with_local_offer();
        let mut ice = IceExchange::new();
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        let call_id = CallId::new();
        sm.set_call_id(Some(call_id));

        let mut applier = AnswerApplier::new();
        let a = answer("sdp-a");
        assert_eq!(applier.apply(&pc, &mut ice, &mut sm, call_id, call_id, &a), AnswerOutcome::Applied);

        for _ in 0..5 {
            let outcome = applier.apply(&pc, &mut ice, &mut sm, call_id, call_id, &a);
            assert_eq!(outcome, AnswerOutcome::AlreadyApplied);
        }
        assert_eq!(pc.set_remote_description_call_count(), 1);
    }

    #[test]
    fn answer_for_a_stale_call_id_is_dropped() {
        let pc = pc_with_local_offer();
        let mut ice = IceExchange::new();
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        let active_call_id = CallId::new();
        sm.set_call_id(Some(active_call_id));
        let stale_call_id = CallId::new();

        let mut applier = AnswerApplier::new();
        let outcome = applier.apply(&pc, &mut ice, &mut sm, active_call_id, stale_call_id, &answer("sdp-a"));
        assert_eq!(outcome, AnswerOutcome::Stale);
        assert_eq!(pc.set_remote_description_call_count(), 0);
    }

    #[test]
    fn stable_signaling_state_is_treated_as_already_applied() {
        // A freshly created connection starts `stable`; per §4.D step 4 this
        // means "already applied from the RTC layer's point of view", not a
        // rejection.
        let pc = SimPeerConnection::new(Arc::new(NoopObserver));
        let mut ice = IceExchange::new();
        let mut sm = StateMachine::new(Role::Parent);
        let call_id = CallId::new();
        sm.set_call_id(Some(call_id));

        let mut applier = AnswerApplier::new();
        let outcome = applier.apply(&pc, &mut ice, &mut sm, call_id, call_id, &answer("sdp-a"));
        assert_eq!(outcome, AnswerOutcome::AlreadyApplied);
        assert!(applier.applied());
        assert_eq!(pc.set_remote_description_call_count(), 0);
    }

    #[test]
    fn wrong_signaling_state_is_rejected_without_touching_the_connection() {
        // `have-remote-offer` (callee side, after setting the remote offer
        // but before creating its own answer) is neither `stable` nor
        // `have-local-offer` -- the applier has no business running here.
        let pc = SimPeerConnection::new(Arc::new(NoopObserver));
        pc.set_remote_description(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "v=0 m=audio m=video".into(),
        })
        .unwrap();
        let mut ice = IceExchange::new();
        let mut sm = StateMachine::new(Role::Parent);
        let call_id = CallId::new();
        sm.set_call_id(Some(call_id));

        let mut applier = AnswerApplier::new();
        let outcome = applier.apply(&pc, &mut ice, &mut sm, call_id, call_id, &answer("sdp-a"));
        assert_eq!(outcome, AnswerOutcome::WrongState);
        assert_eq!(pc.set_remote_description_call_count(), 1, "the offer set above, not a new answer apply");
    }
}
