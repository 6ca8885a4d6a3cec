//! The call state machine (§4.G), modeled as a pure reducer.
//!
//! This is the redesign called for in the design notes
//! ("Coroutine-flavored event handlers ... The state machine becomes a pure
//! function; side effects ... are emitted as commands interpreted by a thin
//! effect runner"). `StateMachine::apply` never performs I/O; it only
//! computes the next state and returns the transitions that occurred so the
//! caller can log them and decide what effects to run.

use crate::common::{CallId, CallState, Role};

/// The event-type sum §9 calls for: every external input that can move the
/// state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Event {
    StartOutgoing,
    InsertSeen,
    UserAccept,
    UserReject,
    UserEnd,
    AnswerApplied,
    /// The row's `status` was observed as `active`/`in_call` directly from
    /// an UPDATE payload, independent of whether the answer itself has been
    /// applied yet (§8 scenario 3: a realtime event can deliver the status
    /// change before the answer poll fills in the omitted `answer` column).
    StatusActiveSeen,
    RtcConnected,
    /// `failed` or `closed` only; `disconnected` must never be sent here
    /// (§4.G: "disconnected is TRANSIENT and must not terminate the call").
    RtcFailedOrClosed,
    /// The row's `status` was observed to be `rejected` or `missed` (caller
    /// side, §4.G).
    StatusRejectedOrMissed,
    /// A terminal status was observed on the row, attributed to the remote
    /// side or to a legacy row with no `ended_by` (§4.J).
    RemoteTerminal,
}

/// One transition that occurred, for logging (§4.G: "All transitions log
/// `(from, to, callId, role, reason)`").
#[derive(Clone, Debug)]
pub struct Transition {
    pub from: CallState,
    pub to: CallState,
    pub call_id: Option<CallId>,
    pub role: Role,
    pub reason: &'static str,
}

pub struct StateMachine {
    state: CallState,
    call_id: Option<CallId>,
    role: Role,
}

impl StateMachine {
    pub fn new(role: Role) -> Self {
        StateMachine {
            state: CallState::Idle,
            call_id: None,
            role,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn call_id(&self) -> Option<CallId> {
        self.call_id
    }

    pub fn set_call_id(&mut self, call_id: Option<CallId>) {
        self.call_id = call_id;
    }

    /// Applies `event`, returning `Some(Transition)` if the state changed.
    /// `Ended` is absorbing: once reached, every subsequent call is a no-op.
    pub fn apply(&mut self, event: Event) -> Option<Transition> {
        let from = self.state;
        if from.is_terminal() {
            return None;
        }

        let next = match (from, event) {
            (CallState::Idle, Event::StartOutgoing) => Some(CallState::Calling),
            (CallState::Idle, Event::InsertSeen) => Some(CallState::Ringing),

            (CallState::Calling, Event::AnswerApplied) => Some(CallState::Connecting),
            (CallState::Calling, Event::StatusActiveSeen) => Some(CallState::Connecting),
            (CallState::Calling, Event::StatusRejectedOrMissed) => Some(CallState::Ended),

            (CallState::Ringing, Event::UserAccept) => Some(CallState::Connecting),
            (CallState::Ringing, Event::UserReject) => Some(CallState::Ended),

            (CallState::Connecting, Event::RtcConnected) => Some(CallState::InCall),
            (CallState::Connecting, Event::RtcFailedOrClosed) => Some(CallState::Ended),

            (CallState::InCall, Event::RtcFailedOrClosed) => Some(CallState::Ended),

            // Applicable from any non-terminal state.
            (_, Event::UserEnd) => Some(CallState::Ended),
            (_, Event::RemoteTerminal) => Some(CallState::Ended),

            _ => None,
        };

        let to = next?;
        self.state = to;
        Some(Transition {
            from,
            to,
            call_id: self.call_id,
            role: self.role,
            reason: reason_for(event),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outgoing_call_happy_path() {
        let mut sm = StateMachine::new(Role::Parent);
        assert_eq!(sm.state(), CallState::Idle);

        let t = sm.apply(Event::StartOutgoing).unwrap();
        assert_eq!((t.from, t.to), (CallState::Idle, CallState::Calling));

        let t = sm.apply(Event::AnswerApplied).unwrap();
        assert_eq!((t.from, t.to), (CallState::Calling, CallState::Connecting));

        let t = sm.apply(Event::RtcConnected).unwrap();
        assert_eq!((t.from, t.to), (CallState::Connecting, CallState::InCall));
    }

    #[test]
    fn incoming_call_happy_path() {
        let mut sm = StateMachine::new(Role::Child);
        sm.apply(Event::InsertSeen);
        assert_eq!(sm.state(), CallState::Ringing);
        sm.apply(Event::UserAccept);
        assert_eq!(sm.state(), CallState::Connecting);
        sm.apply(Event::RtcConnected);
        assert_eq!(sm.state(), CallState::InCall);
    }

    #[test]
    fn status_active_seen_advances_calling_independently_of_answer_applied() {
        // §8 scenario 3: the status column can arrive (and drive the
        // transition) before the answer itself is ever applied.
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        let t = sm.apply(Event::StatusActiveSeen).unwrap();
        assert_eq!(t.to, CallState::Connecting);
    }

    #[test]
    fn disconnected_is_not_a_reducer_event_and_in_call_has_no_transition_for_it() {
        // `disconnected` never reaches the reducer at all (§4.G, §8
        // invariant 7) -- `engine::handle_connection_state_changed` filters
        // it out before calling `apply`. This test documents the
        // complementary fact at the reducer level: there is no
        // `(InCall, RtcFailedOrClosed)`-shaped edge that a transient state
        // could accidentally hit, only the one driven by `failed`/`closed`.
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        sm.apply(Event::AnswerApplied);
        sm.apply(Event::RtcConnected);
        assert_eq!(sm.state(), CallState::InCall);

        let t = sm.apply(Event::RtcFailedOrClosed).unwrap();
        assert_eq!(t.to, CallState::Ended);
    }

    #[test]
    fn user_end_terminates_from_any_non_terminal_state() {
        for start in [CallState::Idle, CallState::Calling, CallState::Ringing, CallState::Connecting] {
            let mut sm = StateMachine::new(Role::Parent);
            match start {
                CallState::Calling => {
                    sm.apply(Event::StartOutgoing);
                }
                CallState::Ringing => {
                    sm.apply(Event::InsertSeen);
                }
                CallState::Connecting => {
                    sm.apply(Event::StartOutgoing);
                    sm.apply(Event::AnswerApplied);
                }
                _ => {}
            }
            assert_eq!(sm.state(), start);
            let t = sm.apply(Event::UserEnd).unwrap();
            assert_eq!(t.to, CallState::Ended);
        }
    }

    #[test]
    fn ended_is_absorbing() {
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        sm.apply(Event::UserEnd);
        assert_eq!(sm.state(), CallState::Ended);

        assert!(sm.apply(Event::AnswerApplied).is_none());
        assert!(sm.apply(Event::RtcConnected).is_none());
        assert!(sm.apply(Event::UserEnd).is_none());
        assert_eq!(sm.state(), CallState::Ended);
    }

    #[test]
    fn rejected_or_missed_status_ends_an_outgoing_call() {
        let mut sm = StateMachine::new(Role::Parent);
        sm.apply(Event::StartOutgoing);
        let t = sm.apply(Event::StatusRejectedOrMissed).unwrap();
        assert_eq!(t.to, CallState::Ended);
    }
}

fn reason_for(event: Event) -> &'static str {
    match event {
        Event::StartOutgoing => "start_outgoing",
        Event::InsertSeen => "insert_seen",
        Event::UserAccept => "user_accept",
        Event::UserReject => "user_reject",
        Event::UserEnd => "user_end",
        Event::AnswerApplied => "answer_applied",
        Event::StatusActiveSeen => "status_active_seen",
        Event::RtcConnected => "rtc_connected",
        Event::RtcFailedOrClosed => "rtc_failed_or_closed",
        Event::StatusRejectedOrMissed => "status_rejected_or_missed",
        Event::RemoteTerminal => "remote_terminal",
    }
}
