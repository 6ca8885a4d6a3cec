//! The Realtime Subscriber (§4.E).
//!
//! Two channels per endpoint: an incoming-call channel filtered by
//! `recipient_type`, and a per-call channel bound to one `callId` once
//! known. Both are modeled as a stream of `RealtimeEvent`s rather than a
//! callback interface, so the engine's single event loop (`engine::run`)
//! can treat realtime delivery the same way it treats polling ticks and
//! user commands — all of it funnels through one reducer.

use log::warn;
use tokio::sync::mpsc;

use crate::answer::AnswerOutcome;
use crate::common::{CallId, CallState, Role};
use crate::engine::{CallEngine, Environment};
use crate::row::{CallPatch, CallRow, CallStatus, Columns, RowStore};
use crate::state::Event;

/// One event delivered on a realtime channel.
///
/// `Update` intentionally carries only a `CallPatch`, not a full `CallRow`:
/// per §4.E, UPDATE payloads may omit unchanged columns, and code reacting
/// to an update must not assume the payload is complete.
#[derive(Clone, Debug)]
pub enum RealtimeEvent {
    /// The subscription is confirmed live. Polling fallback guarded on this
    /// channel should stop.
    Subscribed,
    /// The channel failed (transport error or explicit `CHANNEL_ERROR`).
    /// Polling fallback should start.
    ChannelError,
    /// A new Call row was inserted matching this endpoint's
    /// `recipient_type` filter.
    Insert(CallRow),
    /// An existing Call row changed.
    Update { call_id: CallId, patch: CallPatch },
}

/// The realtime subscription primitive the engine requires from the row
/// store (§6): INSERT/UPDATE events filtered by a single equality
/// predicate, with update payloads that may be partial.
pub trait RealtimeSource: Send + Sync + 'static {
    /// Subscribes to INSERT events on the Call table filtered by
    /// `recipient_type = <role>` (used by callees to detect incoming
    /// rings).
    fn subscribe_inserts(&self, recipient_type: Role) -> mpsc::UnboundedReceiver<RealtimeEvent>;

    /// Subscribes to UPDATE events for one `callId`.
    fn subscribe_call(&self, call_id: CallId) -> mpsc::UnboundedReceiver<RealtimeEvent>;
}

impl<E: Environment> CallEngine<E> {
    /// Reacts to a per-call UPDATE event (§4.E). `patch` may be partial:
    /// "field appeared in payload" is the only thing a `Some` means here,
    /// so every branch below treats a missing field as "this event said
    /// nothing about it", not as "this field is null".
    pub(crate) async fn handle_row_update(&mut self, call_id: CallId, patch: CallPatch) {
        if self.sm.call_id() != Some(call_id) {
            // Stale event for a call we've already moved past, or a
            // mis-routed delivery; discard (§4.D step 1's sibling rule for
            // row updates).
            return;
        }

        if let Some(status) = patch.status {
            if status.is_terminal() {
                self.observe_remote_terminal(patch.ended_by);
                return;
            }
            if status == CallStatus::Active && self.sm.state() == CallState::Calling {
                // §8 scenario 3: the status flip can arrive before (or
                // without) the `answer` column in the same payload.
                if let Some(t) = self.sm.apply(Event::StatusActiveSeen) {
                    self.log_transition(&t);
                }
            }
        }

        if let Some(answer) = patch.answer.clone() {
            if matches!(self.sm.state(), CallState::Calling | CallState::Connecting) {
                if let Some(active_call_id) = self.sm.call_id() {
                    if let Some(pc) = self.pc.as_ref() {
                        let outcome = self.answer_applier.apply(
                            pc,
                            &mut self.ice,
                            &mut self.sm,
                            active_call_id,
                            call_id,
                            &answer,
                        );
                        if matches!(outcome, AnswerOutcome::Applied | AnswerOutcome::AlreadyApplied) {
                            if let Some(h) = self.answer_poll.take() {
                                h.stop();
                            }
                            self.start_ice_polling(call_id);
                        }
                    }
                }
            }
        }

        if patch.parent_ice_candidates.is_some() || patch.child_ice_candidates.is_some() {
            // §4.E: "ICE reconciliation MUST fetch the latest value of the
            // remote ICE field from the gateway; do not trust the payload
            // to be complete."
            self.reconcile_remote_ice(call_id).await;
        }
    }

    async fn reconcile_remote_ice(&mut self, call_id: CallId) {
        let columns = Columns::remote_ice(self.role);
        match self.env.store().fetch(call_id, columns).await {
            Ok(row) => {
                let field = self.role.remote_ice_field();
                let candidates = field.read(&row).to_vec();
                if let Some(pc) = self.pc.as_ref() {
                    self.ice.reconcile_from_row(pc, &candidates);
                }
            }
            Err(e) => warn!("ice reconcile from row update: fetch failed: {e}"),
        }
    }
}
