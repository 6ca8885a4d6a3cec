//! Outgoing Call Handler (§4.H).

use log::{info, warn};

use crate::answer::AnswerOutcome;
use crate::common::{CallId, ProfileId, Role};
use crate::common::Result;
use crate::engine::{CallEngine, Environment, HostNotification};
use crate::error::EngineError;
use crate::media::MediaProvider;
use crate::polling::{spawn_poll_loop, POLL_INTERVAL};
use crate::role::IdField;
use crate::row::{Columns, NewCallRow, RowStore};
use crate::rtc::RtcPeerConnection;
use crate::state::Event;

impl<E: Environment> CallEngine<E> {
    /// `startOutgoingCall(remoteId)` (§6, §4.H).
    ///
    /// `family_authorization_parent_id` is only meaningful when this
    /// endpoint's role is `family_member` and `remote_role` is `child`: it
    /// is the child's parent id, written into `parent_id` for
    /// authorization context without making that parent a participant
    /// (§4.A). Resolving "who is this child's parent" is a row-store
    /// lookup outside this crate's scope, so the host supplies it.
    pub async fn start_outgoing_call(
        &mut self,
        remote_id: ProfileId,
        remote_role: Role,
        family_authorization_parent_id: Option<ProfileId>,
    ) -> Result<()> {
        if self.sm.state() != crate::common::CallState::Idle {
            return Err(EngineError::InvalidState {
                expected: "idle",
                actual: format!("{}", self.sm.state()),
            });
        }

        // Step 2: ensure media. A busy device is a distinguished non-fatal
        // state, not an RTC-layer failure (§4.H step 2).
        let stream = match self.env.media().acquire() {
            Ok(stream) => Some(stream),
            Err(crate::media::MediaError::Busy(reason)) => {
                info!("outgoing call: media busy, proceeding without local tracks: {reason}");
                None
            }
            Err(e) => {
                warn!("outgoing call: media acquisition failed: {e}");
                None
            }
        };

        let pc = self
            .env
            .create_connection(self.observer())
            .map_err(|e| EngineError::Rtc(e.to_string()))?;
        if let Some(s) = stream.as_ref() {
            if let Err(e) = pc.add_track(s) {
                warn!("outgoing call: failed to attach local media track: {e}");
            }
        }

        // Step 3: create offer, verify audio+video sections, set local.
        let offer = pc
            .create_offer()
            .map_err(|e| EngineError::Rtc(e.to_string()))?;
        if !offer.sdp.contains("m=audio") || !offer.sdp.contains("m=video") {
            return Err(EngineError::Validation(
                "offer missing m=audio or m=video section".into(),
            ));
        }
        pc.set_local_description(offer.clone())
            .map_err(|e| EngineError::Rtc(e.to_string()))?;

        // Step 4: build the initial row via the Role Router.
        let call_id = CallId::new();
        let new_row = build_new_call_row(
            call_id,
            self.role,
            &self.profile_id,
            remote_id,
            remote_role,
            offer,
            family_authorization_parent_id,
        );
        let row = match self.env.store().insert(new_row).await {
            Ok(row) => row,
            Err(e) => {
                warn!("outgoing call: row insert failed: {e}");
                pc.close();
                return Err(e);
            }
        };

        self.begin_new_call(row.id);
        self.pc = Some(pc);
        self.media_stream = stream;
        self.sm.apply(Event::StartOutgoing);

        // Step 5: subscribe to the per-call channel, start answer polling.
        self.subscribe_call(row.id);
        self.start_answer_polling(row.id);

        // Step 7: one-shot fetch immediately after subscribing, in case the
        // answer is already present (race between insert and subscribe).
        if let Ok(fetched) = self.env.store().fetch(row.id, Columns::answer_and_status()).await {
            self.apply_fetched_answer(fetched).await;
        }

        Ok(())
    }

    fn start_answer_polling(&mut self, call_id: CallId) {
        if let Some(old) = self.answer_poll.take() {
            old.abort();
        }
        let store = self.env.store();
        let tx = self.events_tx.clone();
        let handle = spawn_poll_loop(POLL_INTERVAL, move || {
            let store = store.clone();
            let tx = tx.clone();
            async move {
                match store.fetch(call_id, Columns::answer_and_status()).await {
                    Ok(row) => {
                        let _ = tx.send(crate::engine::EngineEvent::AnswerPollResult(row));
                    }
                    Err(e) => {
                        if !e.is_transient() {
                            warn!("answer poll: non-transient fetch error: {e}");
                        }
                    }
                }
            }
        });
        self.answer_poll = Some(handle);
    }

    /// Feeds an answer-poll tick's fetched `{answer, status}` row through
    /// the same path as the post-subscribe one-shot fetch (§4.F "Answer
    /// polling").
    pub(crate) async fn handle_answer_poll_result(&mut self, row: crate::row::CallRow) {
        self.apply_fetched_answer(row).await;
    }

    /// Common path for "a row carrying a possible answer/status became
    /// available", whether via poll result or the one-shot post-subscribe
    /// fetch.
    pub(crate) async fn apply_fetched_answer(&mut self, row: crate::row::CallRow) {
        if !matches!(
            self.sm.state(),
            crate::common::CallState::Calling | crate::common::CallState::Connecting
        ) {
            return;
        }
        let Some(active_call_id) = self.sm.call_id() else {
            return;
        };
        if row.status.is_terminal()
            && matches!(
                row.status,
                crate::row::CallStatus::Rejected | crate::row::CallStatus::Missed
            )
        {
            self.sm.apply(Event::StatusRejectedOrMissed);
            self.on_possibly_entered_ended();
            return;
        }
        if let Some(answer) = row.answer.clone() {
            let Some(pc) = self.pc.as_ref() else { return };
            let outcome = self.answer_applier.apply(
                pc,
                &mut self.ice,
                &mut self.sm,
                active_call_id,
                row.id,
                &answer,
            );
            match outcome {
                AnswerOutcome::Applied => {
                    info!("outgoing call: answer applied for {}", row.id);
                    if let Some(h) = self.answer_poll.take() {
                        h.stop();
                    }
                    self.start_ice_polling(row.id);
                }
                AnswerOutcome::AlreadyApplied => {
                    if let Some(h) = self.answer_poll.take() {
                        h.stop();
                    }
                }
                AnswerOutcome::Stale | AnswerOutcome::WrongState => {}
            }
        }
    }

    pub(crate) fn start_ice_polling(&mut self, call_id: CallId) {
        if let Some(old) = self.ice_poll.take() {
            old.abort();
        }
        let store = self.env.store();
        let tx = self.events_tx.clone();
        let remote_columns = Columns::remote_ice(self.role);
        let handle = spawn_poll_loop(POLL_INTERVAL, move || {
            let store = store.clone();
            let tx = tx.clone();
            async move {
                match store.fetch(call_id, remote_columns).await {
                    Ok(row) => {
                        let candidates = match remote_columns_field(remote_columns, &row) {
                            Some(c) => c.to_vec(),
                            None => Vec::new(),
                        };
                        let _ = tx.send(crate::engine::EngineEvent::IcePollResult(candidates));
                    }
                    Err(e) => {
                        if !e.is_transient() {
                            warn!("ice poll: non-transient fetch error: {e}");
                        }
                    }
                }
            }
        });
        self.ice_poll = Some(handle);
    }
}

fn remote_columns_field(columns: Columns, row: &crate::row::CallRow) -> Option<&[crate::row::IceCandidateRecord]> {
    if columns.parent_ice_candidates {
        Some(&row.parent_ice_candidates)
    } else if columns.child_ice_candidates {
        Some(&row.child_ice_candidates)
    } else {
        None
    }
}

fn build_new_call_row(
    call_id: CallId,
    local_role: Role,
    local_id: &ProfileId,
    remote_id: ProfileId,
    remote_role: Role,
    offer: crate::row::SessionDescription,
    family_authorization_parent_id: Option<ProfileId>,
) -> NewCallRow {
    let mut row = NewCallRow {
        id: call_id,
        caller_type: local_role,
        recipient_type: remote_role,
        parent_id: None,
        child_id: None,
        family_member_id: None,
        offer,
    };
    set_id_field(&mut row, local_role.local_id_field(), local_id.clone());
    set_id_field(&mut row, remote_role.local_id_field(), remote_id);

    if local_role == Role::FamilyMember && remote_role == Role::Child {
        if let Some(parent_id) = family_authorization_parent_id {
            row.parent_id = Some(parent_id);
        }
    }
    row
}

fn set_id_field(row: &mut NewCallRow, field: IdField, id: ProfileId) {
    match field {
        IdField::ParentId => row.parent_id = Some(id),
        IdField::ChildId => row.child_id = Some(id),
        IdField::FamilyMemberId => row.family_member_id = Some(id),
    }
}
