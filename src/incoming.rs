//! Incoming Call Handler (§4.I).

use std::time::Duration;

use log::{info, warn};
use tokio::time::timeout;

use crate::common::{CallId, CallState, Result};
use crate::engine::{CallEngine, Environment, HostNotification};
use crate::error::EngineError;
use crate::media::MediaProvider;
use crate::role::remote_participant_id;
use crate::row::{CallPatch, CallStatus, Columns, RowStore};
use crate::rtc::{RtcPeerConnection, SignalingState};
use crate::state::Event;

/// Bounded wait for `have-remote-offer` after setting the remote
/// description (§4.I step 5, §5).
const REMOTE_OFFER_WAIT: Duration = Duration::from_secs(2);

impl<E: Environment> CallEngine<E> {
    /// Reacts to an incoming-call INSERT event (§4.I, first paragraph).
    pub(crate) async fn handle_insert_seen(&mut self, row: crate::row::CallRow) {
        if self.sm.state() != CallState::Idle {
            info!("incoming call: ignoring insert, not idle ({:?})", self.sm.state());
            return;
        }
        if row.status != CallStatus::Ringing || row.offer.is_none() {
            return;
        }

        self.begin_new_call(row.id);
        self.sm.apply(Event::InsertSeen);
        self.subscribe_call(row.id);
        self.notify(HostNotification::Ringing);

        // §4.K: pre-warm media so accept is instant.
        self.media_stream = crate::media::prewarm_on_ringing(self.env.media().as_ref());
    }

    /// `acceptIncomingCall(callId)` (§6, §4.I).
    pub async fn accept_incoming_call(&mut self, call_id: CallId) -> Result<()> {
        if self.sm.state() != CallState::Ringing || self.sm.call_id() != Some(call_id) {
            let refusal = "accept called outside ringing state for this call".to_string();
            self.notify(HostNotification::AcceptRefused(refusal.clone()));
            return Err(EngineError::Validation(refusal));
        }

        // Step 3: validate the row by role.
        let row = self.env.store().fetch(call_id, Columns::all()).await?;
        if let Err(e) = validate_incoming_row(&row, self.role, &self.profile_id, call_id) {
            self.notify(HostNotification::AcceptRefused(e.to_string()));
            return Err(e);
        }
        let offer = row.offer.clone().expect("validated non-null above");

        // Step 2: ensure peer connection and media exist.
        if self.media_stream.is_none() {
            match self.env.media().acquire() {
                Ok(stream) => self.media_stream = Some(stream),
                Err(crate::media::MediaError::Busy(reason)) => {
                    warn!("accept: media busy: {reason}");
                    self.notify(HostNotification::AcceptRefused(format!(
                        "media device unavailable: {reason}"
                    )));
                    return Err(EngineError::MediaBusy(reason));
                }
                Err(e) => {
                    self.notify(HostNotification::AcceptRefused(e.to_string()));
                    return Err(EngineError::Rtc(e.to_string()));
                }
            }
        }
        if self.pc.is_none() {
            let pc = self
                .env
                .create_connection(self.observer())
                .map_err(|e| EngineError::Rtc(e.to_string()))?;
            if let Some(s) = self.media_stream.as_ref() {
                if let Err(e) = pc.add_track(s) {
                    warn!("accept: failed to attach local media track: {e}");
                }
            }
            self.pc = Some(pc);
        }

        self.sm.apply(Event::UserAccept);

        let outcome = self.apply_remote_offer_and_answer(call_id, &offer, row.answer.clone()).await;
        if let Err(e) = &outcome {
            warn!("accept: {e}");
        }
        outcome
    }

    /// Steps 4-9 of §4.I, isolated so the accept-specific state guard above
    /// stays small.
    async fn apply_remote_offer_and_answer(
        &mut self,
        call_id: CallId,
        offer: &crate::row::SessionDescription,
        existing_answer: Option<crate::row::SessionDescription>,
    ) -> Result<()> {
        let pc = self.pc.as_ref().expect("ensured above");

        // Step 4: guard on signaling state, with the interleaving-recovery
        // case where an answer was already raced onto the row.
        match pc.signaling_state() {
            SignalingState::Stable => {
                pc.set_remote_description(offer.clone())
                    .map_err(|e| EngineError::Rtc(e.to_string()))?;
                self.ice.mark_remote_description_set();
            }
            SignalingState::HaveLocalOffer => {
                if let Some(answer) = existing_answer {
                    pc.set_remote_description(answer)
                        .map_err(|e| EngineError::Rtc(e.to_string()))?;
                    self.ice.mark_remote_description_set();
                } else {
                    return Err(EngineError::InvalidState {
                        expected: "stable",
                        actual: "have-local-offer".into(),
                    });
                }
            }
            other => {
                return Err(EngineError::InvalidState {
                    expected: "stable",
                    actual: format!("{other:?}"),
                });
            }
        }

        // Step 5: bounded wait for have-remote-offer.
        let pc_ref = self.pc.as_ref().expect("ensured above");
        if pc_ref.signaling_state() != SignalingState::HaveRemoteOffer {
            let waited = timeout(REMOTE_OFFER_WAIT, wait_for_have_remote_offer(pc_ref)).await;
            if waited.is_err() {
                return Err(EngineError::Timeout("have-remote-offer"));
            }
        }

        // Step 6.
        let pc = self.pc.as_ref().expect("ensured above");
        if !pc.has_senders() {
            warn!("accept: no local senders at answer time (missing audio/video track)");
        }

        // Step 7.
        let answer = pc.create_answer().map_err(|e| EngineError::Rtc(e.to_string()))?;
        if !answer.sdp.contains("m=audio") || !answer.sdp.contains("m=video") {
            return Err(EngineError::Validation(
                "answer missing m=audio or m=video section".into(),
            ));
        }
        pc.set_local_description(answer.clone())
            .map_err(|e| EngineError::Rtc(e.to_string()))?;

        // Step 8: apply remote ICE already present, and write the row.
        let row = self.env.store().fetch(call_id, Columns::all()).await?;
        self.ice.reconcile_from_row(pc, self.role.remote_ice_field().read(&row));

        self.env
            .store()
            .update(call_id, CallPatch::answered(answer))
            .await?;

        self.sm.set_call_id(Some(call_id));
        self.start_ice_polling(call_id);
        Ok(())
    }

    /// `rejectIncomingCall(callId)` (§6, §4.I last paragraph).
    pub async fn reject_incoming_call(&mut self, call_id: CallId) -> Result<()> {
        if self.sm.call_id() != Some(call_id) {
            return Err(EngineError::InvalidState {
                expected: "matching ringing call",
                actual: "different or no active call".into(),
            });
        }
        let result = self.env.store().update(call_id, CallPatch::status(CallStatus::Rejected)).await;
        if let Err(e) = &result {
            warn!("reject: row update failed, proceeding to local cleanup anyway: {e}");
        }
        self.sm.apply(Event::UserReject);
        self.on_possibly_entered_ended();
        result
    }
}

fn validate_incoming_row(
    row: &crate::row::CallRow,
    local_role: crate::common::Role,
    local_profile: &crate::common::ProfileId,
    call_id: CallId,
) -> Result<()> {
    if row.id != call_id {
        return Err(EngineError::Validation("row id mismatch".into()));
    }
    if row.recipient_type != local_role {
        return Err(EngineError::Validation("recipient_type mismatch".into()));
    }
    if row.participant_id(local_role) != Some(local_profile) {
        return Err(EngineError::Validation("own id not present on row".into()));
    }
    if row.status.is_terminal() || row.status != CallStatus::Ringing {
        return Err(EngineError::Validation(format!(
            "row status is {:?}, expected ringing",
            row.status
        )));
    }
    if row.offer.is_none() {
        return Err(EngineError::Validation("row has no offer".into()));
    }
    if remote_participant_id(local_role, row).is_none() {
        return Err(EngineError::Validation("remote participant id unresolved".into()));
    }
    Ok(())
}

async fn wait_for_have_remote_offer<C: RtcPeerConnection>(pc: &C) {
    loop {
        if pc.signaling_state() == SignalingState::HaveRemoteOffer {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
