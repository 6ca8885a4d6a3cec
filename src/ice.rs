//! ICE Exchange (§4.C).
//!
//! Centralizes the dedupe set and the pre-remote-description buffer in one
//! object, per the redesign note "ICE-candidate dedupe spread across hooks.
//! Centralize in a single ICE Exchange object owning the dedupe set and the
//! buffer."

use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use crate::engine::{CallEngine, Environment};
use crate::row::{Columns, IceCandidateRecord, RowStore};
use crate::rtc::{LocalIceEvent, RtcError, RtcPeerConnection};

/// Owns the dedupe set and the buffer of remote candidates received before
/// the remote description was set. One instance per call; `clear()` must be
/// called whenever `callId` changes (§3, Endpoint Runtime State).
pub struct IceExchange {
    dedupe: HashSet<String>,
    buffered_remote: VecDeque<IceCandidateRecord>,
    remote_description_set: bool,
}

impl Default for IceExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl IceExchange {
    pub fn new() -> Self {
        IceExchange {
            dedupe: HashSet::new(),
            buffered_remote: VecDeque::new(),
            remote_description_set: false,
        }
    }

    /// Call once the remote description has been set on the RTC layer; the
    /// next call should be `flush_buffered`.
    pub fn mark_remote_description_set(&mut self) {
        self.remote_description_set = true;
    }

    /// `deliverRemoteCandidate` (§4.C): if the remote description is not yet
    /// set, buffers the candidate; otherwise applies it (deduped)
    /// immediately. `None` is the end-of-candidates marker and is forwarded
    /// to the RTC layer directly, bypassing the buffer and dedupe set.
    pub fn deliver_remote_candidate<C: RtcPeerConnection>(
        &mut self,
        pc: &C,
        candidate: Option<IceCandidateRecord>,
    ) {
        match candidate {
            None => {
                if let Err(e) = pc.add_ice_candidate(None) {
                    warn!("failed to forward end-of-candidates marker: {e}");
                }
            }
            Some(c) => {
                if c.candidate.is_empty() {
                    // Empty but not the end-of-candidates marker: skip silently.
                    return;
                }
                if self.remote_description_set {
                    self.apply_with_dedupe(pc, c);
                } else {
                    self.buffered_remote.push_back(c);
                }
            }
        }
    }

    /// `flushBufferedIce` (§4.C): called immediately after the remote
    /// description is set. Applies every buffered candidate in order,
    /// dropping duplicates.
    pub fn flush_buffered<C: RtcPeerConnection>(&mut self, pc: &C) {
        self.remote_description_set = true;
        while let Some(c) = self.buffered_remote.pop_front() {
            self.apply_with_dedupe(pc, c);
        }
    }

    /// `reconcileFromRow` (§4.C): called on every UPDATE event and on poll
    /// ticks. `remote_ice` is the full current contents of the remote ICE
    /// field; already-seen candidates are filtered out by the dedupe set.
    pub fn reconcile_from_row<C: RtcPeerConnection>(&mut self, pc: &C, remote_ice: &[IceCandidateRecord]) {
        if !self.remote_description_set {
            for c in remote_ice {
                if !self.dedupe.contains(&c.dedupe_key()) && !self.buffered_remote.contains(c) {
                    self.buffered_remote.push_back(c.clone());
                }
            }
            return;
        }
        for c in remote_ice {
            if self.dedupe.contains(&c.dedupe_key()) {
                continue;
            }
            self.apply_with_dedupe(pc, c.clone());
        }
    }

    fn apply_with_dedupe<C: RtcPeerConnection>(&mut self, pc: &C, candidate: IceCandidateRecord) {
        let key = candidate.dedupe_key();
        if self.dedupe.contains(&key) {
            return;
        }
        match pc.add_ice_candidate(Some(candidate)) {
            Ok(()) => {
                self.dedupe.insert(key);
            }
            Err(RtcError::Duplicate) => {
                // Swallowed per §4.C/§7: the RTC layer's own dedupe fired,
                // so this candidate is already applied from its point of view.
                self.dedupe.insert(key);
            }
            Err(RtcError::Closed) => {
                debug!("ice exchange: peer connection closed, stopping candidate processing");
            }
            Err(e) => {
                warn!("add_ice_candidate failed: {e}");
            }
        }
    }

    /// Cleared whenever `callId` changes (§3).
    pub fn clear(&mut self) {
        self.dedupe.clear();
        self.buffered_remote.clear();
        self.remote_description_set = false;
    }

    #[cfg(test)]
    pub fn dedupe_len(&self) -> usize {
        self.dedupe.len()
    }

    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        self.buffered_remote.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::sim::rtc::SimPeerConnection;

    struct NoopObserver;
    impl crate::rtc::RtcObserver for NoopObserver {
        fn on_event(&self, _event: crate::rtc::RtcEvent) {}
    }

    fn pc() -> SimPeerConnection {
        SimPeerConnection::new(Arc::new(NoopObserver))
    }

    fn candidate(host: &str) -> IceCandidateRecord {
        IceCandidateRecord {
            candidate: format!("candidate:1 1 UDP 2122260223 10.0.0.{host} 12345 typ host"),
            sdp_mline_index: 0,
            sdp_mid: Some("0".into()),
        }
    }

    #[test]
    fn candidates_before_remote_description_buffer_instead_of_applying() {
        let pc = pc();
        let mut ice = IceExchange::new();
        ice.deliver_remote_candidate(&pc, Some(candidate("1")));
        ice.deliver_remote_candidate(&pc, Some(candidate("2")));
        assert_eq!(ice.buffered_len(), 2);
        assert_eq!(pc.add_ice_candidate_call_count(), 0);
    }

    #[test]
    fn flush_applies_buffered_candidates_in_order_and_dedupes() {
        let pc = pc();
        let mut ice = IceExchange::new();
        let c1 = candidate("1");
        ice.deliver_remote_candidate(&pc, Some(c1.clone()));
        ice.deliver_remote_candidate(&pc, Some(candidate("2")));
        ice.flush_buffered(&pc);
        assert_eq!(ice.buffered_len(), 0);
        assert_eq!(ice.dedupe_len(), 2);
        assert_eq!(pc.add_ice_candidate_call_count(), 2);

        // Delivering the same candidate again post-flush applies immediately
        // (remote description is set) but the dedupe set swallows it.
        ice.deliver_remote_candidate(&pc, Some(c1));
        assert_eq!(pc.add_ice_candidate_call_count(), 2);
    }

    #[test]
    fn reconcile_from_row_applies_only_new_candidates() {
        let pc = pc();
        let mut ice = IceExchange::new();
        ice.mark_remote_description_set();

        let c1 = candidate("1");
        let c2 = candidate("2");
        ice.reconcile_from_row(&pc, &[c1.clone()]);
        assert_eq!(pc.add_ice_candidate_call_count(), 1);

        // Same candidate delivered three more times via reconcile (§8
        // scenario 4): still exactly one underlying add call.
        ice.reconcile_from_row(&pc, &[c1.clone(), c1.clone(), c1]);
        assert_eq!(pc.add_ice_candidate_call_count(), 1);

        ice.reconcile_from_row(&pc, &[c2]);
        assert_eq!(pc.add_ice_candidate_call_count(), 2);
    }

    #[test]
    fn empty_candidate_string_is_skipped_silently() {
        let pc = pc();
        let mut ice = IceExchange::new();
        ice.mark_remote_description_set();
        let empty = IceCandidateRecord {
            candidate: String::new(),
            sdp_mline_index: 0,
            sdp_mid: None,
        };
        ice.deliver_remote_candidate(&pc, Some(empty));
        assert_eq!(pc.add_ice_candidate_call_count(), 0);
        assert_eq!(ice.buffered_len(), 0);
    }

    #[test]
    fn end_of_candidates_marker_bypasses_buffer_and_dedupe() {
        let pc = pc();
        let mut ice = IceExchange::new();
        ice.deliver_remote_candidate(&pc, None);
        assert_eq!(ice.buffered_len(), 0);
        assert_eq!(ice.dedupe_len(), 0);
    }

    #[test]
    fn clear_resets_dedupe_and_buffer() {
        let pc = pc();
        let mut ice = IceExchange::new();
        ice.deliver_remote_candidate(&pc, Some(candidate("1")));
        ice.mark_remote_description_set();
        ice.flush_buffered(&pc);
        assert_eq!(ice.dedupe_len(), 1);

        ice.clear();
        assert_eq!(ice.dedupe_len(), 0);
        assert_eq!(ice.buffered_len(), 0);
    }
}

impl<E: Environment> CallEngine<E> {
    /// `enqueueLocalCandidate(c)` (§4.C), driven by the RTC layer's
    /// "local ICE candidate gathered" event. The end-of-candidates marker is
    /// passed through to the RTC layer directly and is never appended to
    /// the row (§9 redesign item 5).
    pub(crate) async fn handle_local_ice_gathered(&mut self, event: LocalIceEvent) {
        let Some(call_id) = self.sm.call_id() else {
            return;
        };
        match event {
            LocalIceEvent::EndOfCandidates => {
                if let Some(pc) = self.pc.as_ref() {
                    if let Err(e) = pc.add_ice_candidate(None) {
                        warn!("failed forwarding end-of-candidates marker locally: {e}");
                    }
                }
            }
            LocalIceEvent::Candidate(candidate) => {
                if candidate.candidate.is_empty() {
                    return;
                }
                let field = self.role.local_ice_field();
                let existing = match self.env.store().fetch(call_id, Columns::local_ice(self.role)).await {
                    Ok(row) => field.read(&row).to_vec(),
                    Err(e) => {
                        warn!("local ice append: fetch failed: {e}");
                        return;
                    }
                };
                let mut updated = existing;
                updated.push(candidate);
                if let Err(e) = self
                    .env
                    .store()
                    .update(call_id, crate::row::CallPatch::ice_candidates(field, updated))
                    .await
                {
                    warn!("local ice append: update failed: {e}");
                }
            }
        }
    }

    /// Feeds an ICE poll tick's fetched remote-candidate array through
    /// reconciliation (§4.F "ICE polling"). Stopping the poll loop itself is
    /// driven by `iceConnectionState` changes, not by this result.
    pub(crate) fn handle_ice_poll_result(&mut self, candidates: Vec<IceCandidateRecord>) {
        if let Some(pc) = self.pc.as_ref() {
            self.ice.reconcile_from_row(pc, &candidates);
        }
    }
}
