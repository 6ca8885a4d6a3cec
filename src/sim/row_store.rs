//! An in-memory `calls` table with realtime fan-out (§6, "Row-store
//! contract (consumed)"). Backs both `RowStore` and `RealtimeSource`: a real
//! row store (e.g. Supabase) is exactly this pairing over one physical
//! table, so one fake serves both roles.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::common::time::Timestamp;
use crate::common::{CallId, Result, Role};
use crate::error::EngineError;
use crate::realtime::{RealtimeEvent, RealtimeSource};
use crate::row::{CallPatch, CallRow, CallStatus, Columns, NewCallRow, RowStore};

/// Whether `subscribe_inserts`/`subscribe_call` immediately push a
/// `Subscribed` confirmation. Tests of the polling fallback (§4.F) use
/// `NeverConfirm` so the engine never stops polling via the realtime path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubscribeBehavior {
    ConfirmImmediately,
    NeverConfirm,
}

#[derive(Default)]
struct Subscribers {
    inserts: HashMap<Role, Vec<mpsc::UnboundedSender<RealtimeEvent>>>,
    updates: HashMap<CallId, Vec<mpsc::UnboundedSender<RealtimeEvent>>>,
}

#[derive(Clone, Copy, Default)]
struct DroppedColumns {
    answer: bool,
}

pub struct SimBackend {
    rows: Mutex<HashMap<CallId, CallRow>>,
    subs: Mutex<Subscribers>,
    subscribe_behavior: SubscribeBehavior,
    drop_from_broadcast: Mutex<HashMap<CallId, DroppedColumns>>,
}

impl SimBackend {
    pub fn new(subscribe_behavior: SubscribeBehavior) -> Self {
        SimBackend {
            rows: Mutex::new(HashMap::new()),
            subs: Mutex::new(Subscribers::default()),
            subscribe_behavior,
            drop_from_broadcast: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of the row, bypassing `Columns` selection -- for test
    /// assertions only, not part of the `RowStore` contract.
    pub fn row(&self, call_id: CallId) -> Option<CallRow> {
        self.rows.lock().unwrap().get(&call_id).cloned()
    }

    /// §8 scenario 3: arranges for the next `update()` that sets `answer`
    /// on `call_id` to still apply it to the stored row, but to omit
    /// `answer` from the UPDATE event delivered to subscribers -- realtime
    /// silently dropping a changed column.
    pub fn drop_answer_from_next_broadcast(&self, call_id: CallId) {
        self.drop_from_broadcast
            .lock()
            .unwrap()
            .entry(call_id)
            .or_default()
            .answer = true;
    }

    fn notify_update(&self, call_id: CallId, patch: CallPatch) {
        let subs = self.subs.lock().unwrap();
        if let Some(list) = subs.updates.get(&call_id) {
            for tx in list {
                let _ = tx.send(RealtimeEvent::Update {
                    call_id,
                    patch: patch.clone(),
                });
            }
        }
    }
}

impl RowStore for SimBackend {
    async fn insert(&self, row: NewCallRow) -> Result<CallRow> {
        let call_row = CallRow {
            id: row.id,
            caller_type: row.caller_type,
            recipient_type: row.recipient_type,
            parent_id: row.parent_id,
            child_id: row.child_id,
            family_member_id: row.family_member_id,
            status: CallStatus::Ringing,
            offer: Some(row.offer),
            answer: None,
            parent_ice_candidates: Vec::new(),
            child_ice_candidates: Vec::new(),
            ended_at: None,
            ended_by: None,
            created_at: Timestamp::now(),
        };
        {
            let mut rows = self.rows.lock().unwrap();
            if rows.contains_key(&call_row.id) {
                return Err(EngineError::Conflict(call_row.id));
            }
            rows.insert(call_row.id, call_row.clone());
        }

        let subs = self.subs.lock().unwrap();
        if let Some(list) = subs.inserts.get(&call_row.recipient_type) {
            for tx in list {
                let _ = tx.send(RealtimeEvent::Insert(call_row.clone()));
            }
        }
        drop(subs);
        Ok(call_row)
    }

    async fn fetch(&self, id: CallId, columns: Columns) -> Result<CallRow> {
        let mut row = self
            .rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::TransientStore(format!("no such call {id}")))?;
        // §4.B: a column not in `columns` must not be trusted by the
        // caller; zero it here so an accidental read fails loudly in tests
        // instead of quietly passing.
        if !columns.answer {
            row.answer = None;
        }
        if !columns.parent_ice_candidates {
            row.parent_ice_candidates = Vec::new();
        }
        if !columns.child_ice_candidates {
            row.child_ice_candidates = Vec::new();
        }
        Ok(row)
    }

    async fn update(&self, id: CallId, patch: CallPatch) -> Result<()> {
        {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .get_mut(&id)
                .ok_or_else(|| EngineError::TransientStore(format!("no such call {id}")))?;
            if let Some(status) = patch.status {
                row.status = status;
            }
            if let Some(answer) = patch.answer.clone() {
                row.answer = Some(answer);
            }
            if let Some(candidates) = patch.parent_ice_candidates.clone() {
                row.parent_ice_candidates = candidates;
            }
            if let Some(candidates) = patch.child_ice_candidates.clone() {
                row.child_ice_candidates = candidates;
            }
            if let Some(ended_at) = patch.ended_at {
                row.ended_at = ended_at;
            }
            if let Some(ended_by) = patch.ended_by {
                row.ended_by = Some(ended_by);
            }
        }

        let mut broadcast = patch;
        let mut dropped = self.drop_from_broadcast.lock().unwrap();
        if let Some(d) = dropped.get_mut(&id) {
            if d.answer {
                broadcast.answer = None;
                d.answer = false;
            }
        }
        drop(dropped);

        self.notify_update(id, broadcast);
        Ok(())
    }
}

impl RealtimeSource for SimBackend {
    fn subscribe_inserts(&self, recipient_type: Role) -> mpsc::UnboundedReceiver<RealtimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.subscribe_behavior == SubscribeBehavior::ConfirmImmediately {
            let _ = tx.send(RealtimeEvent::Subscribed);
        }
        self.subs
            .lock()
            .unwrap()
            .inserts
            .entry(recipient_type)
            .or_default()
            .push(tx);
        rx
    }

    fn subscribe_call(&self, call_id: CallId) -> mpsc::UnboundedReceiver<RealtimeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.subscribe_behavior == SubscribeBehavior::ConfirmImmediately {
            let _ = tx.send(RealtimeEvent::Subscribed);
        }
        self.subs
            .lock()
            .unwrap()
            .updates
            .entry(call_id)
            .or_default()
            .push(tx);
        rx
    }
}
