//! The shared Call row and the Call Record Gateway (§3, §4.B).
//!
//! `CallRow` is the single database record replicated to both endpoints.
//! `RowStore` abstracts the backing row store; `famcall_engine::sim` provides
//! an in-memory fake for tests.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::common::{time::Timestamp, CallId, ProfileId, Role};
use crate::common::Result;

/// A WebRTC session description, as exchanged over the row (offer or
/// answer). The RTC layer treats the `sdp` string as opaque.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// One ICE candidate as stored in `parent_ice_candidates` /
/// `child_ice_candidates`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateRecord {
    pub candidate: String,
    pub sdp_mline_index: u32,
    pub sdp_mid: Option<String>,
}

impl IceCandidateRecord {
    /// The deduplication key from §4.C:
    /// `${candidate}-${sdpMLineIndex}-${sdpMid ?? ""}`.
    pub fn dedupe_key(&self) -> String {
        format!(
            "{}-{}-{}",
            self.candidate,
            self.sdp_mline_index,
            self.sdp_mid.as_deref().unwrap_or("")
        )
    }
}

/// Lifecycle of the call row. `Active` is the sole canonical on-write value
/// for the `active`/`in_call` pair (open question #1); `from_wire` still
/// accepts either spelling so legacy rows read back correctly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallStatus {
    Ringing,
    Active,
    Ended,
    Rejected,
    Missed,
}

impl CallStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Ended | CallStatus::Rejected | CallStatus::Missed
        )
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "ringing" => Some(CallStatus::Ringing),
            "active" | "in_call" => Some(CallStatus::Active),
            "ended" => Some(CallStatus::Ended),
            "rejected" => Some(CallStatus::Rejected),
            "missed" => Some(CallStatus::Missed),
            _ => None,
        }
    }

    /// The single spelling this engine ever writes to the row.
    pub fn to_wire(self) -> &'static str {
        match self {
            CallStatus::Ringing => "ringing",
            CallStatus::Active => "active",
            CallStatus::Ended => "ended",
            CallStatus::Rejected => "rejected",
            CallStatus::Missed => "missed",
        }
    }
}

/// The shared Call row (§3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallRow {
    pub id: CallId,
    pub caller_type: Role,
    pub recipient_type: Role,
    pub parent_id: Option<ProfileId>,
    pub child_id: Option<ProfileId>,
    pub family_member_id: Option<ProfileId>,
    pub status: CallStatus,
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub parent_ice_candidates: Vec<IceCandidateRecord>,
    pub child_ice_candidates: Vec<IceCandidateRecord>,
    pub ended_at: Option<Timestamp>,
    pub ended_by: Option<Role>,
    pub created_at: Timestamp,
}

impl CallRow {
    pub fn participant_id(&self, role: Role) -> Option<&ProfileId> {
        match role {
            Role::Parent => self.parent_id.as_ref(),
            Role::Child => self.child_id.as_ref(),
            Role::FamilyMember => self.family_member_id.as_ref(),
        }
    }
}

/// Fields supplied by the caller's endpoint when creating a Call row.
#[derive(Clone, Debug)]
pub struct NewCallRow {
    pub id: CallId,
    pub caller_type: Role,
    pub recipient_type: Role,
    pub parent_id: Option<ProfileId>,
    pub child_id: Option<ProfileId>,
    pub family_member_id: Option<ProfileId>,
    pub offer: SessionDescription,
}

/// A partial update to a Call row. Every field is `Option`; `None` means
/// "leave unchanged", matching the row store's partial-update semantics.
/// This same shape doubles as the partial-payload type delivered by realtime
/// UPDATE events (§4.E): "field is `Some`" means "field appeared in the
/// payload", not "field is non-null in the database".
#[derive(Clone, Debug, Default)]
pub struct CallPatch {
    pub status: Option<CallStatus>,
    pub answer: Option<SessionDescription>,
    pub parent_ice_candidates: Option<Vec<IceCandidateRecord>>,
    pub child_ice_candidates: Option<Vec<IceCandidateRecord>>,
    pub ended_at: Option<Option<Timestamp>>,
    pub ended_by: Option<Role>,
}

impl CallPatch {
    pub fn status(status: CallStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn ended(ended_by: Role, ended_at: Timestamp) -> Self {
        Self {
            status: Some(CallStatus::Ended),
            ended_at: Some(Some(ended_at)),
            ended_by: Some(ended_by),
            ..Default::default()
        }
    }

    pub fn answered(answer: SessionDescription) -> Self {
        Self {
            answer: Some(answer),
            status: Some(CallStatus::Active),
            ended_at: Some(None),
            ..Default::default()
        }
    }

    /// A read-modify-write append to whichever ICE column `field` names
    /// (§4.C `enqueueLocalCandidate`: "appends to the local ICE field").
    pub fn ice_candidates(field: crate::role::IceField, candidates: Vec<IceCandidateRecord>) -> Self {
        let mut patch = CallPatch::default();
        match field {
            crate::role::IceField::ParentIce => patch.parent_ice_candidates = Some(candidates),
            crate::role::IceField::ChildIce => patch.child_ice_candidates = Some(candidates),
        }
        patch
    }
}

/// Which columns to request from `RowStore::fetch`. Selecting fewer columns
/// is both an optimization and a correctness hint: callers must not assume
/// that a column they didn't select comes back populated.
#[derive(Clone, Copy, Debug, Default)]
pub struct Columns {
    pub answer: bool,
    pub status: bool,
    pub parent_ice_candidates: bool,
    pub child_ice_candidates: bool,
}

impl Columns {
    pub fn all() -> Self {
        Columns {
            answer: true,
            status: true,
            parent_ice_candidates: true,
            child_ice_candidates: true,
        }
    }

    pub fn answer_and_status() -> Self {
        Columns {
            answer: true,
            status: true,
            ..Default::default()
        }
    }

    pub fn remote_ice(role: Role) -> Self {
        Columns::for_ice_field(role.remote_ice_field())
    }

    /// Selects whichever column this role appends its own local candidates
    /// to — used by the read-modify-write in `enqueueLocalCandidate` (§4.C).
    pub fn local_ice(role: Role) -> Self {
        Columns::for_ice_field(role.local_ice_field())
    }

    fn for_ice_field(field: crate::role::IceField) -> Self {
        let mut c = Columns::default();
        match field {
            crate::role::IceField::ParentIce => c.parent_ice_candidates = true,
            crate::role::IceField::ChildIce => c.child_ice_candidates = true,
        }
        c
    }
}

/// The Call Record Gateway (§4.B): creates, reads, and updates the shared
/// Call row. Implementors may be backed by any row store with typed
/// insert/update/select on a single `calls` table keyed by `id` (§6).
///
/// Declared as a plain trait (not `dyn`-safe) so `CallEngine<E>` can be
/// generic over it the way the teacher's `CallManager<T: Platform>` is
/// generic over its platform, with no boxing required for the async
/// methods.
pub trait RowStore: Send + Sync + 'static {
    fn insert(&self, row: NewCallRow) -> impl Future<Output = Result<CallRow>> + Send;

    /// Fetches the row. `columns` are a hint only: the returned row's
    /// unselected fields may be left at their zero value and must not be
    /// trusted by the caller.
    fn fetch(&self, id: CallId, columns: Columns) -> impl Future<Output = Result<CallRow>> + Send;

    /// Last-writer-wins on whichever fields `patch` sets.
    fn update(&self, id: CallId, patch: CallPatch) -> impl Future<Output = Result<()>> + Send;
}
