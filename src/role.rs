//! The Role Router (§4.A).
//!
//! Every other module takes a routing record (or calls these free functions)
//! rather than branching on `Role` itself — this is the one place the
//! parent/child/family-member asymmetry is allowed to live (see design
//! notes, "Role-based conditional branches scattered across handlers").
//!
//! The load-bearing asymmetry: a family member's ICE candidates go into
//! `parent_ice_candidates`, the same field a parent would use. There is no
//! `family_member_ice_candidates` column. The child always reads remote ICE
//! from `parent_ice_candidates` regardless of which adult role is on the
//! other end.

use crate::common::{ProfileId, Role};
use crate::row::CallRow;

/// Which id column identifies a participant for a given role.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdField {
    ParentId,
    ChildId,
    FamilyMemberId,
}

/// Which ICE array column a role's local candidates are appended to (and,
/// from the other side, read from).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IceField {
    ParentIce,
    ChildIce,
}

impl Role {
    /// The id column that identifies *this* role's participant.
    pub fn local_id_field(self) -> IdField {
        match self {
            Role::Parent => IdField::ParentId,
            Role::Child => IdField::ChildId,
            Role::FamilyMember => IdField::FamilyMemberId,
        }
    }

    /// The ICE column this role appends its own candidates to.
    ///
    /// `FamilyMember` intentionally returns the same field as `Parent` —
    /// this is the asymmetry documented above, not an omission.
    pub fn local_ice_field(self) -> IceField {
        match self {
            Role::Parent | Role::FamilyMember => IceField::ParentIce,
            Role::Child => IceField::ChildIce,
        }
    }

    /// The ICE column this role reads its peer's candidates from.
    pub fn remote_ice_field(self) -> IceField {
        match self.local_ice_field() {
            IceField::ParentIce => IceField::ChildIce,
            IceField::ChildIce => IceField::ParentIce,
        }
    }

    /// The `recipient_type` value used to filter the incoming-call realtime
    /// subscription for this role.
    pub fn recipient_filter(self) -> Role {
        self
    }
}

impl IdField {
    pub fn read<'a>(self, row: &'a CallRow) -> Option<&'a ProfileId> {
        match self {
            IdField::ParentId => row.parent_id.as_ref(),
            IdField::ChildId => row.child_id.as_ref(),
            IdField::FamilyMemberId => row.family_member_id.as_ref(),
        }
    }
}

impl IceField {
    pub fn read(self, row: &CallRow) -> &[crate::row::IceCandidateRecord] {
        match self {
            IceField::ParentIce => &row.parent_ice_candidates,
            IceField::ChildIce => &row.child_ice_candidates,
        }
    }
}

/// Resolves the remote participant id for a routing table. The child role is
/// the one case where the remote id field is ambiguous at the type level
/// (the caller may be a parent or a family member); this resolves it by
/// reading `caller_type` off the row.
pub fn remote_participant_id(local_role: Role, row: &CallRow) -> Option<ProfileId> {
    match local_role {
        Role::Parent => row.child_id.clone(),
        Role::FamilyMember => row.child_id.clone(),
        Role::Child => match row.caller_type {
            Role::Parent => row.parent_id.clone(),
            Role::FamilyMember => row.family_member_id.clone(),
            Role::Child => None,
        },
    }
}
