//! Common types used throughout the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display as StrumDisplay, EnumString};

pub mod time;

/// Common `Result` type for the engine, using [`crate::error::EngineError`].
pub type Result<T> = std::result::Result<T, crate::error::EngineError>;

/// Opaque stable identifier for a local profile (parent, child, or family member).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub String);

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        ProfileId(s.to_string())
    }
}

impl From<String> for ProfileId {
    fn from(s: String) -> Self {
        ProfileId(s)
    }
}

/// Opaque stable identifier for a Call row, the primary key of the shared,
/// realtime-replicated database record (see `row::CallRow`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CallId(pub uuid::Uuid);

impl CallId {
    pub fn new() -> Self {
        CallId(uuid::Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role an endpoint is playing in a call. Drives routing (`role_router`),
/// the realtime subscription filter, and attribution of who ended the call.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize, StrumDisplay, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Parent,
    Child,
    FamilyMember,
}

/// Runtime state of the call as observed by this endpoint.
///
/// `Ringing` is canonical; the source historically also used `incoming` as an
/// alias for the same state (see `CallState::from_legacy_name`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Connecting,
    InCall,
    Ended,
}

impl CallState {
    /// `true` once the state has reached the absorbing terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Ended)
    }

    /// Accepts the legacy `"incoming"` spelling as an alias of `"ringing"`.
    pub fn from_legacy_name(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(CallState::Idle),
            "calling" => Some(CallState::Calling),
            "ringing" | "incoming" => Some(CallState::Ringing),
            "connecting" => Some(CallState::Connecting),
            "in_call" => Some(CallState::InCall),
            "ended" => Some(CallState::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}
