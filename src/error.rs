//! Engine-wide error taxonomy (see design §7).
//!
//! Most variants here are *observed and absorbed*, not propagated to the
//! client application: `TransientStore` retries via polling, `InvalidState`
//! and `DuplicateCandidate` are swallowed at the call site that produced
//! them. Only a handful of variants ever reach the state machine and cause
//! a transition (`PermissionDenied`, `Timeout`, `Validation`, `MediaBusy` on
//! accept).

use thiserror::Error;

use crate::common::CallId;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Network or subscription failure talking to the row store. Never
    /// fatal by itself; the caller falls back to polling / resubscribing.
    #[error("row store error: {0}")]
    TransientStore(String),

    /// The row store rejected the request as unauthorized. Fatal for the
    /// call in progress.
    #[error("row store denied the request")]
    PermissionDenied,

    /// `insert` was called with an id that already exists.
    #[error("call row {0} already exists")]
    Conflict(CallId),

    /// The RTC layer rejected an operation because of its current
    /// signaling/ICE/connection state.
    #[error("invalid rtc state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    /// A candidate was already handed to the RTC layer for this call.
    #[error("duplicate ice candidate")]
    DuplicateCandidate,

    /// Incoming-call validation failed (id mismatch, wrong recipient_type,
    /// missing offer, or a terminal row status).
    #[error("incoming call validation failed: {0}")]
    Validation(String),

    /// Local media device could not be acquired because another
    /// application (or call) is using it.
    #[error("media device unavailable: {0}")]
    MediaBusy(String),

    /// Catch-all for RTC-layer failures that aren't one of the above.
    #[error("rtc layer error: {0}")]
    Rtc(String),

    /// A bounded wait (e.g. for `have-remote-offer`) was exceeded.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

impl EngineError {
    /// `true` for errors that the propagation policy (§7) treats as
    /// "absorb and log", as opposed to ones that drive a state transition.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::TransientStore(_)
                | EngineError::InvalidState { .. }
                | EngineError::DuplicateCandidate
        )
    }
}
