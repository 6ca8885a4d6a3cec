//! Timestamp helper shared by the row schema and the termination coordinator.
//!
//! The engine never calls `SystemTime::now()` directly outside of this
//! module, so tests can construct deterministic rows without depending on
//! wall-clock time.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch, as assigned by the row store on insert
/// or by the termination coordinator on a local hangup.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Timestamp(millis)
    }
}
