//! Media pre-warm / cleanup (§4.K).
//!
//! The concrete media-capture layer is an external collaborator (§1); this
//! module only describes the capability surface and the pre-warm/cleanup
//! policy built on top of it.

use log::{info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    /// The device is already in use by another application or call.
    #[error("media device busy: {0}")]
    Busy(String),
    #[error("{0}")]
    Other(String),
}

/// A local media stream: the set of audio/video tracks this endpoint
/// captured and is sending.
pub trait MediaStream: Send + 'static {
    fn set_audio_enabled(&mut self, enabled: bool);
    fn set_video_enabled(&mut self, enabled: bool);
    /// Stops and releases every track. Idempotent.
    fn stop_all(&mut self);
}

/// Acquires local media on demand. Implementors should treat a concurrent
/// acquisition of an already-open device as `MediaError::Busy`, not a panic
/// or a fatal error — pre-warm deliberately tolerates this (see
/// `prewarm_on_ringing` below).
pub trait MediaProvider: Send + Sync + 'static {
    type Stream: MediaStream;

    fn acquire(&self) -> Result<Self::Stream, MediaError>;
}

/// Begins media acquisition when the state machine enters `ringing`, so that
/// `acceptIncomingCall` is instant. Failures are logged and swallowed: the
/// device will be re-acquired on accept (§4.K).
pub fn prewarm_on_ringing<M: MediaProvider>(provider: &M) -> Option<M::Stream> {
    match provider.acquire() {
        Ok(stream) => Some(stream),
        Err(MediaError::Busy(reason)) => {
            info!("media pre-warm deferred, device busy: {reason}");
            None
        }
        Err(e) => {
            warn!("media pre-warm failed: {e}");
            None
        }
    }
}

/// Runs the cleanup sequence for a terminal transition or an unmount: stops
/// all local tracks. The caller is additionally responsible for closing the
/// RTC peer connection and clearing ICE/timer/channel state (the other parts
/// of §4.K's cleanup sequence live in `termination` and `engine`, since they
/// don't involve media).
pub fn release<S: MediaStream>(stream: &mut Option<S>) {
    if let Some(s) = stream.as_mut() {
        s.stop_all();
    }
    *stream = None;
}
