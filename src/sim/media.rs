//! A fake local media stream standing in for the media-capture layer (§1,
//! external collaborator; §4.K pre-warm/cleanup).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::media::{MediaError, MediaProvider, MediaStream};

/// Acquires [`SimMediaStream`]s. `set_busy` simulates another application
/// (or a racing pre-warm/accept) holding the device.
#[derive(Default)]
pub struct SimMediaProvider {
    busy: AtomicBool,
}

impl SimMediaProvider {
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }
}

impl MediaProvider for SimMediaProvider {
    type Stream = SimMediaStream;

    fn acquire(&self) -> Result<Self::Stream, MediaError> {
        if self.busy.load(Ordering::SeqCst) {
            Err(MediaError::Busy("device in use".into()))
        } else {
            Ok(SimMediaStream {
                audio_enabled: true,
                video_enabled: true,
                stopped: false,
            })
        }
    }
}

pub struct SimMediaStream {
    pub audio_enabled: bool,
    pub video_enabled: bool,
    pub stopped: bool,
}

impl MediaStream for SimMediaStream {
    fn set_audio_enabled(&mut self, enabled: bool) {
        self.audio_enabled = enabled;
    }

    fn set_video_enabled(&mut self, enabled: bool) {
        self.video_enabled = enabled;
    }

    fn stop_all(&mut self) {
        self.stopped = true;
    }
}
