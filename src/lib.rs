//! # famcall-engine -- a parent/child/family-member call signaling core
//!
//! This crate implements the client-side half of a two-party video-calling
//! protocol: role-aware routing between parent/child/family-member
//! endpoints, WebRTC offer/answer negotiation, ICE candidate exchange, and
//! termination coordination, all driven through a single shared row in a
//! realtime-replicated row store.
//!
//! The row store, the RTC peer-connection layer, and the media-capture
//! layer are external collaborators the host application supplies (see
//! `row::RowStore`, `rtc::RtcPeerConnection`, `media::MediaProvider`); this
//! crate only contains the coordination logic layered on top of them.
//! `CallEngine` (in `engine`) is the entry point most hosts embed.

pub mod common;
pub mod error;

pub mod role;
pub mod row;
pub mod rtc;
pub mod media;

pub mod ice;
pub mod answer;
pub mod realtime;
pub mod polling;
pub mod state;

pub mod engine;
mod outgoing;
mod incoming;
mod termination;

/// In-memory fakes for the row store, realtime source, RTC layer, and media
/// provider, used by this crate's own test suite and available to host
/// applications that want to exercise `CallEngine` without a real backend.
#[cfg(any(test, feature = "sim"))]
pub mod sim;
