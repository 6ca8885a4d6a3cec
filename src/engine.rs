//! The top-level `CallEngine` (§6, "Engine API (exposed to host)").
//!
//! `CallEngine<E>` is the "god object" that wires together the Role Router,
//! Call Record Gateway, ICE Exchange, Answer Applier, Realtime Subscriber,
//! Polling Fallback, State Machine, and Termination Coordinator — the
//! teacher's equivalent is `CallManager<T: Platform>`. `Environment`
//! plays the role of the teacher's `Platform` trait: one bundle of
//! associated types standing in for every external collaborator (row
//! store, realtime source, RTC layer, media), injected rather than reached
//! for as a global singleton (design notes, "Global singletons for RTC and
//! row-store clients").
//!
//! Per §5's single-threaded cooperative model, every state mutation happens
//! either directly inside a public API method or inside `drain_events`,
//! which processes one queued `EngineEvent` at a time off the single
//! `events_rx` channel. Nothing outside this module mutates `CallEngine`
//! state from a spawned task; spawned tasks (realtime relays, polling
//! loops, the RTC observer) only ever push an `EngineEvent`.

use std::sync::Arc;

use log::{info, warn};
use tokio::sync::mpsc;

use crate::common::{CallId, ProfileId, Role};
use crate::common::Result;
use crate::ice::IceExchange;
use crate::answer::AnswerApplier;
use crate::media::{MediaProvider, MediaStream};
use crate::polling::PollHandle;
use crate::realtime::RealtimeSource;
use crate::row::{CallPatch, CallRow, IceCandidateRecord, RowStore};
use crate::rtc::{
    IceConnectionState, PeerConnectionState, RtcEvent, RtcObserver, RtcPeerConnection,
    SignalingState,
};
use crate::state::{Event, StateMachine};

/// Bundles every external collaborator the engine needs, the way the
/// teacher's `Platform` trait bundles `AppMediaStream`/`AppRemotePeer`/
/// `AppConnection`/`AppCallContext`.
pub trait Environment: Send + Sync + 'static {
    type Store: RowStore;
    type Realtime: RealtimeSource;
    type Connection: RtcPeerConnection;
    type Media: MediaProvider;

    fn store(&self) -> Arc<Self::Store>;
    fn realtime(&self) -> Arc<Self::Realtime>;
    fn media(&self) -> Arc<Self::Media>;

    /// Creates a new peer connection wired to deliver its observer events
    /// to `observer`.
    fn create_connection(&self, observer: Arc<dyn RtcObserver>) -> Result<Self::Connection>;
}

/// Events processed one at a time by `drain_events` (§5). Spawned tasks
/// (realtime relays, poll loops, the RTC observer) only ever construct one
/// of these and send it — they never touch engine state directly.
#[derive(Clone, Debug)]
pub enum EngineEvent {
    InsertSeen(CallRow),
    RowUpdate { call_id: CallId, patch: CallPatch },
    RealtimeSubscribed,
    RealtimeChannelError,
    AnswerPollResult(CallRow),
    IcePollResult(Vec<IceCandidateRecord>),
    LocalIceGathered(crate::rtc::LocalIceEvent),
    SignalingStateChanged(SignalingState),
    IceConnectionStateChanged(IceConnectionState),
    ConnectionStateChanged(PeerConnectionState),
}

/// Notifications the engine asks the host to surface (§6, "Redirect
/// contract"; §4.J termination attribution). The engine never renders UI
/// itself — it only requests.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum HostNotification {
    /// Entered `ringing`: host should play the incoming-call surface.
    Ringing,
    /// The remote side ended the call; show a "call ended" toast.
    RemoteEndedCall,
    /// A terminal row had no `ended_by` (legacy row); show a generic toast.
    CallEndedUnknownParty,
    /// `acceptIncomingCall` was refused; host should toast and return to
    /// the prior surface.
    AcceptRefused(String),
    /// Entered `ended`: host should navigate to the role-specific home
    /// surface.
    NavigateHome,
}

struct EngineRtcObserver {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl RtcObserver for EngineRtcObserver {
    fn on_event(&self, event: RtcEvent) {
        let mapped = match event {
            RtcEvent::LocalIceCandidateGathered(c) => EngineEvent::LocalIceGathered(c),
            RtcEvent::SignalingStateChanged(s) => EngineEvent::SignalingStateChanged(s),
            RtcEvent::IceConnectionStateChanged(s) => EngineEvent::IceConnectionStateChanged(s),
            RtcEvent::ConnectionStateChanged(s) => EngineEvent::ConnectionStateChanged(s),
        };
        let _ = self.tx.send(mapped);
    }
}

pub struct CallEngine<E: Environment> {
    pub(crate) env: E,
    pub(crate) role: Role,
    pub(crate) profile_id: ProfileId,

    pub(crate) sm: StateMachine,
    pub(crate) ice: IceExchange,
    pub(crate) answer_applier: AnswerApplier,

    pub(crate) pc: Option<E::Connection>,
    pub(crate) media_stream: Option<<E::Media as MediaProvider>::Stream>,

    pub(crate) events_tx: mpsc::UnboundedSender<EngineEvent>,
    pub(crate) events_rx: mpsc::UnboundedReceiver<EngineEvent>,
    pub(crate) notify_tx: mpsc::UnboundedSender<HostNotification>,
    pub(crate) notify_rx: mpsc::UnboundedReceiver<HostNotification>,

    pub(crate) insert_relay: Option<tokio::task::JoinHandle<()>>,
    pub(crate) call_relay: Option<tokio::task::JoinHandle<()>>,
    pub(crate) answer_poll: Option<PollHandle>,
    pub(crate) ice_poll: Option<PollHandle>,
    pub(crate) per_call_subscribed: bool,

    pub(crate) is_muted: bool,
    pub(crate) is_video_off: bool,
    pub(crate) cleaned_up: bool,
}

impl<E: Environment> CallEngine<E> {
    pub fn new(env: E, role: Role, profile_id: ProfileId) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let mut engine = CallEngine {
            env,
            role,
            profile_id,
            sm: StateMachine::new(role),
            ice: IceExchange::new(),
            answer_applier: AnswerApplier::new(),
            pc: None,
            media_stream: None,
            events_tx,
            events_rx,
            notify_tx,
            notify_rx,
            insert_relay: None,
            call_relay: None,
            answer_poll: None,
            ice_poll: None,
            per_call_subscribed: false,
            is_muted: false,
            is_video_off: false,
            cleaned_up: true,
        };
        engine.subscribe_incoming();
        engine
    }

    /// Subscribes to the incoming-call channel for this endpoint's role
    /// (§4.E channel 1), relaying every event into `events_tx`.
    fn subscribe_incoming(&mut self) {
        let mut rx = self.env.realtime().subscribe_inserts(self.role.recipient_filter());
        let tx = self.events_tx.clone();
        let local_profile = self.profile_id.clone();
        let local_role = self.role;
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    crate::realtime::RealtimeEvent::Insert(row) => {
                        // §4.E: discard mismatches on our own-id field with a diagnostic.
                        let own_id = row.participant_id(local_role);
                        if own_id != Some(&local_profile) {
                            warn!(
                                "incoming-call channel: discarding insert, own id {} not present on row",
                                local_profile
                            );
                            continue;
                        }
                        let _ = tx.send(EngineEvent::InsertSeen(row));
                    }
                    // Subscription lifecycle events on the insert channel aren't
                    // wired to polling fallback (nothing to poll for before a
                    // call exists); only the per-call channel drives polling.
                    crate::realtime::RealtimeEvent::Subscribed
                    | crate::realtime::RealtimeEvent::ChannelError => {}
                    crate::realtime::RealtimeEvent::Update { .. } => {}
                }
            }
        });
        self.insert_relay = Some(handle);
    }

    /// Subscribes to the per-call channel (§4.E channel 2) for `call_id`,
    /// relaying events into `events_tx`.
    pub(crate) fn subscribe_call(&mut self, call_id: CallId) {
        self.per_call_subscribed = false;
        let mut rx = self.env.realtime().subscribe_call(call_id);
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let mapped = match event {
                    crate::realtime::RealtimeEvent::Subscribed => EngineEvent::RealtimeSubscribed,
                    crate::realtime::RealtimeEvent::ChannelError => EngineEvent::RealtimeChannelError,
                    crate::realtime::RealtimeEvent::Insert(_) => continue,
                    crate::realtime::RealtimeEvent::Update { call_id, patch } => {
                        EngineEvent::RowUpdate { call_id, patch }
                    }
                };
                let _ = tx.send(mapped);
            }
        });
        self.call_relay = Some(handle);
    }

    pub(crate) fn observer(&self) -> Arc<dyn RtcObserver> {
        Arc::new(EngineRtcObserver {
            tx: self.events_tx.clone(),
        })
    }

    /// Current observable `CallState` (§6).
    pub fn state(&self) -> crate::common::CallState {
        self.sm.state()
    }

    /// Current observable `callId` (§6).
    pub fn call_id(&self) -> Option<CallId> {
        self.sm.call_id()
    }

    pub fn is_muted(&self) -> bool {
        self.is_muted
    }

    pub fn is_video_off(&self) -> bool {
        self.is_video_off
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn profile_id(&self) -> &ProfileId {
        &self.profile_id
    }

    /// Drains queued host notifications (redirect contract, termination
    /// attribution toasts).
    pub fn drain_notifications(&mut self) -> Vec<HostNotification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notify_rx.try_recv() {
            out.push(n);
        }
        out
    }

    pub(crate) fn notify(&mut self, n: HostNotification) {
        let _ = self.notify_tx.send(n);
    }

    /// `toggleMute()` (§6): flips the `enabled` flag on the existing audio
    /// track. No-op if there are no tracks (§5: must not replace tracks
    /// mid-call).
    pub fn toggle_mute(&mut self) {
        self.is_muted = !self.is_muted;
        if let Some(stream) = self.media_stream.as_mut() {
            stream.set_audio_enabled(!self.is_muted);
        }
    }

    /// `toggleVideo()` (§6).
    pub fn toggle_video(&mut self) {
        self.is_video_off = !self.is_video_off;
        if let Some(stream) = self.media_stream.as_mut() {
            stream.set_video_enabled(!self.is_video_off);
        }
    }

    /// Processes every event currently queued, without blocking for more.
    /// This is the "thin effect runner" the design notes call for: it reads
    /// one `EngineEvent` at a time and dispatches to the handler that knows
    /// what to do with it.
    pub async fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    /// Blocks until the next event is available (or the channel is
    /// permanently empty because every sender was dropped), then processes
    /// every event currently queued. Intended to be run in a host-driven
    /// loop: `while engine.run_once().await {}`.
    pub async fn run_once(&mut self) -> bool {
        match self.events_rx.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                self.drain_events().await;
                true
            }
            None => false,
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::InsertSeen(row) => self.handle_insert_seen(row).await,
            EngineEvent::RowUpdate { call_id, patch } => self.handle_row_update(call_id, patch).await,
            EngineEvent::RealtimeSubscribed => self.handle_realtime_subscribed(),
            EngineEvent::RealtimeChannelError => self.handle_realtime_channel_error(),
            EngineEvent::AnswerPollResult(row) => self.handle_answer_poll_result(row).await,
            EngineEvent::IcePollResult(candidates) => self.handle_ice_poll_result(candidates),
            EngineEvent::LocalIceGathered(c) => self.handle_local_ice_gathered(c).await,
            EngineEvent::SignalingStateChanged(_) => {}
            EngineEvent::IceConnectionStateChanged(s) => self.handle_ice_connection_state_changed(s).await,
            EngineEvent::ConnectionStateChanged(s) => self.handle_connection_state_changed(s).await,
        }
    }

    fn handle_realtime_subscribed(&mut self) {
        self.per_call_subscribed = true;
        info!("per-call channel subscribed, stopping poll fallbacks guarded on it");
        if let Some(h) = self.answer_poll.take() {
            h.stop();
        }
    }

    fn handle_realtime_channel_error(&mut self) {
        self.per_call_subscribed = false;
        warn!("per-call channel error, relying on polling fallback");
    }

    pub(crate) fn log_transition(&self, t: &crate::state::Transition) {
        info!(
            "state transition: {} -> {} (call_id: {:?}, role: {}, reason: {})",
            t.from, t.to, t.call_id, t.role, t.reason
        );
    }

    /// Common terminal-state bookkeeping: runs cleanup exactly once no
    /// matter which path drove the transition (§4.G, §4.J, §4.K).
    pub(crate) fn on_possibly_entered_ended(&mut self) {
        if self.sm.state().is_terminal() && !self.cleaned_up {
            self.cleanup();
            self.notify(HostNotification::NavigateHome);
        }
    }

    /// Idempotent cleanup sequence (§4.K): stop media, close the peer
    /// connection, clear ICE state, cancel timers and channels.
    ///
    /// This also tears down the incoming-call subscription. `CallState` has
    /// no transition back out of `Ended` (it is absorbing, §4.G), so once a
    /// call this engine is party to reaches a terminal state there is no
    /// further use for a listener that exists only to notice the *next* one
    /// — a `CallEngine` is single-use and spent after its one call ends.
    /// Construct a new `CallEngine` for the next call.
    pub(crate) fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;

        crate::media::release(&mut self.media_stream);

        if let Some(pc) = self.pc.take() {
            pc.close();
        }
        self.ice.clear();

        if let Some(h) = self.answer_poll.take() {
            h.abort();
        }
        if let Some(h) = self.ice_poll.take() {
            h.abort();
        }
        if let Some(h) = self.call_relay.take() {
            h.abort();
        }
        if let Some(h) = self.insert_relay.take() {
            h.abort();
        }
        self.per_call_subscribed = false;
    }

    /// Forces cleanup regardless of state, for the host's unmount
    /// equivalent (§4.K): "force cleanup regardless of state so that the
    /// camera/microphone are released." Like the terminal-transition path,
    /// this spends the engine instance; it is not meant to be reused.
    pub fn force_cleanup_on_unmount(&mut self) {
        self.cleaned_up = false;
        self.cleanup();
    }

    /// Reacts to `connectionState` changes on the peer connection (§4.G):
    /// `connected` drives `Connecting -> InCall`; `failed`/`closed` drive any
    /// non-terminal state to `Ended`. `disconnected` is transient and is
    /// intentionally not matched here (§4.G, §8 invariant 7).
    pub(crate) async fn handle_connection_state_changed(&mut self, state: PeerConnectionState) {
        let event = match state {
            PeerConnectionState::Connected => Event::RtcConnected,
            PeerConnectionState::Failed | PeerConnectionState::Closed => Event::RtcFailedOrClosed,
            PeerConnectionState::New | PeerConnectionState::Connecting | PeerConnectionState::Disconnected => {
                return;
            }
        };
        if let Some(t) = self.sm.apply(event) {
            self.log_transition(&t);
        }
        self.on_possibly_entered_ended();
    }

    /// Reacts to `iceConnectionState` changes (§4.F): the ICE polling
    /// fallback's target condition is reached once ICE has converged (or
    /// failed/closed), regardless of what the overall `connectionState`
    /// says. `disconnected` does not stop polling and does not end the call
    /// (§4.G).
    pub(crate) async fn handle_ice_connection_state_changed(&mut self, state: IceConnectionState) {
        match state {
            IceConnectionState::Connected
            | IceConnectionState::Completed
            | IceConnectionState::Failed
            | IceConnectionState::Closed => {
                if let Some(h) = self.ice_poll.take() {
                    h.stop();
                }
            }
            IceConnectionState::Disconnected => {
                info!("ice connection state: disconnected (transient, no transition)");
            }
            IceConnectionState::New | IceConnectionState::Checking => {}
        }
    }

    pub(crate) fn begin_new_call(&mut self, call_id: CallId) {
        self.cleaned_up = false;
        self.ice.clear();
        self.answer_applier = AnswerApplier::new();
        self.sm.set_call_id(Some(call_id));
        self.media_stream = None;
    }
}

impl<E: Environment> Drop for CallEngine<E> {
    fn drop(&mut self) {
        self.cleanup();
        // `cleanup()` only runs its body (and so only aborts `insert_relay`)
        // once a call has actually started and ended; an engine dropped
        // before ever placing or receiving a call still holds the
        // incoming-call subscription it opened in `new()`.
        if let Some(h) = self.insert_relay.take() {
            h.abort();
        }
    }
}
