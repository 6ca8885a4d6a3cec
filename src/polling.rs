//! Polling Fallback (§4.F).
//!
//! Two distinct timers, both self-terminating from the engine's point of
//! view: answer polling (outgoing side) and ICE polling (both sides). Each
//! is spawned as its own task that performs the fetch and feeds the result
//! back as an `EngineEvent` into the engine's single event loop, rather than
//! touching RTC/row state directly — the polling task itself stays dumb and
//! the reducer (`state::StateMachine` plus the engine's dispatch) decides
//! whether the target condition has been reached.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default cadence for both fallbacks. Source used 500ms for ICE polling
/// before raising it; §9 open question #4 says the exact interval is a
/// tuning parameter, not a contract.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// A handle to a spawned poll loop.
pub struct PollHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Signals the loop to stop after its current tick. Called when the
    /// corresponding realtime channel confirms `SUBSCRIBED`, when the
    /// target condition is reached, on terminal transition, and on
    /// unmount (§4.F, §4.K).
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Stops the loop immediately without waiting for the current tick.
    pub fn abort(&self) {
        self.task.abort();
    }
}

/// Spawns a loop that ticks every `interval` and runs `tick` until `stop()`
/// is called.
pub fn spawn_poll_loop<F, Fut>(interval: Duration, mut tick: F) -> PollHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick().await;
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });
    PollHandle { stop_tx, task }
}
