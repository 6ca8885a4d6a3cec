//! Termination Coordinator (§4.J).

use log::warn;

use crate::common::{time::Timestamp, Role};
use crate::engine::{CallEngine, Environment, HostNotification};
use crate::row::{CallPatch, RowStore};
use crate::state::Event;

impl<E: Environment> CallEngine<E> {
    /// `endCall()` (§6, §4.J "to end a call locally").
    pub async fn end_call(&mut self) {
        if self.sm.state().is_terminal() {
            return;
        }
        let Some(call_id) = self.sm.call_id() else {
            self.sm.apply(Event::UserEnd);
            self.on_possibly_entered_ended();
            return;
        };

        let patch = CallPatch::ended(self.role, Timestamp::now());
        if let Err(e) = self.env.store().update(call_id, patch).await {
            warn!("end_call: row update failed, proceeding to local cleanup anyway: {e}");
        }

        self.sm.apply(Event::UserEnd);
        self.on_possibly_entered_ended();
    }

    /// Remote-termination detection (§4.J, second half): called when an
    /// UPDATE event or poll result reveals a terminal `status`.
    pub(crate) fn observe_remote_terminal(&mut self, ended_by: Option<Role>) {
        if self.sm.state().is_terminal() {
            return;
        }
        let already_self_ended = self.cleaned_up;
        self.sm.apply(Event::RemoteTerminal);

        if already_self_ended {
            // We already ran our own local end_call's cleanup; this is just
            // the row catching up to our own write.
            self.on_possibly_entered_ended();
            return;
        }

        match ended_by {
            Some(by) if by == self.role => {
                // Self-ended, observed via our own write echoing back: no
                // notification.
            }
            Some(_other) => {
                self.notify(HostNotification::RemoteEndedCall);
            }
            None => {
                self.notify(HostNotification::CallEndedUnknownParty);
            }
        }
        self.on_possibly_entered_ended();
    }
}
