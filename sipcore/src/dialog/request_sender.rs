use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::dialog::Dialog;
use crate::message::{IncomingResponse, OutgoingRequest, SipMethod};
use crate::request_sender::{RequestEventHandler, RequestSender};
use crate::timer::Timer;
use crate::transaction::{State, TransactionObserver};

/// Delay before an INVITE answered with 491 is sent again.
const GLARE_RETRY: Duration = Duration::from_secs(1);

/// Receives the outcome of a request sent within a dialog.
pub trait DialogRequestHandler: Send + Sync {
    fn on_success_response(&self, _response: &IncomingResponse) {}

    fn on_error_response(&self, _response: &IncomingResponse) {}

    fn on_request_timeout(&self) {}

    fn on_transport_error(&self) {}

    /// A 408 or 481: the remote side lost the dialog (RFC 3261 12.2.1.2).
    fn on_dialog_error(&self, _response: &IncomingResponse) {}
}

/// Used when the caller does not care about the outcome.
pub(super) struct IgnoreOutcome;

impl DialogRequestHandler for IgnoreOutcome {}

/// Sends one request within a dialog.
///
/// Session modifying requests mark the dialog while their answer is
/// pending, and an INVITE hitting glare (491) is sent once more after
/// [`GLARE_RETRY`] with a new CSeq.
#[derive(Clone)]
pub struct DialogRequestSender(Arc<Inner>);

struct Inner {
    this: Weak<Inner>,
    dialog: Dialog,
    handler: Arc<dyn DialogRequestHandler>,
    state: Mutex<SenderState>,
}

struct SenderState {
    request: OutgoingRequest,
    reattempt: bool,
    timer: Timer,
}

impl DialogRequestSender {
    pub fn new(
        dialog: &Dialog,
        request: OutgoingRequest,
        handler: Arc<dyn DialogRequestHandler>,
    ) -> Self {
        Self(Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            dialog: dialog.clone(),
            handler,
            state: Mutex::new(SenderState {
                request,
                reattempt: false,
                timer: Timer::new(),
            }),
        }))
    }

    pub fn send(&self) {
        self.0.send();
    }
}

impl Inner {
    fn send(&self) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let Ok(ua) = self.dialog.ua() else {
            self.handler.on_transport_error();
            return;
        };

        let request = self.lock().request.clone();
        let has_body = request.body().is_some_and(|body| !body.is_empty());
        let modifies_session = request.method().modifies_session(has_body);

        let Some(transaction) = RequestSender::new(&ua, request, this).send() else {
            return;
        };

        // RFC 3261 14.1
        if modifies_session && transaction.state() != Some(State::Terminated) {
            self.dialog.set_uac_pending_reply(true);
            transaction.add_observer(Arc::new(UacPendingReset(self.dialog.clone())));
        }
    }

    fn receive_response(&self, response: &IncomingResponse) {
        let code = response.status_code();
        match code {
            408 | 481 => self.handler.on_dialog_error(response),
            491 if *response.method() == SipMethod::Invite => self.receive_glare(response),
            200..=299 => self.handler.on_success_response(response),
            300..=699 => self.handler.on_error_response(response),
            _ => (),
        }
    }

    fn receive_glare(&self, response: &IncomingResponse) {
        let mut state = self.lock();
        if state.reattempt {
            drop(state);
            self.handler.on_error_response(response);
            return;
        }

        let cseq = self.dialog.next_local_seqnum();
        state.request.set_cseq(cseq);

        let Some(this) = self.this.upgrade() else {
            return;
        };
        state.timer.start(GLARE_RETRY, move || {
            let terminated = this
                .dialog
                .owner()
                .is_none_or(|owner| owner.is_terminated());
            if terminated {
                return;
            }
            this.lock().reattempt = true;
            this.send();
        });
    }

    fn lock(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().expect("Lock failed")
    }
}

impl RequestEventHandler for Inner {
    fn on_receive_response(&self, response: &IncomingResponse) {
        self.receive_response(response);
    }

    fn on_request_timeout(&self) {
        self.handler.on_request_timeout();
    }

    fn on_transport_error(&self) {
        self.handler.on_transport_error();
    }

    fn on_authenticated(&self, _request: &OutgoingRequest) {
        self.dialog.next_local_seqnum();
    }
}

/// Clears `uac_pending_reply` once the answer to our session modifying
/// request is final.
struct UacPendingReset(Dialog);

impl TransactionObserver for UacPendingReset {
    fn on_state_changed(&self, state: State) -> bool {
        if matches!(state, State::Accepted | State::Completed | State::Terminated) {
            self.0.set_uac_pending_reply(false);
            return false;
        }
        true
    }
}
