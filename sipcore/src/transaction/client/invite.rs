use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::message::{IncomingResponse, OutgoingRequest, SipMethod};
use crate::timer::Timer;
use crate::transaction::client::{ClientTransaction, stamp_via};
use crate::transaction::{
    ClientTransactionHandler, Core, State, TIMER_B, TIMER_M, TransactionKey, TransactionKind,
    TransactionLayer, TransactionObserver, timer_d,
};

/// Represents a Client INVITE transaction.
///
/// A 2xx moves it to Accepted (RFC 6026) so that retransmissions of the
/// 2xx still reach the dialog layer. The ACK for a non-2xx final response
/// is sent here; the ACK for a 2xx belongs to the dialog.
#[derive(Clone)]
pub struct InviteClientTransaction(Arc<Inner>);

struct Inner {
    core: Core,
    request: OutgoingRequest,
    machine: Mutex<Machine>,
}

#[derive(Default)]
struct Machine {
    timer_b: Timer,
    timer_d: Timer,
    timer_m: Timer,
    handler: Option<Arc<dyn ClientTransactionHandler>>,
}

impl InviteClientTransaction {
    /// Creates the transaction in Calling and adds it to `layer`.
    pub fn new(
        layer: &Arc<TransactionLayer>,
        mut request: OutgoingRequest,
        handler: Arc<dyn ClientTransactionHandler>,
    ) -> Self {
        let branch = stamp_via(layer, &mut request);
        let key = TransactionKey::new(TransactionKind::InviteClient, branch);
        let tx = Self(Arc::new(Inner {
            core: Core::new(key, layer, State::Calling),
            request,
            machine: Mutex::new(Machine {
                handler: Some(handler),
                ..Default::default()
            }),
        }));

        layer.add_client(ClientTransaction::Invite(tx.clone()));
        tx
    }

    /// Arms Timer B and sends the request.
    pub fn send(&self) {
        self.lock()
            .timer_b
            .start_weak(TIMER_B, &self.0, |inner| Self(inner).timer_b());

        if !self.0.core.send(&self.0.request.to_string()) {
            self.on_transport_error();
        }
    }

    pub fn request(&self) -> &OutgoingRequest {
        &self.0.request
    }

    pub fn key(&self) -> &TransactionKey {
        self.0.core.key()
    }

    pub fn state(&self) -> State {
        self.0.core.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        self.0.core.subscribe()
    }

    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.0.core.add_observer(observer);
    }

    /// Sends a CANCEL for this INVITE. Only has effect in Proceeding, once a
    /// provisional response arrived.
    pub fn cancel(&self, reason: Option<&str>) {
        if self.state() != State::Proceeding {
            return;
        }

        let mut cancel = self
            .0
            .request
            .in_transaction(SipMethod::Cancel, &self.0.request.to().to_string());
        if let Some(reason) = reason {
            cancel.set_header("Reason", reason);
        }

        if !self.0.core.send(&cancel.to_string()) {
            log::warn!("unable to send CANCEL for {}", self.key());
        }
    }

    /// Feeds a response matched to this transaction.
    pub fn receive_response(&self, response: &IncomingResponse) {
        let code = response.status_code();

        let (state, next, deliver, handler) = {
            let mut machine = self.lock();
            let state = self.state();
            let (next, deliver) = match code {
                100..=199 => match state {
                    State::Calling | State::Proceeding => (State::Proceeding, true),
                    _ => return,
                },
                200..=299 => match state {
                    State::Calling | State::Proceeding => {
                        machine.timer_b.cancel();
                        machine
                            .timer_m
                            .start_weak(TIMER_M, &self.0, |inner| Self(inner).timer_m());
                        (State::Accepted, true)
                    }
                    // Retransmission of the 2xx, for the dialog to ACK again.
                    State::Accepted => (State::Accepted, true),
                    _ => return,
                },
                _ => match state {
                    State::Calling | State::Proceeding => {
                        machine.timer_b.cancel();
                        (State::Completed, true)
                    }
                    State::Completed => (State::Completed, false),
                    _ => return,
                },
            };
            if next != state {
                self.0.core.set_state(next);
            }
            (state, next, deliver, machine.handler.clone())
        };

        if next != state {
            self.0.core.notify(next);
        }
        if next == State::Completed {
            self.send_ack(response);
        }
        if deliver {
            if let Some(handler) = handler {
                handler.on_receive_response(response);
            }
        }
    }

    /// ACKs a non-2xx final response and restarts Timer D.
    fn send_ack(&self, response: &IncomingResponse) {
        let to = response.header("To").unwrap_or_default();
        let ack = self.0.request.in_transaction(SipMethod::Ack, to);

        let reliable = self.0.core.is_reliable();
        self.lock()
            .timer_d
            .start_weak(timer_d(reliable), &self.0, |inner| Self(inner).timer_d());

        if !self.0.core.send(&ack.to_string()) {
            log::warn!("unable to send ACK for {}", self.key());
        }
    }

    pub(crate) fn on_transport_error(&self) {
        let state = self.state();
        if let Some(handler) = self.terminate(|state| state != State::Terminated) {
            log::debug!("transport error in {}", self.key());
            if state != State::Accepted {
                handler.on_transport_error();
            }
        }
    }

    fn timer_b(&self) {
        if let Some(handler) = self.terminate(|state| state == State::Calling) {
            log::debug!("Timer B expired for {}", self.key());
            handler.on_request_timeout();
        }
    }

    fn timer_d(&self) {
        self.terminate(|state| state == State::Completed);
    }

    fn timer_m(&self) {
        self.terminate(|state| state == State::Accepted);
    }

    fn terminate(&self, when: impl Fn(State) -> bool) -> Option<Arc<dyn ClientTransactionHandler>> {
        let handler = {
            let mut machine = self.lock();
            if !when(self.state()) {
                return None;
            }
            machine.timer_b.cancel();
            machine.timer_d.cancel();
            machine.timer_m.cancel();
            self.0.core.set_state(State::Terminated);
            machine.handler.take()
        };
        self.0.core.notify(State::Terminated);
        handler
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.0.machine.lock().expect("Lock failed")
    }
}
