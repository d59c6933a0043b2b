use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::message::IncomingRequest;
use crate::timer::Timer;
use crate::transaction::server::{Origin, ServerTransaction};
use crate::transaction::{
    Core, PROVISIONAL_RESPONSE_INTERVAL, State, TIMER_H, TIMER_L, TransactionKey,
    TransactionKind, TransactionLayer, TransactionObserver, timer_i,
};

/// Represents a Server INVITE transaction.
///
/// Created in Proceeding; a `100 Trying` goes out as soon as it exists.
/// Provisional responses other than 100 are sent again every
/// [`PROVISIONAL_RESPONSE_INTERVAL`] until a final response is sent.
#[derive(Clone)]
pub struct InviteServerTransaction(Arc<Inner>);

struct Inner {
    core: Core,
    origin: Origin,
    machine: Mutex<Machine>,
}

#[derive(Default)]
struct Machine {
    timer_h: Timer,
    timer_i: Timer,
    timer_l: Timer,
    resend_provisional: Timer,
    last_response: Option<String>,
}

impl InviteServerTransaction {
    /// Creates the transaction, attaches it to `request` and replies
    /// `100 Trying`.
    pub fn new(layer: &Arc<TransactionLayer>, request: &mut IncomingRequest) -> Self {
        let branch = request.via_branch().unwrap_or_default();
        let key = TransactionKey::new(TransactionKind::InviteServer, branch);
        let tx = Self(Arc::new(Inner {
            core: Core::new(key, layer, State::Proceeding),
            origin: Origin::of(request),
            machine: Mutex::default(),
        }));

        layer.add_server(ServerTransaction::Invite(tx.clone()));
        request.server_transaction = Some(ServerTransaction::Invite(tx.clone()));

        if let Err(err) = request.reply(100, None, &[], None) {
            log::debug!("unable to send 100 Trying: {}", err);
        }
        tx
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

    pub(crate) fn receive_response(&self, code: u16, response: String) -> Result<()> {
        match code {
            100..=199 => {
                {
                    let mut machine = self.lock();
                    if self.state() != State::Proceeding {
                        return Ok(());
                    }
                    machine.last_response = Some(response.clone());
                    if code > 100 && !machine.resend_provisional.is_active() {
                        let weak = Arc::downgrade(&self.0);
                        machine
                            .resend_provisional
                            .interval(PROVISIONAL_RESPONSE_INTERVAL, move || {
                                if let Some(inner) = weak.upgrade() {
                                    Self(inner).resend_provisional();
                                }
                            });
                    }
                }
                self.send(&response)
            }
            200..=299 => {
                let accepted = {
                    let mut machine = self.lock();
                    match self.state() {
                        State::Proceeding => {
                            machine.resend_provisional.cancel();
                            machine.last_response = Some(response.clone());
                            machine
                                .timer_l
                                .start_weak(TIMER_L, &self.0, |inner| Self(inner).timer_l());
                            self.0.core.set_state(State::Accepted);
                            true
                        }
                        // Retransmission of our 2xx, requested by the dialog.
                        State::Accepted => false,
                        _ => return Ok(()),
                    }
                };
                if accepted {
                    self.0.core.notify(State::Accepted);
                }
                self.send(&response)
            }
            _ => {
                {
                    let mut machine = self.lock();
                    if self.state() != State::Proceeding {
                        return Ok(());
                    }
                    machine.resend_provisional.cancel();
                }
                self.send(&response)?;

                {
                    let mut machine = self.lock();
                    machine.last_response = Some(response);
                    machine
                        .timer_h
                        .start_weak(TIMER_H, &self.0, |inner| Self(inner).timer_h());
                    self.0.core.set_state(State::Completed);
                }
                self.0.core.notify(State::Completed);
                Ok(())
            }
        }
    }

    fn send(&self, response: &str) -> Result<()> {
        if self.0.core.send(response) {
            Ok(())
        } else {
            self.on_transport_error();
            Err(Error::Transport)
        }
    }

    /// Sends the cached response again, for a retransmitted INVITE.
    pub(crate) fn resend_last_response(&self) {
        let last_response = self.lock().last_response.clone();
        if let Some(response) = last_response {
            self.0.core.send(&response);
        }
    }

    /// The ACK for our non-2xx final response arrived.
    pub(crate) fn confirm(&self) {
        {
            let mut machine = self.lock();
            if self.state() != State::Completed {
                return;
            }
            machine.timer_h.cancel();
            let reliable = self.0.core.is_reliable();
            machine
                .timer_i
                .start_weak(timer_i(reliable), &self.0, |inner| Self(inner).timer_i());
            self.0.core.set_state(State::Confirmed);
        }
        self.0.core.notify(State::Confirmed);
    }

    pub(crate) fn is_merged_with(&self, request: &IncomingRequest) -> bool {
        self.0.origin.matches(request)
    }

    pub(crate) fn on_transport_error(&self) {
        if self.terminate(|state| state != State::Terminated) {
            log::debug!("transport error in {}", self.key());
        }
    }

    fn resend_provisional(&self) {
        let last_response = self.lock().last_response.clone();
        if let Some(response) = last_response {
            if !self.0.core.send(&response) {
                self.on_transport_error();
            }
        }
    }

    fn timer_h(&self) {
        let completed = self.state() == State::Completed;
        if self.terminate(|state| state != State::Terminated) && completed {
            log::debug!("ACK not received, dialog will be terminated");
        }
    }

    fn timer_i(&self) {
        self.terminate(|state| state == State::Confirmed);
    }

    fn timer_l(&self) {
        self.terminate(|state| state == State::Accepted);
    }

    fn terminate(&self, when: impl Fn(State) -> bool) -> bool {
        {
            let mut machine = self.lock();
            if !when(self.state()) {
                return false;
            }
            machine.timer_h.cancel();
            machine.timer_i.cancel();
            machine.timer_l.cancel();
            machine.resend_provisional.cancel();
            self.0.core.set_state(State::Terminated);
        }
        self.0.core.notify(State::Terminated);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.0.machine.lock().expect("Lock failed")
    }
}
