use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::message::IncomingRequest;
use crate::timer::Timer;
use crate::transaction::server::{Origin, ServerTransaction};
use crate::transaction::{
    Core, State, TransactionKey, TransactionKind, TransactionLayer, TransactionObserver, timer_j,
};

/// Represents a Server Non INVITE transaction.
#[derive(Clone)]
pub struct NonInviteServerTransaction(Arc<Inner>);

struct Inner {
    core: Core,
    origin: Origin,
    machine: Mutex<Machine>,
}

#[derive(Default)]
struct Machine {
    timer_j: Timer,
    last_response: Option<String>,
}

impl NonInviteServerTransaction {
    /// Creates the transaction in Trying, adds it to `layer` and attaches it
    /// to `request` so replies go through it.
    pub fn new(layer: &Arc<TransactionLayer>, request: &mut IncomingRequest) -> Self {
        let branch = request.via_branch().unwrap_or_default();
        let key = TransactionKey::new(TransactionKind::NonInviteServer, branch);
        let tx = Self(Arc::new(Inner {
            core: Core::new(key, layer, State::Trying),
            origin: Origin::of(request),
            machine: Mutex::default(),
        }));

        layer.add_server(ServerTransaction::NonInvite(tx.clone()));
        request.server_transaction = Some(ServerTransaction::NonInvite(tx.clone()));
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
        let changed = {
            let mut machine = self.lock();
            let changed = match (code, self.state()) {
                (100, State::Trying) => Some(State::Proceeding),
                (100, State::Proceeding) => None,
                (200..=699, State::Trying | State::Proceeding) => {
                    let reliable = self.0.core.is_reliable();
                    machine
                        .timer_j
                        .start_weak(timer_j(reliable), &self.0, |inner| Self(inner).timer_j());
                    Some(State::Completed)
                }
                _ => {
                    log::debug!("ignoring {} response in {}", code, self.key());
                    return Ok(());
                }
            };
            if let Some(state) = changed {
                self.0.core.set_state(state);
            }
            machine.last_response = Some(response.clone());
            changed
        };

        if let Some(state) = changed {
            self.0.core.notify(state);
        }

        if self.0.core.send(&response) {
            Ok(())
        } else {
            self.on_transport_error();
            Err(Error::Transport)
        }
    }

    /// Sends the cached response again, for a retransmitted request.
    pub(crate) fn resend_last_response(&self) {
        let last_response = self.lock().last_response.clone();
        if let Some(response) = last_response {
            self.0.core.send(&response);
        }
    }

    pub(crate) fn is_merged_with(&self, request: &IncomingRequest) -> bool {
        self.0.origin.matches(request)
    }

    pub(crate) fn on_transport_error(&self) {
        if self.terminate(|state| state != State::Terminated) {
            log::debug!("transport error in {}", self.key());
        }
    }

    fn timer_j(&self) {
        self.terminate(|state| state == State::Completed);
    }

    fn terminate(&self, when: impl Fn(State) -> bool) -> bool {
        {
            let mut machine = self.lock();
            if !when(self.state()) {
                return false;
            }
            machine.timer_j.cancel();
            self.0.core.set_state(State::Terminated);
        }
        self.0.core.notify(State::Terminated);
        true
    }

    fn lock(&self) -> MutexGuard<'_, Machine> {
        self.0.machine.lock().expect("Lock failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;
    use crate::test_utils::transaction::server_context;
    use crate::transaction::TIMER_F;
    use crate::assert_state_eq;

    #[tokio::test(start_paused = true)]
    async fn non_invite_transitions_from_trying_to_proceeding_when_sending_100() {
        let mut ctx = server_context(SipMethod::Options);
        let uas = NonInviteServerTransaction::new(&ctx.layer, &mut ctx.request);
        let mut state = uas.subscribe();

        ctx.request.reply(100, None, &[], None).unwrap();

        assert_state_eq!(state, State::Proceeding, "should transition to Proceeding after 100");
        assert_eq!(ctx.transport.sent_count(), 1);

        ctx.request.reply(100, None, &[], None).unwrap();
        assert_eq!(ctx.transport.sent_count(), 2);
        assert_eq!(uas.state(), State::Proceeding);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_ignores_other_provisional_responses() {
        let mut ctx = server_context(SipMethod::Message);
        let uas = NonInviteServerTransaction::new(&ctx.layer, &mut ctx.request);

        ctx.request.reply(180, None, &[], None).unwrap();

        assert_eq!(uas.state(), State::Trying);
        assert_eq!(ctx.transport.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_sends_only_the_first_final_response() {
        let mut ctx = server_context(SipMethod::Options);
        ctx.transport.set_reliable(false);
        let uas = NonInviteServerTransaction::new(&ctx.layer, &mut ctx.request);
        let mut state = uas.subscribe();

        ctx.request.reply(200, None, &[], None).unwrap();
        assert_state_eq!(state, State::Completed, "should transition to Completed after 2xx");

        ctx.request.reply(486, None, &[], None).unwrap();
        assert_eq!(ctx.transport.sent_count(), 1);

        uas.resend_last_response();
        assert_eq!(ctx.transport.sent_count(), 2);
        assert!(ctx.transport.last_message().unwrap().starts_with("SIP/2.0 200 OK\r\n"));

        tokio::time::sleep(TIMER_F).await;
        assert_state_eq!(state, State::Terminated, "should terminate when Timer J fires");
        assert_eq!(ctx.layer.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_terminates_at_once_on_reliable_transport() {
        let mut ctx = server_context(SipMethod::Options);
        let uas = NonInviteServerTransaction::new(&ctx.layer, &mut ctx.request);
        let mut state = uas.subscribe();

        ctx.request.reply(404, None, &[], None).unwrap();

        assert_state_eq!(state, State::Completed);
        assert_state_eq!(state, State::Terminated, "Timer J is zero on reliable transports");
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_reports_send_failure() {
        let mut ctx = server_context(SipMethod::Options);
        let uas = NonInviteServerTransaction::new(&ctx.layer, &mut ctx.request);
        ctx.transport.fail_sends(true);

        assert_matches!(ctx.request.reply(200, None, &[], None), Err(Error::Transport));
        assert_eq!(uas.state(), State::Terminated);
        assert_eq!(ctx.layer.count(), 0);
    }
}
