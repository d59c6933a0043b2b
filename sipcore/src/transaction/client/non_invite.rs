use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;

use crate::message::{IncomingResponse, OutgoingRequest};
use crate::timer::Timer;
use crate::transaction::client::{ClientTransaction, stamp_via};
use crate::transaction::{
    ClientTransactionHandler, Core, State, TIMER_F, TIMER_K, TransactionKey, TransactionKind,
    TransactionLayer, TransactionObserver,
};

/// Represents a Client Non INVITE transaction.
#[derive(Clone)]
pub struct NonInviteClientTransaction(Arc<Inner>);

struct Inner {
    core: Core,
    request: OutgoingRequest,
    machine: Mutex<Machine>,
}

#[derive(Default)]
struct Machine {
    timer_f: Timer,
    timer_k: Timer,
    /// Released once the transaction terminates.
    handler: Option<Arc<dyn ClientTransactionHandler>>,
}

impl NonInviteClientTransaction {
    /// Creates the transaction in Trying and adds it to `layer`. The
    /// request gets a Via with a new branch.
    pub fn new(
        layer: &Arc<TransactionLayer>,
        mut request: OutgoingRequest,
        handler: Arc<dyn ClientTransactionHandler>,
    ) -> Self {
        let branch = stamp_via(layer, &mut request);
        let key = TransactionKey::new(TransactionKind::NonInviteClient, branch);
        let tx = Self(Arc::new(Inner {
            core: Core::new(key, layer, State::Trying),
            request,
            machine: Mutex::new(Machine {
                handler: Some(handler),
                ..Default::default()
            }),
        }));

        layer.add_client(ClientTransaction::NonInvite(tx.clone()));
        tx
    }

    /// Arms Timer F and sends the request.
    pub fn send(&self) {
        self.lock()
            .timer_f
            .start_weak(TIMER_F, &self.0, |inner| Self(inner).timer_f());

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

    /// Feeds a response matched to this transaction.
    pub fn receive_response(&self, response: &IncomingResponse) {
        let code = response.status_code();
        let (state, handler) = {
            let mut machine = self.lock();
            let state = match self.state() {
                State::Trying | State::Proceeding if code < 200 => State::Proceeding,
                State::Trying | State::Proceeding => {
                    machine.timer_f.cancel();
                    machine
                        .timer_k
                        .start_weak(TIMER_K, &self.0, |inner| Self(inner).timer_k());
                    State::Completed
                }
                // Retransmissions of the final response.
                _ => return,
            };
            self.0.core.set_state(state);
            (state, machine.handler.clone())
        };
        self.0.core.notify(state);

        let Some(handler) = handler else {
            return;
        };
        if state == State::Completed && code == 408 {
            handler.on_request_timeout();
        } else {
            handler.on_receive_response(response);
        }
    }

    pub(crate) fn on_transport_error(&self) {
        if let Some(handler) = self.terminate(|state| state != State::Terminated) {
            log::debug!("transport error in {}", self.key());
            handler.on_transport_error();
        }
    }

    fn timer_f(&self) {
        if let Some(handler) = self.terminate(|state| matches!(state, State::Trying | State::Proceeding)) {
            log::debug!("Timer F expired for {}", self.key());
            handler.on_request_timeout();
        }
    }

    fn timer_k(&self) {
        self.terminate(|state| state == State::Completed);
    }

    /// Moves to Terminated if `when` holds for the current state, returning
    /// the handler to notify.
    fn terminate(&self, when: impl Fn(State) -> bool) -> Option<Arc<dyn ClientTransactionHandler>> {
        let handler = {
            let mut machine = self.lock();
            if !when(self.state()) {
                return None;
            }
            machine.timer_f.cancel();
            machine.timer_k.cancel();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SipMethod;
    use crate::test_utils::transaction::{TransactionEvent, client_context};
    use crate::transaction::T1;
    use crate::{assert_state_eq, test_utils};

    #[tokio::test(start_paused = true)]
    async fn non_invite_transitions_to_trying_when_request_sent() {
        let ctx = client_context(SipMethod::Options);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        uac.send();

        assert_eq!(uac.state(), State::Trying);
        assert_eq!(ctx.transport.sent_count(), 1);
        assert!(ctx.layer.find_nict(uac.key().branch()).is_some());

        let sent = ctx.transport.last_message().unwrap();
        assert!(sent.contains(&format!("Via: SIP/2.0/WS {};branch={}\r\n", ctx.layer.via_host(), uac.key().branch())));
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_transitions_from_trying_to_proceeding_when_receiving_1xx_response() {
        let ctx = client_context(SipMethod::Options);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        let mut state = uac.subscribe();
        uac.send();

        uac.receive_response(&test_utils::response_to(uac.request(), 180));

        assert_state_eq!(state, State::Proceeding, "should transition to Proceeding after 1xx");
        assert_eq!(ctx.handler.events(), [TransactionEvent::Response(180)]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_delivers_final_response_once_and_terminates_after_timer_k() {
        let ctx = client_context(SipMethod::Options);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        let mut state = uac.subscribe();
        uac.send();

        let ok = test_utils::response_to(uac.request(), 200);
        uac.receive_response(&ok);
        assert_state_eq!(state, State::Completed, "should transition to Completed after 2xx");

        uac.receive_response(&ok);
        assert_eq!(ctx.handler.events(), [TransactionEvent::Response(200)]);

        tokio::time::sleep(TIMER_K).await;
        assert_state_eq!(state, State::Terminated, "should terminate when Timer K fires");
        assert!(ctx.layer.find_nict(uac.key().branch()).is_none());
        assert_eq!(ctx.handler.events(), [TransactionEvent::Response(200)]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_reports_408_as_request_timeout() {
        let ctx = client_context(SipMethod::Message);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        uac.send();

        uac.receive_response(&test_utils::response_to(uac.request(), 408));

        assert_eq!(uac.state(), State::Completed);
        assert_eq!(ctx.handler.events(), [TransactionEvent::RequestTimeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_transitions_from_trying_to_terminated_when_timer_f_fires() {
        let ctx = client_context(SipMethod::Options);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        let mut state = uac.subscribe();
        uac.send();

        tokio::time::sleep(64 * T1).await;

        assert_state_eq!(state, State::Terminated, "should terminate when Timer F fires");
        assert_eq!(ctx.handler.events(), [TransactionEvent::RequestTimeout]);
        assert_eq!(ctx.layer.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn non_invite_reports_transport_error_once() {
        let ctx = client_context(SipMethod::Options);
        ctx.transport.fail_sends(true);
        let uac = NonInviteClientTransaction::new(&ctx.layer, ctx.request, ctx.handler.clone());
        uac.send();

        assert_eq!(uac.state(), State::Terminated);
        uac.on_transport_error();
        tokio::time::sleep(64 * T1).await;

        assert_eq!(ctx.handler.events(), [TransactionEvent::TransportError]);
    }
}
