//! Out-of-dialog request sending with digest authentication.
//!
//! A [`RequestSender`] puts a request in a new client transaction and, when
//! the response is a 401 or 407 challenge it can answer, sends the request
//! again with credentials and a higher CSeq. Every other outcome goes
//! straight to the [`RequestEventHandler`].

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::digest::{DigestAuthentication, RequestInfo};
use crate::message::{IncomingResponse, OutgoingRequest, SipMethod};
use crate::transaction::{
    AckClientTransaction, ClientTransaction, ClientTransactionHandler, InviteClientTransaction,
    NonInviteClientTransaction,
};
use crate::ua::{UaStatus, UserAgent, WeakUserAgent};

/// Receives the outcome of a request sent through a [`RequestSender`].
pub trait RequestEventHandler: Send + Sync {
    fn on_receive_response(&self, response: &IncomingResponse);

    fn on_request_timeout(&self);

    fn on_transport_error(&self);

    /// The request is about to be sent again with credentials.
    fn on_authenticated(&self, _request: &OutgoingRequest) {}
}

/// Sends one request, retrying it once per challenge with digest
/// credentials.
#[derive(Clone)]
pub struct RequestSender(Arc<Inner>);

struct Inner {
    this: Weak<Inner>,
    ua: WeakUserAgent,
    handler: Arc<dyn RequestEventHandler>,
    state: Mutex<SenderState>,
}

struct SenderState {
    request: OutgoingRequest,
    auth: Option<DigestAuthentication>,
    challenged: bool,
    staled: bool,
}

impl RequestSender {
    pub fn new(
        ua: &UserAgent,
        request: OutgoingRequest,
        handler: Arc<dyn RequestEventHandler>,
    ) -> Self {
        Self(Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            ua: ua.downgrade(),
            handler,
            state: Mutex::new(SenderState {
                request,
                auth: None,
                challenged: false,
                staled: false,
            }),
        }))
    }

    /// Sends the request in a new client transaction and returns it.
    ///
    /// Once the user agent is stopped only BYE and ACK go out; anything else
    /// is reported as a transport error and `None` is returned.
    pub fn send(&self) -> Option<ClientTransaction> {
        self.0.send()
    }

    /// The request as it will be sent next, including credentials once a
    /// challenge was answered.
    pub fn request(&self) -> OutgoingRequest {
        self.0.lock().request.clone()
    }
}

impl Inner {
    fn send(&self) -> Option<ClientTransaction> {
        let Some(ua) = self.ua.upgrade() else {
            self.handler.on_transport_error();
            return None;
        };

        let request = self.lock().request.clone();
        let method = request.method().clone();
        if ua.status() == UaStatus::UserClosed && !matches!(method, SipMethod::Bye | SipMethod::Ack) {
            log::debug!("user agent stopped, not sending {}", method);
            self.handler.on_transport_error();
            return None;
        }

        let handler: Arc<dyn ClientTransactionHandler> = self.this.upgrade()?;
        let layer = ua.transactions();
        let transaction = match method {
            SipMethod::Invite => {
                ClientTransaction::Invite(InviteClientTransaction::new(layer, request, handler))
            }
            SipMethod::Ack => {
                ClientTransaction::Ack(AckClientTransaction::new(layer, request, handler))
            }
            _ => ClientTransaction::NonInvite(NonInviteClientTransaction::new(
                layer, request, handler,
            )),
        };
        transaction.send();
        Some(transaction)
    }

    /// Answers a 401/407 challenge. Returns the authenticated request if it
    /// should be sent again.
    fn authenticate(&self, response: &IncomingResponse) -> Option<OutgoingRequest> {
        let ua = self.ua.upgrade()?;
        let (challenge_header, credentials_header) = match response.status_code() {
            401 => ("WWW-Authenticate", "Authorization"),
            _ => ("Proxy-Authenticate", "Proxy-Authorization"),
        };

        let Some(challenge) = response.challenge(challenge_header) else {
            log::warn!(
                "{} with wrong or missing {} header",
                response.status_code(),
                challenge_header
            );
            return None;
        };
        let stale = challenge.stale.unwrap_or(false);

        let mut guard = self.lock();
        let state = &mut *guard;
        if state.challenged && (state.staled || !stale) {
            return None;
        }

        let auth = state
            .auth
            .get_or_insert_with(|| DigestAuthentication::new(ua.credentials()));
        let uri = state.request.ruri().to_string();
        let info = RequestInfo {
            method: state.request.method().as_str(),
            uri: &uri,
            body: state.request.body(),
        };
        if !auth.authenticate(info, challenge, None) {
            return None;
        }
        let credentials = match auth.header_value() {
            Ok(credentials) => credentials,
            Err(err) => {
                log::warn!("unable to render digest credentials: {}", err);
                return None;
            }
        };

        ua.store_credentials(auth.realm(), auth.ha1());
        state.challenged = true;
        if stale {
            state.staled = true;
        }

        let mut request = state.request.clone();
        request.set_cseq(request.cseq() + 1);
        request.set_header(credentials_header, credentials);
        state.request = request.clone();
        Some(request)
    }

    fn lock(&self) -> MutexGuard<'_, SenderState> {
        self.state.lock().expect("Lock failed")
    }
}

impl ClientTransactionHandler for Inner {
    fn on_receive_response(&self, response: &IncomingResponse) {
        if matches!(response.status_code(), 401 | 407) {
            if let Some(request) = self.authenticate(response) {
                self.handler.on_authenticated(&request);
                self.send();
                return;
            }
        }
        self.handler.on_receive_response(response);
    }

    fn on_request_timeout(&self) {
        self.handler.on_request_timeout();
    }

    fn on_transport_error(&self) {
        self.handler.on_transport_error();
    }
}
