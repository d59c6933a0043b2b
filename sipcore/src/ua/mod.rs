//! The user agent: owns the transaction layer, the dialog table and the
//! registrator, and routes every message received from the transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::cause::Cause;
use crate::config::Configuration;
use crate::dialog::{Dialog, DialogId};
use crate::digest::Credentials;
use crate::message::{
    IncomingRequest, IncomingResponse, OutgoingRequest, RequestParams, SipMessage, SipMethod, Uri,
};
use crate::parser::parse_message;
use crate::request_sender::{RequestEventHandler, RequestSender};
use crate::sanity;
use crate::transaction::{
    ClientTransaction, InviteServerTransaction, NonInviteServerTransaction, TransactionLayer,
};
use crate::transport::{Transport, TransportEvent};

mod registrator;

use registrator::Registrator;

pub use registrator::MIN_REGISTER_EXPIRES;

/// Lifecycle of a [`UserAgent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UaStatus {
    /// Created, never started.
    Init,
    /// The transport is connected.
    Ready,
    /// Stopped by the application.
    UserClosed,
    /// The transport went down.
    NotReady,
}

/// What the user agent reports to the application.
#[derive(Debug, Clone)]
pub enum UaEvent {
    Connected,
    Disconnected {
        error: bool,
    },
    Registered {
        response: IncomingResponse,
    },
    Unregistered {
        response: Option<IncomingResponse>,
        cause: Option<Cause>,
    },
    RegistrationFailed {
        response: Option<IncomingResponse>,
        cause: Cause,
    },
}

/// The application side of a [`UserAgent`].
pub trait UaEventHandler: Send + Sync {
    /// An out of dialog request the core does not handle itself. Returns
    /// `true` if the application takes it; otherwise the user agent answers
    /// on its own (200 for OPTIONS, 405 for anything else).
    fn on_new_request(&self, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_event(&self, _event: UaEvent) {}
}

/// A SIP user agent.
///
/// Cloning is cheap; every clone refers to the same agent.
#[derive(Clone)]
pub struct UserAgent(Arc<Inner>);

/// A non owning reference to a [`UserAgent`], held by the objects the
/// agent owns.
#[derive(Clone, Default)]
pub struct WeakUserAgent(Weak<Inner>);

impl WeakUserAgent {
    pub fn upgrade(&self) -> Option<UserAgent> {
        self.0.upgrade().map(UserAgent)
    }
}

struct Inner {
    /// REGISTER handling for the configured AOR.
    registrator: Registrator,
    config: Configuration,
    transport: Transport,
    /// Every live client and server transaction.
    transactions: Arc<TransactionLayer>,
    handler: Arc<dyn UaEventHandler>,
    status: Mutex<UaStatus>,
    /// Updated with the realm and HA1 of every answered challenge.
    credentials: Mutex<Credentials>,
    dialogs: Mutex<HashMap<DialogId, Dialog>>,
    /// Whether to register once connected.
    register: AtomicBool,
}

impl UserAgent {
    /// Creates a stopped user agent sending through `transport`.
    pub fn new(
        config: Configuration,
        transport: Transport,
        handler: Arc<dyn UaEventHandler>,
    ) -> Self {
        let transactions = Arc::new(TransactionLayer::new(transport.clone(), config.via_host()));
        let credentials = Credentials {
            username: config.authorization_user().to_owned(),
            password: config.password().map(str::to_owned),
            ha1: config.ha1().map(str::to_owned),
            realm: config.realm().map(str::to_owned),
        };

        Self(Arc::new_cyclic(|this| Inner {
            registrator: Registrator::new(WeakUserAgent(this.clone()), &config),
            register: AtomicBool::new(config.register()),
            config,
            transport,
            transactions,
            handler,
            status: Mutex::new(UaStatus::Init),
            credentials: Mutex::new(credentials),
            dialogs: Mutex::default(),
        }))
    }

    /// Connects the transport. Registration starts once it is up if the
    /// configuration asks for it.
    pub async fn start(&self) {
        match self.status() {
            UaStatus::Init => (),
            UaStatus::UserClosed => self.set_status(UaStatus::Ready),
            UaStatus::Ready => {
                log::debug!("user agent already started");
                return;
            }
            UaStatus::NotReady => {
                log::debug!("transport down, waiting for it to recover");
                return;
            }
        }
        self.0.register.store(self.0.config.register(), Ordering::SeqCst);
        self.0.transport.connect().await;
    }

    /// Unregisters and closes the transport once every pending non-INVITE
    /// request has completed. Must be called within a tokio runtime.
    pub fn stop(&self) {
        if self.status() == UaStatus::UserClosed {
            log::debug!("user agent already closed");
            return;
        }

        self.0.registrator.close();
        self.set_status(UaStatus::UserClosed);

        let transport = self.0.transport.clone();
        self.0.transactions.when_nict_idle(move || {
            tokio::spawn(async move { transport.disconnect().await });
        });
    }

    /// Registers now and after every reconnection.
    pub fn register(&self) {
        self.0.register.store(true, Ordering::SeqCst);
        self.0.registrator.register();
    }

    /// Removes our binding, or every binding of the AOR if `all` is set,
    /// and stops registering after reconnections.
    pub fn unregister(&self, all: bool) {
        self.0.register.store(false, Ordering::SeqCst);
        self.0.registrator.unregister(all);
    }

    pub fn is_registered(&self) -> bool {
        self.0.registrator.registered()
    }

    pub fn status(&self) -> UaStatus {
        *self.lock_status()
    }

    pub fn config(&self) -> &Configuration {
        &self.0.config
    }

    pub fn transport(&self) -> &Transport {
        &self.0.transport
    }

    pub fn transactions(&self) -> &Arc<TransactionLayer> {
        &self.0.transactions
    }

    pub fn downgrade(&self) -> WeakUserAgent {
        WeakUserAgent(Arc::downgrade(&self.0))
    }

    /// The Contact header value of our requests and dialogs.
    pub fn contact(&self) -> String {
        format!("<{}>", self.0.config.contact_uri())
    }

    pub fn credentials(&self) -> Credentials {
        self.0.credentials.lock().expect("Lock failed").clone()
    }

    /// Keeps the realm and HA1 computed for an answered challenge. The
    /// plain password is no longer needed once an HA1 is stored.
    pub(crate) fn store_credentials(&self, realm: Option<&str>, ha1: Option<&str>) {
        let mut credentials = self.0.credentials.lock().expect("Lock failed");
        if let Some(realm) = realm {
            credentials.realm = Some(realm.to_owned());
        }
        if let Some(ha1) = ha1 {
            credentials.ha1 = Some(ha1.to_owned());
            credentials.password = None;
        }
    }

    /// Builds an out of dialog request from this agent's configuration.
    pub fn create_request(
        &self,
        method: SipMethod,
        ruri: Uri,
        params: RequestParams,
        extra_headers: Vec<String>,
        body: Option<String>,
    ) -> OutgoingRequest {
        let mut request =
            OutgoingRequest::new(method, ruri, &self.0.config, params, extra_headers, body);
        if self.0.config.use_preloaded_route() {
            request.preload_route(format!("<{};lr>", self.0.transport.sip_uri()));
        }
        request
    }

    /// Sends `request` in a new client transaction, answering digest
    /// challenges on the way.
    pub fn send_request(
        &self,
        request: OutgoingRequest,
        handler: Arc<dyn RequestEventHandler>,
    ) -> Option<ClientTransaction> {
        RequestSender::new(self, request, handler).send()
    }

    /// Spawns a task feeding the events of `events` to this agent until the
    /// channel closes or the agent is dropped.
    pub fn attach(&self, mut events: UnboundedReceiver<TransportEvent>) -> JoinHandle<()> {
        let ua = self.downgrade();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(ua) = ua.upgrade() else {
                    break;
                };
                ua.on_transport_event(event);
            }
        })
    }

    pub fn on_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_transport_connected(),
            TransportEvent::Disconnected { error } => self.on_transport_disconnected(error),
            TransportEvent::Data(data) => self.receive_data(&data),
        }
    }

    fn on_transport_connected(&self) {
        if self.status() == UaStatus::UserClosed {
            return;
        }
        self.set_status(UaStatus::Ready);
        self.emit(UaEvent::Connected);

        if self.0.register.load(Ordering::SeqCst) {
            self.0.registrator.register();
        }
    }

    fn on_transport_disconnected(&self, error: bool) {
        self.0.transactions.on_transport_error();
        self.emit(UaEvent::Disconnected { error });
        self.0.registrator.on_transport_closed();

        if self.status() != UaStatus::UserClosed {
            self.set_status(UaStatus::NotReady);
        }
    }

    /// Handles one message received from the transport.
    pub fn receive_data(&self, data: &str) {
        let mut message = match parse_message(data) {
            Ok(message) => message,
            Err(err) => {
                log::warn!("dropping malformed message: {}", err);
                return;
            }
        };

        if let SipMessage::Request(request) = &mut message {
            request.transport = Some(self.0.transport.clone());
            request.session_timers = self.0.config.session_timers();
        }

        if !sanity::check(&message, &self.0.transactions, self.0.config.call_id_prefix()) {
            return;
        }

        match message {
            SipMessage::Request(request) => self.receive_request(request),
            SipMessage::Response(response) => self.receive_response(response),
        }
    }

    fn receive_request(&self, mut request: IncomingRequest) {
        let method = request.method().clone();
        let config = &self.0.config;

        let user = request.ruri().user();
        if user != config.uri().user() && user != config.contact_uri().user() {
            log::debug!("Request-URI does not point to us");
            if !method.is_ack() {
                reply_sl(&request, 404);
            }
            return;
        }

        if self.0.transactions.check_transaction(&request) {
            return;
        }

        match method {
            SipMethod::Invite => {
                InviteServerTransaction::new(&self.0.transactions, &mut request);
            }
            SipMethod::Ack | SipMethod::Cancel => (),
            _ => {
                NonInviteServerTransaction::new(&self.0.transactions, &mut request);
            }
        }

        if request.to_tag().is_none() {
            self.receive_out_of_dialog(request);
            return;
        }

        let from_tag = request.from_tag().unwrap_or_default();
        let to_tag = request.to_tag().unwrap_or_default();
        match self.find_dialog(request.call_id(), from_tag, to_tag) {
            Some(dialog) => dialog.receive_request(request),
            None if method == SipMethod::Notify => {
                reply(&request, 481, Some("Subscription does not exist"));
            }
            None if !method.is_ack() => reply(&request, 481, None),
            None => (),
        }
    }

    fn receive_out_of_dialog(&self, request: IncomingRequest) {
        match request.method() {
            SipMethod::Options => {
                if !self.0.handler.on_new_request(&request) {
                    reply(&request, 200, None);
                }
            }
            SipMethod::Invite if request.replaces().is_some() => self.receive_replaces(request),
            SipMethod::Bye => reply(&request, 481, None),
            SipMethod::Ack => (),
            SipMethod::Cancel => {
                if !self.0.handler.on_new_request(&request) {
                    log::debug!("received CANCEL for a non existent session");
                }
            }
            _ => {
                if !self.0.handler.on_new_request(&request) {
                    reply(&request, 405, None);
                }
            }
        }
    }

    /// An INVITE replacing one of our dialogs (RFC 3891) goes to the
    /// owner of that dialog.
    fn receive_replaces(&self, request: IncomingRequest) {
        let Some(replaces) = request.replaces() else {
            return;
        };
        let dialog = self.find_dialog(
            &replaces.call_id,
            replaces.from_tag.as_deref().unwrap_or_default(),
            replaces.to_tag.as_deref().unwrap_or_default(),
        );

        match dialog.map(|dialog| dialog.owner()) {
            Some(Some(owner)) if !owner.is_terminated() => owner.receive_request(request),
            Some(_) => reply(&request, 603, None),
            None => reply(&request, 481, None),
        }
    }

    fn receive_response(&self, response: IncomingResponse) {
        let Some(branch) = response.via_branch() else {
            return;
        };

        match response.method() {
            SipMethod::Invite => match self.0.transactions.find_ict(branch) {
                Some(tx) => tx.receive_response(&response),
                None => log::debug!("no INVITE transaction for response {}", response.status_code()),
            },
            SipMethod::Ack => (),
            _ => match self.0.transactions.find_nict(branch) {
                Some(tx) => tx.receive_response(&response),
                None => log::debug!("no transaction for response {}", response.status_code()),
            },
        }
    }

    /// Looks a dialog up with the tags in either order, as they appear in a
    /// request we sent or in one we received.
    pub fn find_dialog(&self, call_id: &str, from_tag: &str, to_tag: &str) -> Option<Dialog> {
        let dialogs = self.0.dialogs.lock().expect("Lock failed");
        let id = DialogId::new(call_id, from_tag, to_tag);
        if let Some(dialog) = dialogs.get(&id) {
            return Some(dialog.clone());
        }
        dialogs.get(&DialogId::new(call_id, to_tag, from_tag)).cloned()
    }

    pub(crate) fn new_dialog(&self, dialog: Dialog) {
        let id = dialog.id().clone();
        log::trace!("new dialog {}", id);
        self.0.dialogs.lock().expect("Lock failed").insert(id, dialog);
    }

    pub(crate) fn destroy_dialog(&self, id: &DialogId) {
        log::trace!("dialog {} destroyed", id);
        self.0.dialogs.lock().expect("Lock failed").remove(id);
    }

    pub(crate) fn emit(&self, event: UaEvent) {
        self.0.handler.on_event(event);
    }

    fn set_status(&self, status: UaStatus) {
        *self.lock_status() = status;
    }

    fn lock_status(&self) -> MutexGuard<'_, UaStatus> {
        self.0.status.lock().expect("Lock failed")
    }
}

fn reply(request: &IncomingRequest, code: u16, reason: Option<&str>) {
    if let Err(err) = request.reply(code, reason, &[], None) {
        log::debug!("unable to reply {} to {}: {}", code, request.method(), err);
    }
}

fn reply_sl(request: &IncomingRequest, code: u16) {
    if let Err(err) = request.reply_sl(code, None) {
        log::debug!("unable to reply {} to {}: {}", code, request.method(), err);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dialog::DialogOwner;
    use crate::test_utils::ua::{
        LOCAL_TAG, RecordingRequestHandler, TestOwner, UaContext, in_dialog_request, ua_config,
        ua_context, ua_context_with, uas_dialog,
    };
    use crate::test_utils::{self, respond};
    use crate::transaction::TIMER_K;
    use crate::transport::SipTransport;

    fn out_of_dialog(ctx: &UaContext, method: SipMethod) -> String {
        test_utils::server_request(method, &ctx.transport).data().to_owned()
    }

    fn status_line(message: &str) -> &str {
        message.lines().next().unwrap()
    }

    fn last_status_line(ctx: &UaContext) -> String {
        status_line(&ctx.transport.last_message().unwrap()).to_owned()
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_request_for_another_user_is_404() {
        let ctx = ua_context();
        let data = out_of_dialog(&ctx, SipMethod::Options)
            .replace("OPTIONS sip:alice@", "OPTIONS sip:carol@");

        ctx.ua.receive_data(&data);

        assert_eq!(last_status_line(&ctx), "SIP/2.0 404 Not Found");
        assert!(ctx.handler.requests().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_own_request_looped_back_is_482() {
        let ctx = ua_context();
        let request = ctx.ua.create_request(
            SipMethod::Options,
            "sip:alice@atlanta.com".parse().unwrap(),
            RequestParams::default(),
            Vec::new(),
            None,
        );
        assert!(request.call_id().starts_with(ctx.ua.config().call_id_prefix()));
        ctx.ua.send_request(request, RecordingRequestHandler::new()).unwrap();

        let sent = ctx.transport.last_message().unwrap();
        ctx.ua.receive_data(&sent);

        let messages = ctx.transport.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], sent);
        assert_eq!(status_line(&messages[1]), "SIP/2.0 482 Loop Detected");
        assert!(ctx.handler.requests().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_ack_for_another_user_is_dropped() {
        let ctx = ua_context();
        let data = out_of_dialog(&ctx, SipMethod::Ack).replace("ACK sip:alice@", "ACK sip:carol@");

        ctx.ua.receive_data(&data);

        assert_eq!(ctx.transport.sent_count(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_request_for_contact_user_is_accepted() {
        let ctx = ua_context();
        let contact = ctx.ua.config().contact_uri().clone();
        let data = out_of_dialog(&ctx, SipMethod::Options).replace(
            "OPTIONS sip:alice@atlanta.com",
            &format!("OPTIONS sip:{}@atlanta.com", contact.user().unwrap()),
        );

        ctx.ua.receive_data(&data);

        assert_eq!(last_status_line(&ctx), "SIP/2.0 200 OK");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_options_is_answered_unless_taken() {
        let ctx = ua_context();

        ctx.ua.receive_data(&out_of_dialog(&ctx, SipMethod::Options));
        assert_eq!(last_status_line(&ctx), "SIP/2.0 200 OK");
        assert_eq!(ctx.handler.requests().len(), 1);

        ctx.handler.take_requests(true);
        ctx.ua.receive_data(&out_of_dialog(&ctx, SipMethod::Options));
        assert_eq!(ctx.transport.sent_count(), 1);
        assert_eq!(ctx.handler.requests().len(), 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_unhandled_request_is_405() {
        let ctx = ua_context();

        ctx.ua.receive_data(&out_of_dialog(&ctx, SipMethod::Message));

        let reply = ctx.transport.last_message().unwrap();
        assert_eq!(status_line(&reply), "SIP/2.0 405 Method Not Allowed");
        assert!(reply.contains("Allow: "));
        assert_eq!(ctx.handler.requests().len(), 1);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_taken_request_is_left_to_the_application() {
        let ctx = ua_context();
        ctx.handler.take_requests(true);

        ctx.ua.receive_data(&out_of_dialog(&ctx, SipMethod::Message));

        assert_eq!(ctx.transport.sent_count(), 0);
        let request = &ctx.handler.requests()[0];
        assert!(request.server_transaction().is_some());
        request.reply(202, None, &[], None).unwrap();
        assert_eq!(last_status_line(&ctx), "SIP/2.0 202 Accepted");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_out_of_dialog_bye_is_481() {
        let ctx = ua_context();

        ctx.ua.receive_data(&out_of_dialog(&ctx, SipMethod::Bye));

        assert_eq!(
            last_status_line(&ctx),
            "SIP/2.0 481 Call/Transaction Does Not Exist"
        );
        assert!(ctx.handler.requests().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_unknown_dialog_is_481() {
        let ctx = ua_context();
        let owner: Arc<dyn DialogOwner> = TestOwner::new();
        let (dialog, invite) = uas_dialog(&ctx, &owner);
        dialog.terminate();

        ctx.ua.receive_data(&in_dialog_request(&invite, SipMethod::Info, 2));
        assert_eq!(
            last_status_line(&ctx),
            "SIP/2.0 481 Call/Transaction Does Not Exist"
        );

        ctx.ua.receive_data(&in_dialog_request(&invite, SipMethod::Notify, 3));
        assert_eq!(last_status_line(&ctx), "SIP/2.0 481 Subscription does not exist");

        let sent = ctx.transport.sent_count();
        ctx.ua.receive_data(&in_dialog_request(&invite, SipMethod::Ack, 1));
        assert_eq!(ctx.transport.sent_count(), sent);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_in_dialog_request_reaches_the_owner() {
        let ctx = ua_context();
        let owner = TestOwner::new();
        let dyn_owner: Arc<dyn DialogOwner> = owner.clone();
        let (_dialog, invite) = uas_dialog(&ctx, &dyn_owner);

        ctx.ua.receive_data(&in_dialog_request(&invite, SipMethod::Info, 2));

        let requests = owner.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(*requests[0].method(), SipMethod::Info);
        assert!(requests[0].server_transaction().is_some());
        assert!(ctx.handler.requests().is_empty());
    }

    fn replacing_invite(ctx: &UaContext, call_id: &str, to_tag: &str, from_tag: &str) -> String {
        out_of_dialog(ctx, SipMethod::Invite).replace(
            "Content-Length: 0",
            &format!(
                "Replaces: {};to-tag={};from-tag={}\r\nContent-Length: 0",
                call_id, to_tag, from_tag
            ),
        )
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_replaces_unknown_dialog_is_481() {
        let ctx = ua_context();

        ctx.ua.receive_data(&replacing_invite(&ctx, "unknown", "a", "b"));

        assert_eq!(
            last_status_line(&ctx),
            "SIP/2.0 481 Call/Transaction Does Not Exist"
        );
        assert!(ctx.handler.requests().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_replaces_goes_to_dialog_owner() {
        let ctx = ua_context();
        let owner = TestOwner::new();
        let dyn_owner: Arc<dyn DialogOwner> = owner.clone();
        let (_dialog, invite) = uas_dialog(&ctx, &dyn_owner);
        let data = replacing_invite(
            &ctx,
            invite.call_id(),
            LOCAL_TAG,
            invite.from_tag().unwrap(),
        );

        ctx.ua.receive_data(&data);

        assert_eq!(owner.requests().len(), 1);
        assert!(owner.requests()[0].replaces().is_some());
        assert_eq!(last_status_line(&ctx), "SIP/2.0 100 Trying");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_replaces_terminated_owner_is_603() {
        let ctx = ua_context();
        let owner = TestOwner::new();
        let dyn_owner: Arc<dyn DialogOwner> = owner.clone();
        let (_dialog, invite) = uas_dialog(&ctx, &dyn_owner);
        owner.terminate();
        let data = replacing_invite(
            &ctx,
            invite.call_id(),
            LOCAL_TAG,
            invite.from_tag().unwrap(),
        );

        ctx.ua.receive_data(&data);

        assert!(owner.requests().is_empty());
        assert_eq!(last_status_line(&ctx), "SIP/2.0 603 Decline");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_retransmission_is_absorbed() {
        let ctx = ua_context();
        ctx.transport.set_reliable(false);
        let data = out_of_dialog(&ctx, SipMethod::Options);

        ctx.ua.receive_data(&data);
        ctx.ua.receive_data(&data);

        assert_eq!(ctx.handler.requests().len(), 1);
        assert_eq!(ctx.transport.sent_count(), 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_malformed_data_is_dropped() {
        let ctx = ua_context();

        ctx.ua.receive_data("not a SIP message");
        ctx.ua.receive_data("SIP/2.0 200 OK\r\nVia: SIP/2.0/WS x.invalid\r\n\r\n");

        assert_eq!(ctx.transport.sent_count(), 0);
        assert!(ctx.handler.requests().is_empty());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_connected_registers() {
        let ctx = ua_context();
        assert_eq!(ctx.ua.status(), UaStatus::Init);

        ctx.ua.on_transport_event(TransportEvent::Connected);

        assert_eq!(ctx.ua.status(), UaStatus::Ready);
        assert_matches!(&ctx.handler.events()[..], [UaEvent::Connected]);
        let register = test_utils::parse_request(&ctx.transport.last_message().unwrap());
        assert_eq!(*register.method(), SipMethod::Register);
        assert_eq!(register.ruri().to_string(), "sip:atlanta.com");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_connected_without_register() {
        let config = Configuration::builder()
            .with_uri("sip:alice@atlanta.com")
            .with_password("secret")
            .with_register(false)
            .build()
            .unwrap();
        let ctx = ua_context_with(config);

        ctx.ua.on_transport_event(TransportEvent::Connected);

        assert_eq!(ctx.ua.status(), UaStatus::Ready);
        assert_eq!(ctx.transport.sent_count(), 0);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_disconnected_fails_pending_requests() {
        let ctx = ua_context();
        ctx.ua.on_transport_event(TransportEvent::Connected);

        ctx.ua.on_transport_event(TransportEvent::Disconnected { error: true });

        assert_eq!(ctx.ua.status(), UaStatus::NotReady);
        assert_matches!(
            &ctx.handler.events()[..],
            [
                UaEvent::Connected,
                UaEvent::RegistrationFailed {
                    response: None,
                    cause: Cause::ConnectionError
                },
                UaEvent::Disconnected { error: true }
            ]
        );
        assert!(!ctx.ua.is_registered());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_data_events_are_received() {
        let ctx = ua_context();
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let task = ctx.ua.attach(receiver);

        sender
            .send(TransportEvent::Data(out_of_dialog(&ctx, SipMethod::Options)))
            .unwrap();
        drop(sender);
        task.await.unwrap();

        assert_eq!(last_status_line(&ctx), "SIP/2.0 200 OK");
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_stop_disconnects() {
        let ctx = ua_context();
        ctx.ua.start().await;
        ctx.ua.on_transport_event(TransportEvent::Connected);
        ctx.ua.receive_data(&respond(&ctx.transport.last_message().unwrap(), 403, &[]));
        tokio::time::sleep(TIMER_K + Duration::from_millis(1)).await;

        ctx.ua.stop();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(ctx.ua.status(), UaStatus::UserClosed);
        assert!(!ctx.transport.is_connected());

        // A late connection does not revive a stopped agent.
        ctx.ua.on_transport_event(TransportEvent::Connected);
        assert_eq!(ctx.ua.status(), UaStatus::UserClosed);

        ctx.ua.start().await;
        assert_eq!(ctx.ua.status(), UaStatus::Ready);
        assert!(ctx.transport.is_connected());
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn test_stop_waits_for_unregister() {
        let ctx = ua_context();
        ctx.ua.on_transport_event(TransportEvent::Connected);
        let contact = format!("Contact: <{}>;expires=600", ctx.ua.config().contact_uri());
        ctx.ua.receive_data(&respond(
            &ctx.transport.last_message().unwrap(),
            200,
            &[contact.as_str()],
        ));
        assert!(ctx.ua.is_registered());

        ctx.ua.stop();
        let unregister = ctx.transport.last_message().unwrap();
        assert!(unregister.contains("Expires: 0\r\n"));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(ctx.transport.is_connected());

        ctx.ua.receive_data(&respond(&unregister, 200, &[]));
        tokio::time::sleep(TIMER_K + Duration::from_millis(1)).await;

        assert!(!ctx.transport.is_connected());
        assert_matches!(
            ctx.handler.events().last(),
            Some(UaEvent::Unregistered {
                response: Some(_),
                cause: None
            })
        );
    }

    #[test_log::test]
    fn test_stored_ha1_replaces_password() {
        let ctx = ua_context();
        assert_eq!(ctx.ua.credentials().password.as_deref(), Some("secret"));

        ctx.ua.store_credentials(Some("atlanta.com"), None);
        assert_eq!(ctx.ua.credentials().password.as_deref(), Some("secret"));

        ctx.ua
            .store_credentials(None, Some("3b1d4b5bfe5e9d8d3d1e9f4bd7e0a6cf"));
        let credentials = ctx.ua.credentials();
        assert_eq!(credentials.realm.as_deref(), Some("atlanta.com"));
        assert_eq!(
            credentials.ha1.as_deref(),
            Some("3b1d4b5bfe5e9d8d3d1e9f4bd7e0a6cf")
        );
        assert_eq!(credentials.password, None);
    }

    #[test_log::test]
    fn test_preloaded_route() {
        let config = Configuration::builder()
            .with_uri("sip:alice@atlanta.com")
            .with_preloaded_route(true)
            .build()
            .unwrap();
        let ctx = ua_context_with(config);

        let request = ctx.ua.create_request(
            SipMethod::Message,
            "sip:bob@biloxi.com".parse().unwrap(),
            RequestParams::default(),
            Vec::new(),
            None,
        );

        assert!(
            request
                .to_string()
                .contains("Route: <sip:edge.example.com;transport=ws;lr>\r\n")
        );

        let ctx = ua_context_with(ua_config());
        let request = ctx.ua.create_request(
            SipMethod::Message,
            "sip:bob@biloxi.com".parse().unwrap(),
            RequestParams::default(),
            Vec::new(),
            None,
        );
        assert!(!request.to_string().contains("Route: "));
    }
}
