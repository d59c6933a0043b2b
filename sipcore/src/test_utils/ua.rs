use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::Configuration;
use crate::dialog::{Dialog, DialogOwner, DialogRequestHandler, DialogState};
use crate::generate_branch;
use crate::message::{IncomingRequest, IncomingResponse, OutgoingRequest, SipMethod};
use crate::request_sender::RequestEventHandler;
use crate::test_utils::{self, MockTransport};
use crate::ua::{UaEvent, UaEventHandler, UserAgent};

/// The To tag we answer Bob's INVITE with.
pub const LOCAL_TAG: &str = "local1";

pub struct UaContext {
    pub ua: UserAgent,
    pub transport: Arc<MockTransport>,
    pub handler: Arc<RecordingUaHandler>,
}

pub fn ua_config() -> Configuration {
    Configuration::builder()
        .with_uri("sip:alice@atlanta.com")
        .with_password("secret")
        .with_display_name("Alice")
        .with_user_agent("sipcore-test")
        .build()
        .unwrap()
}

pub fn ua_context() -> UaContext {
    ua_context_with(ua_config())
}

pub fn ua_context_with(config: Configuration) -> UaContext {
    let transport = MockTransport::new();
    let handler = RecordingUaHandler::new();
    let ua = UserAgent::new(config, transport.clone().into_transport(), handler.clone());

    UaContext {
        ua,
        transport,
        handler,
    }
}

/// An INVITE received from Bob, answered with [`LOCAL_TAG`], and the
/// confirmed dialog built from it.
pub fn uas_dialog(ctx: &UaContext, owner: &Arc<dyn DialogOwner>) -> (Dialog, IncomingRequest) {
    let mut invite = test_utils::server_request(SipMethod::Invite, &ctx.transport);
    invite.set_to_tag(LOCAL_TAG);
    let dialog = Dialog::new_uas(owner, &ctx.ua, &invite, DialogState::Confirmed).unwrap();
    (dialog, invite)
}

/// The raw text of a request Bob sends within the dialog of `invite`, with
/// a new branch and Contact host `bob2.invalid`.
pub fn in_dialog_request(invite: &IncomingRequest, method: SipMethod, cseq: u32) -> String {
    format!(
        "{method} sip:alice@atlanta.com SIP/2.0\r\n\
         Via: SIP/2.0/WS bob.invalid;branch={}\r\n\
         Max-Forwards: 69\r\n\
         From: Bob <sip:bob@biloxi.com>;tag={}\r\n\
         To: Alice <sip:alice@atlanta.com>;tag={}\r\n\
         Call-ID: {}\r\n\
         CSeq: {cseq} {method}\r\n\
         Contact: <sip:bob@bob2.invalid;transport=ws>\r\n\
         Content-Length: 0\r\n\r\n",
        generate_branch(),
        invite.from_tag().unwrap(),
        LOCAL_TAG,
        invite.call_id(),
    )
}

/// Records events and out of dialog requests. Takes requests only when
/// told to.
#[derive(Default)]
pub struct RecordingUaHandler {
    events: Mutex<Vec<UaEvent>>,
    requests: Mutex<Vec<IncomingRequest>>,
    take_requests: AtomicBool,
}

impl RecordingUaHandler {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn events(&self) -> Vec<UaEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<IncomingRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn take_requests(&self, take: bool) {
        self.take_requests.store(take, Ordering::SeqCst);
    }
}

impl UaEventHandler for RecordingUaHandler {
    fn on_new_request(&self, request: &IncomingRequest) -> bool {
        self.requests.lock().unwrap().push(request.clone());
        self.take_requests.load(Ordering::SeqCst)
    }

    fn on_event(&self, event: UaEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    Response(u16),
    RequestTimeout,
    TransportError,
    /// Carries the CSeq of the authenticated request.
    Authenticated(u32),
}

#[derive(Default)]
pub struct RecordingRequestHandler {
    events: Mutex<Vec<RequestEvent>>,
}

impl RecordingRequestHandler {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: RequestEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RequestEventHandler for RecordingRequestHandler {
    fn on_receive_response(&self, response: &IncomingResponse) {
        self.push(RequestEvent::Response(response.status_code()));
    }

    fn on_request_timeout(&self) {
        self.push(RequestEvent::RequestTimeout);
    }

    fn on_transport_error(&self) {
        self.push(RequestEvent::TransportError);
    }

    fn on_authenticated(&self, request: &OutgoingRequest) {
        self.push(RequestEvent::Authenticated(request.cseq()));
    }
}

/// A dialog owner recording what reaches it.
#[derive(Default)]
pub struct TestOwner {
    requests: Mutex<Vec<IncomingRequest>>,
    terminated: AtomicBool,
}

impl TestOwner {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn requests(&self) -> Vec<IncomingRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

impl DialogOwner for TestOwner {
    fn receive_request(&self, request: IncomingRequest) {
        self.requests.lock().unwrap().push(request);
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogEvent {
    Success(u16),
    Error(u16),
    RequestTimeout,
    TransportError,
    DialogError(u16),
}

#[derive(Default)]
pub struct RecordingDialogHandler {
    events: Mutex<Vec<DialogEvent>>,
}

impl RecordingDialogHandler {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn events(&self) -> Vec<DialogEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: DialogEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DialogRequestHandler for RecordingDialogHandler {
    fn on_success_response(&self, response: &IncomingResponse) {
        self.push(DialogEvent::Success(response.status_code()));
    }

    fn on_error_response(&self, response: &IncomingResponse) {
        self.push(DialogEvent::Error(response.status_code()));
    }

    fn on_request_timeout(&self) {
        self.push(DialogEvent::RequestTimeout);
    }

    fn on_transport_error(&self) {
        self.push(DialogEvent::TransportError);
    }

    fn on_dialog_error(&self, response: &IncomingResponse) {
        self.push(DialogEvent::DialogError(response.status_code()));
    }
}
