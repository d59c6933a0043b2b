use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::message::{IncomingRequest, IncomingResponse, OutgoingRequest, RequestParams, SipMethod};
use crate::test_utils::{self, MockTransport};
use crate::transaction::{ClientTransactionHandler, State, TransactionLayer, TransactionObserver};

/// Asserts that the next state received in the [`watch::Receiver<State>`]
/// is equal to the expected.
#[macro_export]
macro_rules! assert_state_eq {
    ($watcher:expr, $state:expr $(,)?) => {{
        $crate::assert_state_eq!($watcher, $state, "unexpected transaction state")
    }};

    ($watcher:expr, $state:expr, $($arg:tt)+) => {{
        $crate::test_utils::transaction::wait_state_change(&mut $watcher).await;
        assert_eq!(*$watcher.borrow(), $state, $($arg)+);
    }};
}

pub async fn wait_state_change(state: &mut watch::Receiver<State>) {
    timeout(Duration::from_secs(1), state.changed())
        .await
        .expect("timeout reached and no state change received")
        .expect("The channel has been closed");
}

/// What a [`RecordingHandler`] saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionEvent {
    Response(u16),
    RequestTimeout,
    TransportError,
}

#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<TransactionEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn events(&self) -> Vec<TransactionEvent> {
        self.events.lock().unwrap().clone()
    }

    fn push(&self, event: TransactionEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl ClientTransactionHandler for RecordingHandler {
    fn on_receive_response(&self, response: &IncomingResponse) {
        self.push(TransactionEvent::Response(response.status_code()));
    }

    fn on_request_timeout(&self) {
        self.push(TransactionEvent::RequestTimeout);
    }

    fn on_transport_error(&self) {
        self.push(TransactionEvent::TransportError);
    }
}

/// Records every state a transaction goes through.
#[derive(Default)]
pub struct StateRecorder {
    states: Mutex<Vec<State>>,
}

impl StateRecorder {
    pub fn new() -> Arc<Self> {
        Arc::default()
    }

    pub fn states(&self) -> Vec<State> {
        self.states.lock().unwrap().clone()
    }
}

impl TransactionObserver for StateRecorder {
    fn on_state_changed(&self, state: State) -> bool {
        self.states.lock().unwrap().push(state);
        true
    }
}

#[derive(Clone)]
pub struct ClientContext {
    pub layer: Arc<TransactionLayer>,
    pub request: OutgoingRequest,
    pub handler: Arc<RecordingHandler>,
    pub transport: Arc<MockTransport>,
}

pub fn client_context(method: SipMethod) -> ClientContext {
    let transport = MockTransport::new();
    let layer = Arc::new(TransactionLayer::new(
        transport.clone().into_transport(),
        "df7jal23ls0d.invalid",
    ));
    let request = OutgoingRequest::new(
        method,
        "sip:bob@biloxi.com".parse().unwrap(),
        &test_utils::config(),
        RequestParams::default(),
        Vec::new(),
        None,
    );

    ClientContext {
        layer,
        request,
        handler: RecordingHandler::new(),
        transport,
    }
}

pub struct ServerContext {
    pub layer: Arc<TransactionLayer>,
    pub request: IncomingRequest,
    pub transport: Arc<MockTransport>,
}

pub fn server_context(method: SipMethod) -> ServerContext {
    let transport = MockTransport::new();
    let layer = Arc::new(TransactionLayer::new(
        transport.clone().into_transport(),
        "df7jal23ls0d.invalid",
    ));
    let request = test_utils::server_request(method, &transport);

    ServerContext {
        layer,
        request,
        transport,
    }
}
