//! Transaction Layer.
//!
//! The client and server state machines of RFC 3261 section 17, with the
//! RFC 6026 Accepted state for INVITE transactions. A transaction reacts to
//! two inputs only: a message (a response we received, or a response the
//! application sends) and one of its timers firing.
//!
//! Every transaction publishes its [`State`] on a [`watch`] channel and to
//! the [`TransactionObserver`]s attached to it. The [`TransactionLayer`]
//! owns the transaction tables; a transaction removes itself once it
//! reaches [`State::Terminated`].

use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;

use crate::message::IncomingResponse;
use crate::transport::Transport;

pub(crate) mod client;
pub(crate) mod manager;
pub(crate) mod server;

pub use client::{
    AckClientTransaction, ClientTransaction, InviteClientTransaction, NonInviteClientTransaction,
};
pub use manager::TransactionLayer;
pub use server::{InviteServerTransaction, NonInviteServerTransaction, ServerTransaction};

/// Estimated round‑trip time (RTT) for message exchanges.
pub const T1: Duration = Duration::from_millis(500);

/// Maximum retransmission interval for non‑INVITE requests and INVITE responses.
pub const T2: Duration = Duration::from_secs(4);

/// Maximum duration that a message may remain in the network before being discarded.
pub const T4: Duration = Duration::from_secs(5);

/// 64·T1, the lifetime shared by timers B, F, H, L and M.
const T1_X64: Duration = Duration::from_secs(32);

/// INVITE transaction timeout.
pub const TIMER_B: Duration = T1_X64;
/// Non-INVITE transaction timeout.
pub const TIMER_F: Duration = T1_X64;
/// Wait time for ACK receipt.
pub const TIMER_H: Duration = T1_X64;
/// Wait time for retransmissions of the 2xx to an INVITE we answered.
pub const TIMER_L: Duration = T1_X64;
/// Wait time for retransmissions of the 2xx to an INVITE we sent.
pub const TIMER_M: Duration = T1_X64;
/// Wait time for response retransmissions.
pub const TIMER_K: Duration = T4;

/// Interval between retransmissions of a provisional response to an INVITE.
pub const PROVISIONAL_RESPONSE_INTERVAL: Duration = Duration::from_secs(60);

/// Wait time for response retransmissions after a non-2xx to an INVITE.
pub(crate) fn timer_d(reliable: bool) -> Duration {
    if reliable {
        Duration::ZERO
    } else {
        Duration::from_secs(32)
    }
}

/// Wait time for ACK retransmissions.
pub(crate) fn timer_i(reliable: bool) -> Duration {
    if reliable { Duration::ZERO } else { T4 }
}

/// Wait time for non-INVITE request retransmissions.
pub(crate) fn timer_j(reliable: bool) -> Duration {
    if reliable { Duration::ZERO } else { T1_X64 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Defines the possible states of a SIP Transaction.
pub enum State {
    /// Initial state of non-INVITE transactions.
    Trying,
    /// A provisional response was received or sent.
    Proceeding,
    /// Initial state of an INVITE client transaction.
    Calling,
    /// A 2xx to an INVITE was received or sent.
    Accepted,
    /// A final response was received or sent.
    Completed,
    /// The ACK for a non-2xx final response arrived.
    Confirmed,
    /// The transaction is over and no longer in the table.
    Terminated,
}

/// The four transaction state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    NonInviteClient,
    InviteClient,
    NonInviteServer,
    InviteServer,
}

/// Identifies a transaction: its kind and the branch of its topmost Via.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    kind: TransactionKind,
    branch: String,
}

impl TransactionKey {
    pub(crate) fn new(kind: TransactionKind, branch: impl Into<String>) -> Self {
        Self {
            kind,
            branch: branch.into(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind, self.branch)
    }
}

/// Watches the state changes of one transaction.
pub trait TransactionObserver: Send + Sync {
    /// Called after every state change, outside of any transaction lock.
    /// Returning `false` detaches the observer.
    fn on_state_changed(&self, state: State) -> bool;
}

/// Receives the outcome of a client transaction.
pub trait ClientTransactionHandler: Send + Sync {
    fn on_receive_response(&self, response: &IncomingResponse);

    /// Timer B or F fired, or a 408 response was received.
    fn on_request_timeout(&self);

    fn on_transport_error(&self);
}

/// The parts every transaction shares: identity, transport, published
/// state and observers.
pub(crate) struct Core {
    key: TransactionKey,
    layer: Weak<TransactionLayer>,
    transport: Transport,
    state: watch::Sender<State>,
    observers: Mutex<Vec<Arc<dyn TransactionObserver>>>,
}

impl Core {
    pub(crate) fn new(key: TransactionKey, layer: &Arc<TransactionLayer>, initial: State) -> Self {
        log::trace!("Transaction Created {} in {:?}", key, initial);
        Self {
            key,
            layer: Arc::downgrade(layer),
            transport: layer.transport().clone(),
            state: watch::Sender::new(initial),
            observers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub(crate) fn state(&self) -> State {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    pub(crate) fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        self.observers.lock().expect("Lock failed").push(observer);
    }

    pub(crate) fn is_reliable(&self) -> bool {
        self.transport.is_reliable()
    }

    pub(crate) fn send(&self, message: &str) -> bool {
        self.transport.send(message)
    }

    /// Records a transition. Callers hold their machine lock so concurrent
    /// inputs observe transitions in order.
    pub(crate) fn set_state(&self, state: State) {
        let old = self.state.send_replace(state);
        log::trace!("State Changed [{:?} -> {:?}] {}", old, state, self.key);
    }

    /// Tells the observers about `state` and leaves the table once
    /// terminated. Must be called without holding the machine lock.
    pub(crate) fn notify(&self, state: State) {
        let observers = std::mem::take(&mut *self.observers.lock().expect("Lock failed"));
        let kept: Vec<_> = observers
            .into_iter()
            .filter(|observer| observer.on_state_changed(state))
            .collect();

        {
            let mut observers = self.observers.lock().expect("Lock failed");
            let added = std::mem::replace(&mut *observers, kept);
            observers.extend(added);
        }

        if state == State::Terminated {
            if let Some(layer) = self.layer.upgrade() {
                layer.remove(&self.key);
            }
        }
    }
}
