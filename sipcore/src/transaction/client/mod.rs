mod ack;
mod invite;
mod non_invite;

pub use ack::AckClientTransaction;
pub use invite::InviteClientTransaction;
pub use non_invite::NonInviteClientTransaction;

use std::sync::Arc;

use tokio::sync::watch;

use crate::generate_branch;
use crate::message::OutgoingRequest;
use crate::transaction::{State, TransactionKey, TransactionLayer, TransactionObserver};

#[derive(Clone)]
/// An Client Transaction, either `Invite`, `NonInvite` or the stateless
/// `Ack`.
pub enum ClientTransaction {
    NonInvite(NonInviteClientTransaction),
    Invite(InviteClientTransaction),
    Ack(AckClientTransaction),
}

impl ClientTransaction {
    /// Hands the request to the transport and arms the transaction timers.
    pub fn send(&self) {
        match self {
            ClientTransaction::NonInvite(tx) => tx.send(),
            ClientTransaction::Invite(tx) => tx.send(),
            ClientTransaction::Ack(tx) => tx.send(),
        }
    }

    /// The request as sent, including its Via.
    pub fn request(&self) -> &OutgoingRequest {
        match self {
            ClientTransaction::NonInvite(tx) => tx.request(),
            ClientTransaction::Invite(tx) => tx.request(),
            ClientTransaction::Ack(tx) => tx.request(),
        }
    }

    /// The current state. ACK transactions have none.
    pub fn state(&self) -> Option<State> {
        match self {
            ClientTransaction::NonInvite(tx) => Some(tx.state()),
            ClientTransaction::Invite(tx) => Some(tx.state()),
            ClientTransaction::Ack(_) => None,
        }
    }

    pub fn key(&self) -> Option<&TransactionKey> {
        match self {
            ClientTransaction::NonInvite(tx) => Some(tx.key()),
            ClientTransaction::Invite(tx) => Some(tx.key()),
            ClientTransaction::Ack(_) => None,
        }
    }

    pub fn subscribe(&self) -> Option<watch::Receiver<State>> {
        match self {
            ClientTransaction::NonInvite(tx) => Some(tx.subscribe()),
            ClientTransaction::Invite(tx) => Some(tx.subscribe()),
            ClientTransaction::Ack(_) => None,
        }
    }

    /// Attaches `observer`. Ignored for ACK transactions.
    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        match self {
            ClientTransaction::NonInvite(tx) => tx.add_observer(observer),
            ClientTransaction::Invite(tx) => tx.add_observer(observer),
            ClientTransaction::Ack(_) => (),
        }
    }

    pub(crate) fn on_transport_error(&self) {
        match self {
            ClientTransaction::NonInvite(tx) => tx.on_transport_error(),
            ClientTransaction::Invite(tx) => tx.on_transport_error(),
            ClientTransaction::Ack(tx) => tx.on_transport_error(),
        }
    }
}

/// Sets the topmost Via of `request` to a new branch and returns it.
fn stamp_via(layer: &TransactionLayer, request: &mut OutgoingRequest) -> String {
    let branch = generate_branch();
    request.set_header(
        "Via",
        format!(
            "SIP/2.0/{} {};branch={}",
            layer.transport().via_transport(),
            layer.via_host(),
            branch
        ),
    );
    branch
}
