mod invite;
mod non_invite;

pub use invite::InviteServerTransaction;
pub use non_invite::NonInviteServerTransaction;

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Result;
use crate::message::IncomingRequest;
use crate::transaction::{State, TransactionKey, TransactionObserver};

#[derive(Clone)]
/// An Server Transaction, either `Invite` or `NonInvite`.
pub enum ServerTransaction {
    NonInvite(NonInviteServerTransaction),
    Invite(InviteServerTransaction),
}

impl ServerTransaction {
    pub fn state(&self) -> State {
        match self {
            ServerTransaction::NonInvite(tx) => tx.state(),
            ServerTransaction::Invite(tx) => tx.state(),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        match self {
            ServerTransaction::NonInvite(tx) => tx.key(),
            ServerTransaction::Invite(tx) => tx.key(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<State> {
        match self {
            ServerTransaction::NonInvite(tx) => tx.subscribe(),
            ServerTransaction::Invite(tx) => tx.subscribe(),
        }
    }

    pub fn add_observer(&self, observer: Arc<dyn TransactionObserver>) {
        match self {
            ServerTransaction::NonInvite(tx) => tx.add_observer(observer),
            ServerTransaction::Invite(tx) => tx.add_observer(observer),
        }
    }

    /// Sends `response`, a rendered response with status `code`, if the
    /// state allows it.
    pub(crate) fn receive_response(&self, code: u16, response: String) -> Result<()> {
        match self {
            ServerTransaction::NonInvite(tx) => tx.receive_response(code, response),
            ServerTransaction::Invite(tx) => tx.receive_response(code, response),
        }
    }

    pub(crate) fn on_transport_error(&self) {
        match self {
            ServerTransaction::NonInvite(tx) => tx.on_transport_error(),
            ServerTransaction::Invite(tx) => tx.on_transport_error(),
        }
    }
}

/// The From tag, Call-ID and CSeq of the request that opened a server
/// transaction, used to spot merged requests (RFC 3261 8.2.2.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Origin {
    from_tag: Option<String>,
    call_id: String,
    cseq: u32,
}

impl Origin {
    pub(crate) fn of(request: &IncomingRequest) -> Self {
        Self {
            from_tag: request.from_tag().map(str::to_owned),
            call_id: request.call_id().to_owned(),
            cseq: request.cseq(),
        }
    }

    pub(crate) fn matches(&self, request: &IncomingRequest) -> bool {
        self.from_tag.as_deref() == request.from_tag()
            && self.call_id == request.call_id()
            && self.cseq == request.cseq()
    }
}
