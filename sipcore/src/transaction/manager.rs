use std::collections::HashMap;
use std::sync::Mutex;

use crate::message::{IncomingRequest, SipMethod};
use crate::transaction::{
    ClientTransaction, InviteClientTransaction, InviteServerTransaction,
    NonInviteClientTransaction, NonInviteServerTransaction, ServerTransaction, State,
    TransactionKey, TransactionKind,
};
use crate::transport::Transport;

type Transactions<T> = Mutex<HashMap<String, T>>;

type IdleCallback = Box<dyn FnOnce() + Send>;

/// This type holds all server and client transactions, keyed by Via
/// branch, and matches incoming messages against them.
pub struct TransactionLayer {
    transport: Transport,
    via_host: String,
    nict: Transactions<NonInviteClientTransaction>,
    ict: Transactions<InviteClientTransaction>,
    nist: Transactions<NonInviteServerTransaction>,
    ist: Transactions<InviteServerTransaction>,
    nict_idle: Mutex<Vec<IdleCallback>>,
}

impl TransactionLayer {
    /// Creates an empty layer sending through `transport`. `via_host` is the
    /// sent-by of the Via headers of our requests.
    pub fn new(transport: Transport, via_host: impl Into<String>) -> Self {
        Self {
            transport,
            via_host: via_host.into(),
            nict: Default::default(),
            ict: Default::default(),
            nist: Default::default(),
            ist: Default::default(),
            nict_idle: Default::default(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn via_host(&self) -> &str {
        &self.via_host
    }

    pub(crate) fn add_client(&self, tx: ClientTransaction) {
        match tx {
            ClientTransaction::NonInvite(tx) => {
                let key = tx.key().branch().to_owned();
                self.nict.lock().expect("Lock failed").insert(key, tx);
            }
            ClientTransaction::Invite(tx) => {
                let key = tx.key().branch().to_owned();
                self.ict.lock().expect("Lock failed").insert(key, tx);
            }
            ClientTransaction::Ack(_) => (),
        }
    }

    pub(crate) fn add_server(&self, tx: ServerTransaction) {
        match tx {
            ServerTransaction::NonInvite(tx) => {
                let key = tx.key().branch().to_owned();
                self.nist.lock().expect("Lock failed").insert(key, tx);
            }
            ServerTransaction::Invite(tx) => {
                let key = tx.key().branch().to_owned();
                self.ist.lock().expect("Lock failed").insert(key, tx);
            }
        }
    }

    /// Remove a transaction from the collection.
    pub(crate) fn remove(&self, key: &TransactionKey) {
        let branch = key.branch();
        match key.kind() {
            TransactionKind::NonInviteClient => {
                let idle = {
                    let mut nict = self.nict.lock().expect("Lock failed");
                    nict.remove(branch);
                    nict.is_empty()
                };
                if idle {
                    let callbacks = std::mem::take(&mut *self.nict_idle.lock().expect("Lock failed"));
                    callbacks.into_iter().for_each(|callback| callback());
                }
            }
            TransactionKind::InviteClient => {
                self.ict.lock().expect("Lock failed").remove(branch);
            }
            TransactionKind::NonInviteServer => {
                self.nist.lock().expect("Lock failed").remove(branch);
            }
            TransactionKind::InviteServer => {
                self.ist.lock().expect("Lock failed").remove(branch);
            }
        }
        log::trace!("Transaction Removed {}", key);
    }

    pub fn find_nict(&self, branch: &str) -> Option<NonInviteClientTransaction> {
        self.nict.lock().expect("Lock failed").get(branch).cloned()
    }

    pub fn find_ict(&self, branch: &str) -> Option<InviteClientTransaction> {
        self.ict.lock().expect("Lock failed").get(branch).cloned()
    }

    pub fn find_nist(&self, branch: &str) -> Option<NonInviteServerTransaction> {
        self.nist.lock().expect("Lock failed").get(branch).cloned()
    }

    pub fn find_ist(&self, branch: &str) -> Option<InviteServerTransaction> {
        self.ist.lock().expect("Lock failed").get(branch).cloned()
    }

    /// Number of live transactions of every kind.
    pub fn count(&self) -> usize {
        self.nict.lock().expect("Lock failed").len()
            + self.ict.lock().expect("Lock failed").len()
            + self.nist.lock().expect("Lock failed").len()
            + self.ist.lock().expect("Lock failed").len()
    }

    /// Runs `callback` once no non-INVITE client transaction is left, which
    /// may be right away.
    pub(crate) fn when_nict_idle(&self, callback: impl FnOnce() + Send + 'static) {
        let nict = self.nict.lock().expect("Lock failed");
        if nict.is_empty() {
            drop(nict);
            callback();
        } else {
            self.nict_idle.lock().expect("Lock failed").push(Box::new(callback));
        }
    }

    /// Delivers a transport error to every live transaction.
    pub(crate) fn on_transport_error(&self) {
        let clients: Vec<ClientTransaction> = {
            let nict = self.nict.lock().expect("Lock failed");
            let ict = self.ict.lock().expect("Lock failed");
            nict.values()
                .cloned()
                .map(ClientTransaction::NonInvite)
                .chain(ict.values().cloned().map(ClientTransaction::Invite))
                .collect()
        };
        let servers: Vec<ServerTransaction> = {
            let nist = self.nist.lock().expect("Lock failed");
            let ist = self.ist.lock().expect("Lock failed");
            nist.values()
                .cloned()
                .map(ServerTransaction::NonInvite)
                .chain(ist.values().cloned().map(ServerTransaction::Invite))
                .collect()
        };

        clients.iter().for_each(ClientTransaction::on_transport_error);
        servers.iter().for_each(ServerTransaction::on_transport_error);
    }

    /// Returns `true` for an out of dialog request sharing From tag, Call-ID
    /// and CSeq with the request of a live server transaction while having
    /// another branch (RFC 3261 8.2.2.2).
    pub(crate) fn is_merged_request(&self, request: &IncomingRequest) -> bool {
        let branch = request.via_branch().unwrap_or_default();
        if request.method().is_invite() {
            let ist = self.ist.lock().expect("Lock failed");
            !ist.contains_key(branch) && ist.values().any(|tx| tx.is_merged_with(request))
        } else {
            let nist = self.nist.lock().expect("Lock failed");
            !nist.contains_key(branch) && nist.values().any(|tx| tx.is_merged_with(request))
        }
    }

    /// Matches `request` against the server transactions. Returns `true`
    /// when the request was absorbed: a retransmission, or an ACK or CANCEL
    /// the transaction layer answers itself.
    pub(crate) fn check_transaction(&self, request: &IncomingRequest) -> bool {
        let branch = request.via_branch().unwrap_or_default();

        match request.method() {
            SipMethod::Invite => {
                let Some(tx) = self.find_ist(branch) else {
                    return false;
                };
                // Retransmissions in Accepted are absorbed (RFC 6026 7.1).
                if tx.state() == State::Proceeding {
                    tx.resend_last_response();
                }
                true
            }
            SipMethod::Ack => {
                let Some(tx) = self.find_ist(branch) else {
                    // ACK for a 2xx, the dialog takes it.
                    return false;
                };
                match tx.state() {
                    State::Accepted => false,
                    State::Completed => {
                        tx.confirm();
                        true
                    }
                    State::Confirmed => true,
                    _ => false,
                }
            }
            SipMethod::Cancel => {
                let Some(tx) = self.find_ist(branch) else {
                    reply_sl(request, 481);
                    return true;
                };
                reply_sl(request, 200);
                tx.state() != State::Proceeding
            }
            _ => {
                let Some(tx) = self.find_nist(branch) else {
                    return false;
                };
                if matches!(tx.state(), State::Proceeding | State::Completed) {
                    tx.resend_last_response();
                }
                true
            }
        }
    }
}

fn reply_sl(request: &IncomingRequest, code: u16) {
    if let Err(err) = request.reply_sl(code, None) {
        log::debug!("unable to reply {} to {}: {}", code, request.method(), err);
    }
}
