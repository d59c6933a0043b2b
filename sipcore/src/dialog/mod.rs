//! SIP dialogs (RFC 3261 section 12).
//!
//! A [`Dialog`] tracks one call leg: its identity, sequence numbers, remote
//! target and route set. It validates in-dialog requests before handing
//! them to its [`DialogOwner`] and builds the requests we send inside it.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::{DialogError, Error, Result};
use crate::message::{
    IncomingMessage, IncomingRequest, IncomingResponse, OutgoingRequest, RequestParams, SipMethod,
    Uri,
};
use crate::transaction::{State, TransactionObserver};
use crate::ua::{UserAgent, WeakUserAgent};

mod request_sender;

pub use request_sender::{DialogRequestHandler, DialogRequestSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Early,
    Confirmed,
}

/// Unique identifier of a SIP dialog (Call-ID + local tag + remote tag).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(call_id: &str, local_tag: &str, remote_tag: &str) -> Self {
        Self {
            call_id: call_id.to_owned(),
            local_tag: local_tag.to_owned(),
            remote_tag: remote_tag.to_owned(),
        }
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.call_id, self.local_tag, self.remote_tag)
    }
}

/// The session or subscription a dialog belongs to.
pub trait DialogOwner: Send + Sync {
    /// A request that passed the in-dialog checks.
    fn receive_request(&self, request: IncomingRequest);

    fn is_terminated(&self) -> bool;
}

/// Options for [`Dialog::send_request`].
#[derive(Clone, Default)]
pub struct DialogRequestOptions {
    pub extra_headers: Vec<String>,
    pub body: Option<String>,
    pub handler: Option<Arc<dyn DialogRequestHandler>>,
}

/// A call leg between us and a remote user agent.
///
/// Cloning is cheap; every clone refers to the same dialog.
#[derive(Clone)]
pub struct Dialog(Arc<Inner>);

struct Inner {
    id: DialogId,
    /// Whether we sent the request that created the dialog.
    uac: bool,
    owner: Weak<dyn DialogOwner>,
    ua: WeakUserAgent,
    data: Mutex<DialogData>,
}

struct DialogData {
    state: DialogState,
    local_seqnum: Option<u32>,
    remote_seqnum: Option<u32>,
    local_uri: Uri,
    remote_uri: Uri,
    remote_target: Uri,
    /// Route header values, in the order our requests carry them.
    route_set: Vec<String>,
    /// CSeq of the INVITE still waiting for its ACK.
    ack_seqnum: Option<u32>,
    uac_pending_reply: bool,
    uas_pending_reply: bool,
    terminated: bool,
}

impl Dialog {
    /// Creates the dialog of a request we received and answer with a To tag
    /// already set, and adds it to the user agent.
    ///
    /// # Errors
    ///
    /// Fails with [`DialogError`] if the request has no Contact or lacks a
    /// tag.
    pub fn new_uas(
        owner: &Arc<dyn DialogOwner>,
        ua: &UserAgent,
        request: &IncomingRequest,
        state: DialogState,
    ) -> Result<Self> {
        let contact = request.contact().ok_or(DialogError::MissingContact)?;
        let local_tag = request.to_tag().ok_or(DialogError::MissingTag("To"))?;
        let remote_tag = request.from_tag().ok_or(DialogError::MissingTag("From"))?;

        let data = DialogData {
            state,
            local_seqnum: None,
            remote_seqnum: Some(request.cseq()),
            local_uri: request.to().uri().clone(),
            remote_uri: request.from().uri().clone(),
            remote_target: contact.uri().clone(),
            route_set: record_route(request),
            ack_seqnum: Some(request.cseq()),
            uac_pending_reply: false,
            uas_pending_reply: false,
            terminated: false,
        };
        let id = DialogId::new(request.call_id(), local_tag, remote_tag);

        Ok(Self::register(id, false, owner, ua, data))
    }

    /// Creates the dialog of a request we sent from a 1xx or 2xx response
    /// carrying a To tag, and adds it to the user agent.
    ///
    /// # Errors
    ///
    /// Fails with [`DialogError`] if the response has no Contact or lacks a
    /// tag.
    pub fn new_uac(
        owner: &Arc<dyn DialogOwner>,
        ua: &UserAgent,
        response: &IncomingResponse,
    ) -> Result<Self> {
        let contact = response.contact().ok_or(DialogError::MissingContact)?;
        let local_tag = response.from_tag().ok_or(DialogError::MissingTag("From"))?;
        let remote_tag = response.to_tag().ok_or(DialogError::MissingTag("To"))?;

        let mut route_set = record_route(response);
        route_set.reverse();

        let state = if response.status_code() < 200 {
            DialogState::Early
        } else {
            DialogState::Confirmed
        };
        let data = DialogData {
            state,
            local_seqnum: Some(response.cseq()),
            remote_seqnum: None,
            local_uri: response.from().uri().clone(),
            remote_uri: response.to().uri().clone(),
            remote_target: contact.uri().clone(),
            route_set,
            ack_seqnum: None,
            uac_pending_reply: false,
            uas_pending_reply: false,
            terminated: false,
        };
        let id = DialogId::new(response.call_id(), local_tag, remote_tag);

        Ok(Self::register(id, true, owner, ua, data))
    }

    fn register(
        id: DialogId,
        uac: bool,
        owner: &Arc<dyn DialogOwner>,
        ua: &UserAgent,
        data: DialogData,
    ) -> Self {
        let dialog = Self(Arc::new(Inner {
            id,
            uac,
            owner: Arc::downgrade(owner),
            ua: ua.downgrade(),
            data: Mutex::new(data),
        }));
        ua.new_dialog(dialog.clone());
        dialog
    }

    pub fn id(&self) -> &DialogId {
        &self.0.id
    }

    pub fn is_uac(&self) -> bool {
        self.0.uac
    }

    pub fn state(&self) -> DialogState {
        self.lock().state
    }

    pub fn owner(&self) -> Option<Arc<dyn DialogOwner>> {
        self.0.owner.upgrade()
    }

    pub fn local_seqnum(&self) -> Option<u32> {
        self.lock().local_seqnum
    }

    pub fn remote_seqnum(&self) -> Option<u32> {
        self.lock().remote_seqnum
    }

    pub fn remote_target(&self) -> Uri {
        self.lock().remote_target.clone()
    }

    pub fn route_set(&self) -> Vec<String> {
        self.lock().route_set.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminated
    }

    /// Confirms an early dialog with the 2xx that completed it. As UAC the
    /// route set is taken again from the 2xx (RFC 3261 13.2.2.4).
    pub fn update(&self, message: &IncomingMessage) {
        let mut data = self.lock();
        data.state = DialogState::Confirmed;
        if self.0.uac {
            let mut route_set = record_route(message);
            route_set.reverse();
            data.route_set = route_set;
        }
    }

    /// Removes the dialog from the user agent. Calling it again does
    /// nothing.
    pub fn terminate(&self) {
        if std::mem::replace(&mut self.lock().terminated, true) {
            return;
        }
        log::trace!("terminating dialog {}", self.0.id);
        if let Some(ua) = self.0.ua.upgrade() {
            ua.destroy_dialog(&self.0.id);
        }
    }

    /// Builds a request within the dialog. ACK and CANCEL reuse the current
    /// local sequence number; any other method takes the next one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] once the user agent is gone.
    pub fn create_request(
        &self,
        method: SipMethod,
        extra_headers: Vec<String>,
        body: Option<String>,
    ) -> Result<OutgoingRequest> {
        let ua = self.ua()?;

        let (target, params) = {
            let mut guard = self.lock();
            let data = &mut *guard;
            let seqnum = data
                .local_seqnum
                .get_or_insert_with(|| rand::random_range(0..10_000));
            if !matches!(method, SipMethod::Ack | SipMethod::Cancel) {
                *seqnum += 1;
            }
            let params = RequestParams {
                route_set: data.route_set.clone(),
                call_id: Some(self.0.id.call_id.clone()),
                cseq: Some(*seqnum),
                from_uri: Some(data.local_uri.clone()),
                from_tag: Some(self.0.id.local_tag.clone()),
                to_uri: Some(data.remote_uri.clone()),
                to_tag: Some(self.0.id.remote_tag.clone()),
                ..Default::default()
            };
            (data.remote_target.clone(), params)
        };

        Ok(OutgoingRequest::new(
            method,
            target,
            ua.config(),
            params,
            extra_headers,
            body,
        ))
    }

    /// Builds and sends a request within the dialog, returning what was
    /// sent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotReady`] once the user agent is gone.
    pub fn send_request(
        &self,
        method: SipMethod,
        options: DialogRequestOptions,
    ) -> Result<OutgoingRequest> {
        let request = self.create_request(method, options.extra_headers, options.body)?;
        let handler = options
            .handler
            .unwrap_or_else(|| Arc::new(request_sender::IgnoreOutcome) as Arc<dyn DialogRequestHandler>);
        DialogRequestSender::new(self, request.clone(), handler).send();
        Ok(request)
    }

    /// Checks an in-dialog request and hands it to the owner if it passes.
    pub fn receive_request(&self, request: IncomingRequest) {
        if !self.check_in_dialog_request(&request) {
            return;
        }

        {
            let mut data = self.lock();
            if request.method().is_ack() {
                data.ack_seqnum = None;
            } else if request.method().is_invite() {
                data.ack_seqnum = Some(request.cseq());
            }
        }

        match self.owner() {
            Some(owner) => owner.receive_request(request),
            None => log::debug!("dialog {} has no owner left", self.0.id),
        }
    }

    /// RFC 3261 12.2.2 sequencing and 14.2 session modification checks.
    /// Returns `false` if the request must not reach the owner.
    fn check_in_dialog_request(&self, request: &IncomingRequest) -> bool {
        let method = request.method();
        let cseq = request.cseq();

        {
            let mut data = self.lock();
            let remote_seqnum = data.remote_seqnum;
            match remote_seqnum {
                None => data.remote_seqnum = Some(cseq),
                Some(remote) if cseq < remote => {
                    if method.is_ack() {
                        // Not the ACK we are waiting for.
                        return data.ack_seqnum == Some(cseq);
                    }
                    drop(data);
                    reply(request, 500, &[]);
                    return false;
                }
                Some(remote) if cseq > remote => data.remote_seqnum = Some(cseq),
                Some(_) => (),
            }
        }

        let transaction = request.server_transaction();
        let has_body = request.body().is_some_and(|body| !body.is_empty());
        if method.modifies_session(has_body) {
            let (uac_pending, uas_pending) = {
                let data = self.lock();
                (data.uac_pending_reply, data.uas_pending_reply)
            };

            if uac_pending {
                reply(request, 491, &[]);
            } else if uas_pending {
                let retry_after = rand::random_range(1..=10u32);
                reply(request, 500, &[format!("Retry-After: {}", retry_after)]);
                return false;
            } else {
                self.lock().uas_pending_reply = true;
                if let Some(transaction) = transaction {
                    transaction.add_observer(Arc::new(UasPendingReset(Arc::downgrade(&self.0))));
                }
            }

            if let (Some(contact), Some(transaction)) = (request.contact(), transaction) {
                transaction.add_observer(Arc::new(RemoteTargetUpdate {
                    dialog: Arc::downgrade(&self.0),
                    target: contact.uri().clone(),
                    when: State::Accepted,
                }));
            }
        } else if *method == SipMethod::Notify {
            // RFC 6665 3.2
            if let (Some(contact), Some(transaction)) = (request.contact(), transaction) {
                transaction.add_observer(Arc::new(RemoteTargetUpdate {
                    dialog: Arc::downgrade(&self.0),
                    target: contact.uri().clone(),
                    when: State::Completed,
                }));
            }
        }

        true
    }

    /// Takes the next local sequence number, for a request sent again.
    pub(crate) fn next_local_seqnum(&self) -> u32 {
        let mut data = self.lock();
        let seqnum = data.local_seqnum.map_or(1, |seqnum| seqnum + 1);
        data.local_seqnum = Some(seqnum);
        seqnum
    }

    pub(crate) fn set_uac_pending_reply(&self, pending: bool) {
        self.lock().uac_pending_reply = pending;
    }

    pub(crate) fn ua(&self) -> Result<UserAgent> {
        self.0
            .ua
            .upgrade()
            .ok_or_else(|| Error::NotReady("user agent is gone".into()))
    }

    fn lock(&self) -> MutexGuard<'_, DialogData> {
        self.0.data.lock().expect("Lock failed")
    }
}

impl fmt::Debug for Dialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dialog")
            .field("id", &self.0.id)
            .field("uac", &self.0.uac)
            .field("state", &self.state())
            .finish()
    }
}

fn record_route(message: &IncomingMessage) -> Vec<String> {
    message
        .header_values("Record-Route")
        .into_iter()
        .map(str::to_owned)
        .collect()
}

fn reply(request: &IncomingRequest, code: u16, extra_headers: &[String]) {
    if let Err(err) = request.reply(code, None, extra_headers, None) {
        log::debug!("unable to reply {} to {}: {}", code, request.method(), err);
    }
}

/// Clears `uas_pending_reply` once our answer to a session modifying
/// request is final.
struct UasPendingReset(Weak<Inner>);

impl TransactionObserver for UasPendingReset {
    fn on_state_changed(&self, state: State) -> bool {
        if !matches!(state, State::Accepted | State::Completed | State::Terminated) {
            return true;
        }
        if let Some(inner) = self.0.upgrade() {
            Dialog(inner).lock().uas_pending_reply = false;
        }
        false
    }
}

/// Replaces the remote target with the Contact of a request once its
/// transaction reaches `when`.
struct RemoteTargetUpdate {
    dialog: Weak<Inner>,
    target: Uri,
    when: State,
}

impl TransactionObserver for RemoteTargetUpdate {
    fn on_state_changed(&self, state: State) -> bool {
        if state == self.when {
            if let Some(inner) = self.dialog.upgrade() {
                Dialog(inner).lock().remote_target = self.target.clone();
            }
            return false;
        }
        state != State::Terminated
    }
}
