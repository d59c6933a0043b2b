//! Checks run on every received message before transaction matching.
//!
//! A request failing a check is answered statelessly with the matching
//! error response; a failing response is dropped.

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::message::{IncomingRequest, IncomingResponse, SipMessage};
use crate::transaction::TransactionLayer;

/// The headers every message must carry.
const MINIMUM_HEADERS: [&str; 5] = ["From", "To", "Call-ID", "CSeq", "Via"];

/// Fails with the first mandatory header missing from `headers`.
pub(crate) fn check_minimum_headers(headers: &Headers) -> Result<()> {
    match MINIMUM_HEADERS.into_iter().find(|name| !headers.contains(name)) {
        Some(name) => Err(Error::MissingRequiredHeader(name)),
        None => Ok(()),
    }
}

/// Returns `true` if `message` may go on to the transaction layer.
///
/// `call_id_prefix` is the prefix of the Call-IDs this user agent
/// generates, used to spot our own requests coming back. Requests are
/// answered through their transport, which must already be set.
pub fn check(message: &SipMessage, layer: &TransactionLayer, call_id_prefix: &str) -> bool {
    match message {
        SipMessage::Request(request) => check_request(request, layer, call_id_prefix),
        SipMessage::Response(response) => check_response(response, layer),
    }
}

fn check_request(request: &IncomingRequest, layer: &TransactionLayer, call_id_prefix: &str) -> bool {
    if request.ruri().scheme() != "sip" {
        reply(request, 416);
        return false;
    }

    if request.to_tag().is_none() && request.call_id().starts_with(call_id_prefix) {
        log::debug!("dropping a request of our own that looped back");
        reply(request, 482);
        return false;
    }

    let length = request.body().map_or(0, str::len);
    if request.content_length().is_some_and(|declared| declared as usize > length) {
        reply(request, 400);
        return false;
    }

    if request.to_tag().is_none() && layer.is_merged_request(request) {
        reply(request, 482);
        return false;
    }

    true
}

fn check_response(response: &IncomingResponse, layer: &TransactionLayer) -> bool {
    let via = response.via();
    if via.host != layer.via_host() || via.port.is_some() {
        log::debug!("Via sent-by in the response does not match our Via host, dropping");
        return false;
    }

    if response.headers().count("Via") > 1 {
        log::debug!("more than one Via header field present in the response, dropping");
        return false;
    }

    let length = response.body().map_or(0, str::len);
    if response.content_length().is_some_and(|declared| declared as usize > length) {
        log::debug!("message body length is lower than the value in Content-Length header field, dropping");
        return false;
    }

    true
}

fn reply(request: &IncomingRequest, code: u16) {
    if request.method().is_ack() {
        return;
    }
    if let Err(err) = request.reply_sl(code, None) {
        log::debug!("unable to send {} reply: {}", code, err);
    }
}
