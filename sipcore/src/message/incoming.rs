use std::fmt;
use std::ops::Deref;

use crate::error::{Error, Result};
use crate::grammar::{ParsedValue, Rule};
use crate::headers::{Challenge, Headers, Replaces, Via, headerize};
use crate::message::{
    ACCEPTED_BODY_TYPES, ALLOWED_METHODS, NameAddrHeader, SipMethod, Uri, reason_phrase,
};
use crate::new_tag;
use crate::sanity;
use crate::transaction::ServerTransaction;
use crate::transport::Transport;

/// The parts shared by every received message.
///
/// The headers every SIP message must carry (Via, From, To, Call-ID and
/// CSeq) are extracted once, when the message is built.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    headers: Headers,
    body: Option<String>,
    data: String,
    via: Via,
    from: NameAddrHeader,
    to: NameAddrHeader,
    to_tag: Option<String>,
    call_id: String,
    cseq: u32,
    cseq_method: SipMethod,
}

impl IncomingMessage {
    /// Builds a message from its parsed headers.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingRequiredHeader`] if one of the mandatory
    /// headers is absent.
    pub(crate) fn new(headers: Headers, body: Option<String>, data: String) -> Result<Self> {
        sanity::check_minimum_headers(&headers)?;

        let via = headers
            .parsed("Via")
            .and_then(ParsedValue::as_via)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Via"))?;
        let from = headers
            .parsed("From")
            .and_then(ParsedValue::as_name_addr)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("From"))?;
        let to = headers
            .parsed("To")
            .and_then(ParsedValue::as_name_addr)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("To"))?;
        let call_id = headers
            .parsed("Call-ID")
            .and_then(ParsedValue::as_text)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("Call-ID"))?;
        let cseq = headers
            .parsed("CSeq")
            .and_then(ParsedValue::as_cseq)
            .cloned()
            .ok_or(Error::MissingRequiredHeader("CSeq"))?;

        Ok(Self {
            to_tag: to.tag().map(str::to_owned),
            headers,
            body,
            data,
            via,
            from,
            to,
            call_id,
            cseq: cseq.value,
            cseq_method: cseq.method,
        })
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw value of the first `name` header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the raw values of `name`, in wire order.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers.get_all(name).map(|h| h.raw()).collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Returns the typed value of the `idx`-th `name` header.
    pub fn parsed_header(&self, name: &str, idx: usize) -> Option<&ParsedValue> {
        self.headers.parsed_at(name, idx)
    }

    /// Like [`IncomingMessage::parsed_header`], for callers that need to
    /// tell a header without grammar from a missing one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSupported`] if `name` has no grammar rule and
    /// [`Error::InvalidArgument`] if the message has no such value.
    pub fn parse_header(&self, name: &str, idx: usize) -> Result<&ParsedValue> {
        let name = headerize(name);
        if Rule::for_header(&name).is_none() {
            return Err(Error::NotSupported(format!("no grammar for {} header", name)));
        }
        self.headers
            .parsed_at(&name, idx)
            .ok_or_else(|| Error::InvalidArgument(format!("no {} header at {}", name, idx)))
    }

    /// The first (topmost) Via.
    pub fn via(&self) -> &Via {
        &self.via
    }

    pub fn via_branch(&self) -> Option<&str> {
        self.via.branch.as_deref()
    }

    pub fn from(&self) -> &NameAddrHeader {
        &self.from
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.from.tag()
    }

    pub fn to(&self) -> &NameAddrHeader {
        &self.to
    }

    /// The To tag. For requests this is the tag we answer with, once set.
    pub fn to_tag(&self) -> Option<&str> {
        self.to_tag.as_deref()
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn cseq_method(&self) -> &SipMethod {
        &self.cseq_method
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    /// The message as received.
    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn content_length(&self) -> Option<u32> {
        self.headers
            .parsed("Content-Length")
            .and_then(ParsedValue::as_number)
            .copied()
    }

    /// The first Contact.
    pub fn contact(&self) -> Option<&NameAddrHeader> {
        self.headers
            .parsed("Contact")
            .and_then(ParsedValue::as_name_addr)
    }

    /// Every Contact, in wire order.
    pub fn contacts(&self) -> Vec<&NameAddrHeader> {
        self.headers
            .get_all("Contact")
            .filter_map(|h| h.parsed().and_then(ParsedValue::as_name_addr))
            .collect()
    }

    /// The challenge of the first `WWW-Authenticate` or
    /// `Proxy-Authenticate` header.
    pub fn challenge(&self, name: &str) -> Option<&Challenge> {
        self.headers.parsed(name).and_then(ParsedValue::as_challenge)
    }

    pub fn replaces(&self) -> Option<&Replaces> {
        self.headers
            .parsed("Replaces")
            .and_then(ParsedValue::as_replaces)
    }

    /// The numeric value of `name`, for headers such as Expires.
    pub fn number(&self, name: &str) -> Option<u32> {
        self.headers.parsed(name).and_then(ParsedValue::as_number).copied()
    }
}

/// A request received from the transport.
#[derive(Clone)]
pub struct IncomingRequest {
    method: SipMethod,
    ruri: Uri,
    message: IncomingMessage,
    pub(crate) transport: Option<Transport>,
    pub(crate) server_transaction: Option<ServerTransaction>,
    pub(crate) session_timers: bool,
}

impl IncomingRequest {
    pub(crate) fn new(method: SipMethod, ruri: Uri, message: IncomingMessage) -> Self {
        Self {
            method,
            ruri,
            message,
            transport: None,
            server_transaction: None,
            session_timers: false,
        }
    }

    pub fn method(&self) -> &SipMethod {
        &self.method
    }

    /// The Request-URI.
    pub fn ruri(&self) -> &Uri {
        &self.ruri
    }

    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }

    /// The server transaction created for this request, if any.
    pub fn server_transaction(&self) -> Option<&ServerTransaction> {
        self.server_transaction.as_ref()
    }

    /// Sets the tag added to the To header of our replies.
    pub fn set_to_tag(&mut self, tag: impl Into<String>) {
        self.message.to_tag = Some(tag.into());
    }

    /// Answers the request through its server transaction.
    ///
    /// `reason` defaults to the standard phrase of `code`. `extra_headers`
    /// are complete header lines.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for a code outside 100-699,
    /// [`Error::InvalidState`] if the request has no server transaction and
    /// [`Error::Transport`] if the response could not be sent.
    pub fn reply(
        &self,
        code: u16,
        reason: Option<&str>,
        extra_headers: &[String],
        body: Option<&str>,
    ) -> Result<()> {
        let reason = validate_reply(code, reason)?;
        let Some(transaction) = &self.server_transaction else {
            return Err(Error::InvalidState(format!(
                "no server transaction to reply to {}",
                self.method
            )));
        };

        let response = self.build_response(code, reason, extra_headers, body);
        transaction.receive_response(code, response)
    }

    /// Answers the request without a server transaction.
    ///
    /// # Errors
    ///
    /// See [`IncomingRequest::reply`].
    pub fn reply_sl(&self, code: u16, reason: Option<&str>) -> Result<()> {
        let reason = validate_reply(code, reason)?;
        let Some(transport) = &self.transport else {
            return Err(Error::InvalidState("request has no transport".into()));
        };

        let mut response = format!("SIP/2.0 {} {}\r\n", code, reason);
        for via in self.header_values("Via") {
            response.push_str(&format!("Via: {}\r\n", via));
        }
        response.push_str(&format!("To: {}\r\n", self.reply_to(code)));
        response.push_str(&format!("From: {}\r\n", self.header("From").unwrap_or_default()));
        response.push_str(&format!("Call-ID: {}\r\n", self.call_id()));
        response.push_str(&format!("CSeq: {} {}\r\n", self.cseq(), self.method));
        response.push_str("Content-Length: 0\r\n\r\n");

        if transport.send(&response) {
            Ok(())
        } else {
            Err(Error::Transport)
        }
    }

    /// Renders a response to this request.
    pub(crate) fn build_response(
        &self,
        code: u16,
        reason: &str,
        extra_headers: &[String],
        body: Option<&str>,
    ) -> String {
        let mut response = format!("SIP/2.0 {} {}\r\n", code, reason);

        if self.method.is_invite() && code > 100 && code <= 200 {
            for route in self.header_values("Record-Route") {
                response.push_str(&format!("Record-Route: {}\r\n", route));
            }
        }
        for via in self.header_values("Via") {
            response.push_str(&format!("Via: {}\r\n", via));
        }
        response.push_str(&format!("To: {}\r\n", self.reply_to(code)));
        response.push_str(&format!("From: {}\r\n", self.header("From").unwrap_or_default()));
        response.push_str(&format!("Call-ID: {}\r\n", self.call_id()));
        response.push_str(&format!("CSeq: {} {}\r\n", self.cseq(), self.method));

        for line in extra_headers {
            response.push_str(line.trim());
            response.push_str("\r\n");
        }

        let mut supported = Vec::new();
        match self.method {
            SipMethod::Invite => {
                if self.session_timers {
                    supported.push("timer");
                }
                supported.extend(["ice", "replaces"]);
            }
            SipMethod::Update => {
                if self.session_timers {
                    supported.push("timer");
                }
                if body.is_some() {
                    supported.push("ice");
                }
                supported.push("replaces");
            }
            _ => (),
        }
        supported.push("outbound");
        response.push_str(&format!("Supported: {}\r\n", supported.join(",")));

        if matches!(self.method, SipMethod::Options) {
            response.push_str(&format!("Allow: {}\r\n", ALLOWED_METHODS));
            response.push_str(&format!("Accept: {}\r\n", ACCEPTED_BODY_TYPES));
        } else if code == 405 {
            response.push_str(&format!("Allow: {}\r\n", ALLOWED_METHODS));
        } else if code == 415 {
            response.push_str(&format!("Accept: {}\r\n", ACCEPTED_BODY_TYPES));
        }

        match body {
            Some(body) => {
                response.push_str("Content-Type: application/sdp\r\n");
                response.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
                response.push_str(body);
            }
            None => response.push_str("Content-Length: 0\r\n\r\n"),
        }

        response
    }

    /// The To header value of a reply with `code`.
    fn reply_to(&self, code: u16) -> String {
        let mut to = self.header("To").unwrap_or_default().to_owned();
        match self.to_tag() {
            None if code > 100 => to.push_str(&format!(";tag={}", new_tag())),
            Some(tag) if self.to().tag().is_none() => to.push_str(&format!(";tag={}", tag)),
            _ => (),
        }
        to
    }
}

fn validate_reply(code: u16, reason: Option<&str>) -> Result<&str> {
    if !(100..=699).contains(&code) {
        return Err(Error::InvalidArgument(format!("invalid status code {}", code)));
    }
    Ok(reason.or(reason_phrase(code)).unwrap_or_default())
}

impl Deref for IncomingRequest {
    type Target = IncomingMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

impl fmt::Debug for IncomingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingRequest")
            .field("method", &self.method)
            .field("ruri", &self.ruri)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A response received from the transport.
#[derive(Debug, Clone)]
pub struct IncomingResponse {
    status_code: u16,
    reason_phrase: String,
    message: IncomingMessage,
}

impl IncomingResponse {
    pub(crate) fn new(status_code: u16, reason_phrase: String, message: IncomingMessage) -> Self {
        Self {
            status_code,
            reason_phrase,
            message,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn reason_phrase(&self) -> &str {
        &self.reason_phrase
    }

    /// The method of the request this response answers.
    pub fn method(&self) -> &SipMethod {
        self.message.cseq_method()
    }

    pub fn message(&self) -> &IncomingMessage {
        &self.message
    }
}

impl Deref for IncomingResponse {
    type Target = IncomingMessage;

    fn deref(&self) -> &Self::Target {
        &self.message
    }
}

/// A parsed message, request or response.
#[derive(Debug, Clone)]
pub enum SipMessage {
    Request(IncomingRequest),
    Response(IncomingResponse),
}

impl SipMessage {
    pub fn message(&self) -> &IncomingMessage {
        match self {
            SipMessage::Request(request) => request,
            SipMessage::Response(response) => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{self, MockTransport};

    const INVITE: &str = "INVITE sip:alice@atlanta.com SIP/2.0\r\n\
        Record-Route: <sip:p2.example.com;lr>, <sip:p1.example.com;lr>\r\n\
        Via: SIP/2.0/WS p1.example.com;branch=z9hG4bK111\r\n\
        Via: SIP/2.0/WS bob.invalid;branch=z9hG4bK222\r\n\
        From: Bob <sip:bob@biloxi.com>;tag=a6c85cf\r\n\
        To: <sip:alice@atlanta.com>\r\n\
        Call-ID: 3848276298220188511\r\n\
        CSeq: 1 INVITE\r\n\
        Contact: <sip:bob@bob.invalid;transport=ws>\r\n\
        Content-Length: 0\r\n\r\n";

    fn request(data: &str) -> IncomingRequest {
        test_utils::parse_request(data)
    }

    #[test]
    fn test_parse_header_on_demand() {
        let invite = request(&INVITE.replace("Content-Length", "X-Custom: 1\r\nContent-Length"));

        assert_matches!(invite.parse_header("m", 0), Ok(ParsedValue::NameAddr(_)));
        assert_matches!(invite.parse_header("Record-Route", 1), Ok(ParsedValue::NameAddr(_)));
        assert_matches!(invite.parse_header("Record-Route", 2), Err(Error::InvalidArgument(_)));
        assert_matches!(invite.parse_header("X-Custom", 0), Err(Error::NotSupported(_)));
    }

    #[test]
    fn test_convenience_fields() {
        let request = request(INVITE);

        assert_eq!(request.method(), &SipMethod::Invite);
        assert_eq!(request.via_branch(), Some("z9hG4bK111"));
        assert_eq!(request.from_tag(), Some("a6c85cf"));
        assert_eq!(request.to_tag(), None);
        assert_eq!(request.call_id(), "3848276298220188511");
        assert_eq!(request.cseq(), 1);
        assert_eq!(request.content_length(), Some(0));
        assert_eq!(request.contact().map(|c| c.uri().host()), Some("bob.invalid"));
        assert_eq!(
            request.header_values("Record-Route"),
            ["<sip:p2.example.com;lr>", "<sip:p1.example.com;lr>"]
        );
    }

    #[test]
    fn test_build_response() {
        let mut request = request(INVITE);
        request.set_to_tag("as83kd9bs");

        let response = request.build_response(200, "OK", &["Contact: <sip:alice@a.invalid>".into()], Some("v=0"));

        assert_eq!(
            response,
            "SIP/2.0 200 OK\r\n\
             Record-Route: <sip:p2.example.com;lr>\r\n\
             Record-Route: <sip:p1.example.com;lr>\r\n\
             Via: SIP/2.0/WS p1.example.com;branch=z9hG4bK111\r\n\
             Via: SIP/2.0/WS bob.invalid;branch=z9hG4bK222\r\n\
             To: <sip:alice@atlanta.com>;tag=as83kd9bs\r\n\
             From: Bob <sip:bob@biloxi.com>;tag=a6c85cf\r\n\
             Call-ID: 3848276298220188511\r\n\
             CSeq: 1 INVITE\r\n\
             Contact: <sip:alice@a.invalid>\r\n\
             Supported: ice,replaces,outbound\r\n\
             Content-Type: application/sdp\r\n\
             Content-Length: 3\r\n\r\nv=0"
        );
    }

    #[test]
    fn test_trying_has_no_to_tag_nor_record_route() {
        let request = request(INVITE);
        let trying = request.build_response(100, "Trying", &[], None);

        assert!(trying.contains("To: <sip:alice@atlanta.com>\r\n"));
        assert!(!trying.contains("Record-Route"));

        let ringing = request.build_response(180, "Ringing", &[], None);
        assert!(ringing.contains("To: <sip:alice@atlanta.com>;tag="));
    }

    #[test]
    fn test_options_reply_lists_capabilities() {
        let options = INVITE.replace("INVITE sip", "OPTIONS sip").replace("1 INVITE", "1 OPTIONS");
        let request = request(&options);
        let response = request.build_response(200, "OK", &[], None);

        assert!(response.contains(&format!("Allow: {}\r\n", ALLOWED_METHODS)));
        assert!(response.contains(&format!("Accept: {}\r\n", ACCEPTED_BODY_TYPES)));
        assert!(!response.contains("Record-Route"));
    }

    #[test]
    fn test_reply_validates_code() {
        let request = request(INVITE);

        assert_matches!(request.reply(99, None, &[], None), Err(Error::InvalidArgument(_)));
        assert_matches!(request.reply(700, None, &[], None), Err(Error::InvalidArgument(_)));
        assert_matches!(request.reply(200, None, &[], None), Err(Error::InvalidState(_)));
    }

    #[test]
    fn test_reply_sl() {
        let transport = MockTransport::new();
        let mut request = request(INVITE);
        request.transport = Some(transport.clone().into_transport());

        request.reply_sl(404, None).unwrap();

        let sent = transport.last_message().unwrap();
        assert!(sent.starts_with("SIP/2.0 404 Not Found\r\nVia: SIP/2.0/WS p1.example.com;branch=z9hG4bK111\r\n"));
        assert!(sent.contains("CSeq: 1 INVITE\r\n"));
        assert!(sent.ends_with("Content-Length: 0\r\n\r\n"));

        transport.fail_sends(true);
        assert_matches!(request.reply_sl(404, None), Err(Error::Transport));
    }
}
