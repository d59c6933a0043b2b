pub mod transaction;
pub mod transport;
pub mod ua;

pub use transport::MockTransport;

use std::sync::Arc;

use crate::config::Configuration;
use crate::message::{IncomingRequest, IncomingResponse, OutgoingRequest, SipMessage, SipMethod};
use crate::parser::parse_message;
use crate::{generate_branch, new_tag, random_token};

pub fn config() -> Configuration {
    Configuration::builder()
        .with_uri("sip:alice@atlanta.com")
        .with_display_name("Alice")
        .with_user_agent("sipcore-test")
        .with_session_timers(true)
        .build()
        .unwrap()
}

pub fn parse_request(data: &str) -> IncomingRequest {
    match parse_message(data).unwrap() {
        SipMessage::Request(request) => request,
        SipMessage::Response(_) => panic!("expected a request"),
    }
}

pub fn parse_response(data: &str) -> IncomingResponse {
    match parse_message(data).unwrap() {
        SipMessage::Response(response) => response,
        SipMessage::Request(_) => panic!("expected a response"),
    }
}

/// A response to `request`, as a server would send it back. The To tag is
/// only added to responses other than 100.
pub fn response_to(request: &OutgoingRequest, code: u16) -> IncomingResponse {
    let to = match code {
        100 => request.header("To").unwrap().to_owned(),
        _ if request.to_tag().is_some() => request.header("To").unwrap().to_owned(),
        _ => format!("{};tag=8321234356", request.header("To").unwrap()),
    };
    let data = format!(
        "SIP/2.0 {} {}\r\n\
         Via: {}\r\n\
         From: {}\r\n\
         To: {}\r\n\
         Call-ID: {}\r\n\
         CSeq: {} {}\r\n\
         Content-Length: 0\r\n\r\n",
        code,
        crate::message::reason_phrase(code).unwrap_or("Unknown"),
        request.header("Via").unwrap(),
        request.header("From").unwrap(),
        to,
        request.call_id(),
        request.cseq(),
        request.method(),
    );
    parse_response(&data)
}

/// A request received from `bob`, with a new branch and Call-ID.
pub fn server_request(method: SipMethod, transport: &Arc<MockTransport>) -> IncomingRequest {
    let data = format!(
        "{method} sip:alice@atlanta.com SIP/2.0\r\n\
         Via: SIP/2.0/WS bob.invalid;branch={}\r\n\
         Max-Forwards: 69\r\n\
         From: Bob <sip:bob@biloxi.com>;tag={}\r\n\
         To: Alice <sip:alice@atlanta.com>\r\n\
         Call-ID: {}\r\n\
         CSeq: 1 {method}\r\n\
         Contact: <sip:bob@bob.invalid;transport=ws>\r\n\
         Content-Length: 0\r\n\r\n",
        generate_branch(),
        new_tag(),
        random_token(20),
    );
    let mut request = parse_request(&data);
    request.transport = Some(transport.clone().into_transport());
    request
}

/// The ACK for a non-2xx final response to the INVITE `request`.
pub fn ack_for(request: &IncomingRequest) -> IncomingRequest {
    in_transaction(request, SipMethod::Ack)
}

pub fn cancel_for(request: &IncomingRequest) -> IncomingRequest {
    in_transaction(request, SipMethod::Cancel)
}

fn in_transaction(request: &IncomingRequest, method: SipMethod) -> IncomingRequest {
    let data = request
        .data()
        .replacen(request.method().as_str(), method.as_str(), 1)
        .replace(
            &format!("CSeq: {} {}", request.cseq(), request.method()),
            &format!("CSeq: {} {}", request.cseq(), method),
        );
    parse_request(&data)
}

/// The raw text of a response to the raw request `request`, carrying
/// `extra_headers` lines. A To tag is added to responses other than 100.
pub fn respond(request: &str, code: u16, extra_headers: &[&str]) -> String {
    let request = parse_request(request);
    let mut to = request.header("To").unwrap().to_owned();
    if code > 100 && request.to_tag().is_none() {
        to.push_str(";tag=8321234356");
    }

    let mut response = format!(
        "SIP/2.0 {} {}\r\n",
        code,
        crate::message::reason_phrase(code).unwrap_or("Unknown")
    );
    for via in request.header_values("Via") {
        response.push_str(&format!("Via: {}\r\n", via));
    }
    response.push_str(&format!("From: {}\r\n", request.header("From").unwrap()));
    response.push_str(&format!("To: {}\r\n", to));
    response.push_str(&format!("Call-ID: {}\r\n", request.call_id()));
    response.push_str(&format!("CSeq: {} {}\r\n", request.cseq(), request.method()));
    for line in extra_headers {
        response.push_str(line);
        response.push_str("\r\n");
    }
    response.push_str("Content-Length: 0\r\n\r\n");
    response
}
