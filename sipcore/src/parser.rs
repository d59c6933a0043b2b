//! SIP message framing.
//!
//! [`parse_message`] splits a wire message into its start line, header lines
//! and body, then hands every piece to the grammar. A malformed header line
//! is dropped; a malformed start line or broken framing rejects the whole
//! message.

use crate::error::{Error, Result};
use crate::grammar::{self, ParseFailure, ParsedValue, Rule, StartLine};
use crate::headers::Headers;
use crate::message::{IncomingMessage, IncomingRequest, IncomingResponse, SipMessage};

const CRLF: &str = "\r\n";

/// Parses one SIP message received from the transport.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the start line does not parse or the header
/// block is not properly terminated, and [`Error::MissingRequiredHeader`]
/// if a mandatory header is absent.
///
/// # Examples
///
/// ```
/// # use sipcore::parser::parse_message;
/// # use sipcore::message::SipMessage;
/// let data = "SIP/2.0 180 Ringing\r\n\
///     v: SIP/2.0/WS a.invalid;branch=z9hG4bK776\r\n\
///     f: <sip:alice@atlanta.com>;tag=1928301774\r\n\
///     t: <sip:bob@biloxi.com>;tag=a6c85cf\r\n\
///     i: a84b4c76e66710\r\n\
///     CSeq: 314159 INVITE\r\n\
///     l: 0\r\n\r\n";
///
/// let SipMessage::Response(response) = parse_message(data).unwrap() else {
///     unreachable!()
/// };
/// assert_eq!(response.status_code(), 180);
/// assert_eq!(response.call_id(), "a84b4c76e66710");
/// ```
pub fn parse_message(data: &str) -> Result<SipMessage> {
    let Some(line_end) = data.find(CRLF) else {
        return Err(framing_error(data.len()));
    };

    let start_line = grammar::parse(&data[..line_end], Rule::RequestResponse)?;
    let Ok(start_line) = start_line.into_start_line() else {
        return Err(framing_error(0));
    };

    let mut headers = Headers::new();
    let mut pos = line_end + CRLF.len();
    loop {
        if data[pos..].starts_with(CRLF) {
            pos += CRLF.len();
            break;
        }
        let end = header_end(data, pos).ok_or_else(|| framing_error(data.len()))?;
        add_header(&mut headers, &data[pos..end]);
        pos = end + CRLF.len();
    }

    let body = extract_body(&data[pos..], &headers);
    let message = IncomingMessage::new(headers, body, data.to_owned())?;

    Ok(match start_line {
        StartLine::Request { method, uri } => {
            SipMessage::Request(IncomingRequest::new(method, uri, message))
        }
        StartLine::Response {
            status_code,
            reason_phrase,
        } => SipMessage::Response(IncomingResponse::new(status_code, reason_phrase, message)),
    })
}

fn framing_error(offset: usize) -> Error {
    Error::Parse(ParseFailure {
        offset,
        expected: vec!["CRLF".into()],
    })
}

/// Returns the offset of the CRLF ending the header line starting at
/// `start`. A CRLF followed by SP or HTAB continues the line.
fn header_end(data: &str, start: usize) -> Option<usize> {
    let mut from = start;
    loop {
        let end = from + data[from..].find(CRLF)?;
        let next = data.as_bytes().get(end + CRLF.len());
        if matches!(next, Some(b' ' | b'\t')) {
            from = end + CRLF.len();
        } else {
            return Some(end);
        }
    }
}

fn add_header(headers: &mut Headers, line: &str) {
    let Some((name, value)) = line.split_once(':') else {
        log::warn!("dropping header line without colon: {:?}", line);
        return;
    };
    let name = name.trim();
    if name.is_empty() {
        log::warn!("dropping header line without name: {:?}", line);
        return;
    }

    let value = unfold(value);
    if let Err(err) = headers.add(name, &value) {
        log::warn!("dropping malformed {} header {:?}: {}", name, value, err);
    }
}

/// Replaces every folding CRLF and the whitespace after it with one space.
fn unfold(value: &str) -> String {
    if !value.contains(CRLF) {
        return value.to_owned();
    }
    let mut lines = value.split(CRLF);
    let mut unfolded = lines.next().unwrap_or_default().trim_end().to_owned();
    for line in lines {
        unfolded.push(' ');
        unfolded.push_str(line.trim());
    }
    unfolded
}

/// The body, cut to Content-Length octets when the header is present.
///
/// A cut falling inside a multi-byte character moves back to the start of
/// that character, leaving the body shorter than Content-Length.
fn extract_body(rest: &str, headers: &Headers) -> Option<String> {
    let length = headers
        .parsed("Content-Length")
        .and_then(ParsedValue::as_number)
        .map(|length| *length as usize);

    let body = match length {
        Some(mut length) if length < rest.len() => {
            while !rest.is_char_boundary(length) {
                length -= 1;
            }
            rest[..length].to_owned()
        }
        _ => rest.to_owned(),
    };

    if body.is_empty() { None } else { Some(body) }
}
