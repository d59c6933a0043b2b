//! SIP ABNF grammar.
//!
//! [`parse`] anchors on one named production and returns its semantic value.
//! Grammar mismatches are reported as a [`ParseFailure`] carrying the furthest
//! offset reached and the tokens expected there.

use std::fmt;
use std::ops::Range;

use enum_as_inner::EnumAsInner;

use crate::headers::{
    CSeq, Challenge, ContentType, Event, Reason, Replaces, SessionExpires, SubscriptionState, Via,
};
use crate::message::{NameAddrHeader, SipMethod, Uri};

mod rules;


use rules::Grammar;

/// The named productions [`parse`] can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Token,
    QuotedString,
    /// A quoted string with the quotes and backslash escapes removed.
    QuotedStringClean,
    SipUri,
    NameAddrHeader,
    /// Either a Request-Line or a Status-Line.
    RequestResponse,
    Via,
    CSeq,
    Contact,
    From,
    To,
    RecordRoute,
    Route,
    CallId,
    ContentLength,
    ContentType,
    MaxForwards,
    WwwAuthenticate,
    ProxyAuthenticate,
    SessionExpires,
    ReferTo,
    Replaces,
    Reason,
    SubscriptionState,
    Event,
    AllowEvents,
    Expires,
    MinExpires,
    Uuid,
    StatusCode,
    DeltaSeconds,
    Qvalue,
    Port,
    Host,
}

impl Rule {
    /// Returns the rule used to parse the header with canonical name `name`.
    pub fn for_header(name: &str) -> Option<Rule> {
        let rule = match name {
            "Via" => Rule::Via,
            "From" => Rule::From,
            "To" => Rule::To,
            "Call-ID" => Rule::CallId,
            "CSeq" => Rule::CSeq,
            "Contact" => Rule::Contact,
            "Record-Route" => Rule::RecordRoute,
            "Route" => Rule::Route,
            "Content-Length" => Rule::ContentLength,
            "Content-Type" => Rule::ContentType,
            "Max-Forwards" => Rule::MaxForwards,
            "WWW-Authenticate" => Rule::WwwAuthenticate,
            "Proxy-Authenticate" => Rule::ProxyAuthenticate,
            "Session-Expires" => Rule::SessionExpires,
            "Refer-To" => Rule::ReferTo,
            "Replaces" => Rule::Replaces,
            "Reason" => Rule::Reason,
            "Subscription-State" => Rule::SubscriptionState,
            "Event" => Rule::Event,
            "Allow-Events" => Rule::AllowEvents,
            "Expires" => Rule::Expires,
            "Min-Expires" => Rule::MinExpires,
            _ => return None,
        };
        Some(rule)
    }
}

/// A value together with the byte range of the input it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Range<usize>,
}

/// The first line of a SIP message.
#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
    Request { method: SipMethod, uri: Uri },
    Response { status_code: u16, reason_phrase: String },
}

/// The semantic value produced by a rule.
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum ParsedValue {
    /// Plain text: tokens, quoted strings, Call-ID, UUID, host.
    Text(String),
    /// Numeric rules: lengths, counters, delta-seconds, status codes, ports.
    Number(u32),
    Qvalue(f32),
    Uri(Uri),
    NameAddr(NameAddrHeader),
    /// Multi-valued headers such as Contact and Record-Route.
    NameAddrList(Vec<Spanned<NameAddrHeader>>),
    /// `Contact: *`
    Star,
    Via(Via),
    /// Every via-parm of a Via header value.
    ViaList(Vec<Spanned<Via>>),
    Cseq(CSeq),
    Challenge(Challenge),
    SessionExpires(SessionExpires),
    Replaces(Replaces),
    Reason(Reason),
    SubscriptionState(SubscriptionState),
    Event(Event),
    ContentType(ContentType),
    TokenList(Vec<String>),
    StartLine(StartLine),
}

/// A grammar mismatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    /// Furthest byte offset reached.
    pub offset: usize,
    /// Descriptions of the tokens expected at `offset`.
    pub expected: Vec<String>,
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parse error at offset {}: expected {}",
            self.offset,
            self.expected.join(" or ")
        )
    }
}

impl std::error::Error for ParseFailure {}

/// Parses `input` anchored on `rule`. The whole input must match.
pub fn parse(input: &str, rule: Rule) -> Result<ParsedValue, ParseFailure> {
    let mut grammar = Grammar::new(input);

    match grammar.start(rule) {
        Ok(value) if grammar.at_end() => Ok(value),
        Ok(_) => {
            grammar.expected("end of input");
            Err(grammar.failure())
        }
        Err(_) => Err(grammar.failure()),
    }
}
