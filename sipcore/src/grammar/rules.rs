//! Recursive-descent productions behind [`super::parse`].

use std::net::{Ipv4Addr, Ipv6Addr};

use util::Scanner;

use super::{ParseFailure, ParsedValue, Rule, Spanned, StartLine};
use crate::headers::{
    CSeq, Challenge, ContentType, Event, HostType, Reason, Replaces, SessionExpires,
    SubscriptionState, Via,
};
use crate::macros::{comma_separated, lookup_table, semi_separated};
use crate::message::uri::unescape;
use crate::message::{NameAddrHeader, Params, SipMethod, Uri};

/// Alphanumeric is valid in all sip message components.
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
/// Unreserved characters in user, password, uri and header
/// parameters in SIP uris.
const UNRESERVED: &[u8] = b"-_.!~*'()";
/// Escaped character in SIP URIs.
const ESCAPED: &[u8] = b"%";
/// Unreserved charaters in user part of SIP URIs.
const USER_UNRESERVED: &[u8] = b"&=+$,;?/";
/// Token in SIP Messages
const TOKEN: &[u8] = b"-.!%*_`'~+";
/// Password valid characters in SIP URIs.
const PASS: &[u8] = b"&=+$,";
/// Valid characters in SIP URIs host part.
const HOST: &[u8] = b"-.";
/// Extra characters of the `word` rule used by Call-ID.
const WORD: &[u8] = b"()<>:\\\"/[]?{}";

// For reading user in uri.
lookup_table!(USER_TAB => ALPHANUMERIC, UNRESERVED, USER_UNRESERVED, ESCAPED);
// For reading password in uri.
lookup_table!(PASS_TAB => ALPHANUMERIC, UNRESERVED, ESCAPED, PASS);
// For reading host in uri.
lookup_table!(HOST_TAB => ALPHANUMERIC, HOST);
// For reading parameter in uri.
lookup_table!(PARAM_TAB => b"[]/:&+$", ALPHANUMERIC, UNRESERVED, ESCAPED);
// For reading header parameter in uri.
lookup_table!(HDR_TAB => b"[]/?:+$", ALPHANUMERIC, UNRESERVED, ESCAPED);
// For reading token.
lookup_table!(TOKEN_TAB => ALPHANUMERIC, TOKEN);
// For reading Call-ID words.
lookup_table!(WORD_TAB => ALPHANUMERIC, TOKEN, WORD);

#[inline(always)]
fn is_wsp(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

#[inline(always)]
fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

/// A production did not match. Details are kept in [`Grammar`].
#[derive(Debug)]
pub(super) struct Fail;

type PResult<T> = Result<T, Fail>;

/// The grammar state: the scanner plus the furthest failure seen so far.
pub(super) struct Grammar<'a> {
    s: Scanner<'a>,
    furthest: usize,
    expected: Vec<&'static str>,
}

impl<'a> Grammar<'a> {
    pub(super) fn new(input: &'a str) -> Self {
        Self {
            s: Scanner::new(input),
            furthest: 0,
            expected: Vec::new(),
        }
    }

    pub(super) fn start(&mut self, rule: Rule) -> PResult<ParsedValue> {
        let value = match rule {
            Rule::Token => ParsedValue::Text(self.token()?.to_owned()),
            Rule::QuotedString => ParsedValue::Text(self.quoted_string()?.0.to_owned()),
            Rule::QuotedStringClean => ParsedValue::Text(self.quoted_string()?.1),
            Rule::SipUri => ParsedValue::Uri(self.sip_uri(true)?),
            Rule::NameAddrHeader => ParsedValue::NameAddr(self.name_addr_header(true)?),
            Rule::RequestResponse => ParsedValue::StartLine(self.start_line()?),
            Rule::Via => ParsedValue::ViaList(self.via_list()?),
            Rule::CSeq => ParsedValue::Cseq(self.cseq()?),
            Rule::Contact => self.contact()?,
            Rule::From | Rule::To | Rule::ReferTo => {
                ParsedValue::NameAddr(self.name_addr_header(true)?)
            }
            Rule::RecordRoute | Rule::Route => ParsedValue::NameAddrList(self.route_list()?),
            Rule::CallId => ParsedValue::Text(self.call_id()?.to_owned()),
            Rule::ContentLength
            | Rule::MaxForwards
            | Rule::Expires
            | Rule::MinExpires
            | Rule::DeltaSeconds => ParsedValue::Number(self.number()?),
            Rule::ContentType => ParsedValue::ContentType(self.content_type()?),
            Rule::WwwAuthenticate | Rule::ProxyAuthenticate => {
                ParsedValue::Challenge(self.challenge()?)
            }
            Rule::SessionExpires => ParsedValue::SessionExpires(self.session_expires()?),
            Rule::Replaces => ParsedValue::Replaces(self.replaces()?),
            Rule::Reason => ParsedValue::Reason(self.reason()?),
            Rule::SubscriptionState => {
                ParsedValue::SubscriptionState(self.subscription_state()?)
            }
            Rule::Event => ParsedValue::Event(self.event()?),
            Rule::AllowEvents => ParsedValue::TokenList(self.token_list()?),
            Rule::Uuid => ParsedValue::Text(self.uuid()?),
            Rule::StatusCode => ParsedValue::Number(self.status_code()? as u32),
            Rule::Qvalue => ParsedValue::Qvalue(self.qvalue()?),
            Rule::Port => ParsedValue::Number(self.port()? as u32),
            Rule::Host => ParsedValue::Text(self.host()?.0),
        };
        Ok(value)
    }

    /// Skips trailing whitespace and tells whether the input was consumed.
    pub(super) fn at_end(&mut self) -> bool {
        self.sws();
        self.s.is_eof()
    }

    /// Records that `what` was expected at the current offset.
    pub(super) fn expected(&mut self, what: &'static str) {
        let idx = self.s.idx();
        if idx > self.furthest {
            self.furthest = idx;
            self.expected.clear();
        }
        if idx == self.furthest && !self.expected.contains(&what) {
            self.expected.push(what);
        }
    }

    pub(super) fn failure(&self) -> ParseFailure {
        ParseFailure {
            offset: self.furthest,
            expected: self.expected.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn fail<T>(&mut self, what: &'static str) -> PResult<T> {
        self.expected(what);
        Err(Fail)
    }

    /// Runs `f`, rewinding the input if it does not match.
    fn attempt<T, F>(&mut self, f: F) -> PResult<T>
    where
        F: FnOnce(&mut Self) -> PResult<T>,
    {
        let pos = self.s.position();
        let result = f(self);
        if result.is_err() {
            self.s.rewind(pos);
        }
        result
    }

    fn opt<T, F>(&mut self, f: F) -> Option<T>
    where
        F: FnOnce(&mut Self) -> PResult<T>,
    {
        self.attempt(f).ok()
    }

    // ---------------------------------------------------------------------
    // Whitespace and separators
    // ---------------------------------------------------------------------

    /// `LWS = [*WSP CRLF] 1*WSP`
    fn lws(&mut self) -> bool {
        let lead = self.s.read_while(is_wsp);
        let after_lead = self.s.position();
        if self.s.eat(b'\r') && self.s.eat(b'\n') && !self.s.read_while(is_wsp).is_empty() {
            return true;
        }
        self.s.rewind(after_lead);
        !lead.is_empty()
    }

    /// `SWS = [LWS]`
    fn sws(&mut self) {
        self.lws();
    }

    /// `SWS b SWS`
    fn sep(&mut self, b: u8) -> bool {
        let pos = self.s.position();
        self.sws();
        if self.s.eat(b) {
            self.sws();
            true
        } else {
            self.s.rewind(pos);
            false
        }
    }

    pub(super) fn semi(&mut self) -> bool {
        self.sep(b';')
    }

    pub(super) fn comma(&mut self) -> bool {
        self.sep(b',')
    }

    fn equal(&mut self) -> bool {
        self.sep(b'=')
    }

    fn slash(&mut self) -> bool {
        self.sep(b'/')
    }

    fn colon(&mut self) -> bool {
        self.sep(b':')
    }

    /// `SWS "<"`
    fn laquot(&mut self) -> bool {
        let pos = self.s.position();
        self.sws();
        if self.s.eat(b'<') {
            true
        } else {
            self.s.rewind(pos);
            false
        }
    }

    /// `">" SWS`
    fn raquot(&mut self) -> bool {
        if self.s.eat(b'>') {
            self.sws();
            true
        } else {
            false
        }
    }

    /// Runs the separator `sep`, failing with `what` when it is missing.
    fn require(&mut self, sep: fn(&mut Self) -> bool, what: &'static str) -> PResult<()> {
        if sep(self) { Ok(()) } else { self.fail(what) }
    }

    fn byte(&mut self, b: u8, what: &'static str) -> PResult<()> {
        if self.s.eat(b) { Ok(()) } else { self.fail(what) }
    }

    // ---------------------------------------------------------------------
    // Basic rules
    // ---------------------------------------------------------------------

    fn token(&mut self) -> PResult<&'a str> {
        let token = self.s.read_str_while(|b| TOKEN_TAB[b as usize]);
        if token.is_empty() {
            return self.fail("token");
        }
        Ok(token)
    }

    fn token_lower(&mut self) -> PResult<String> {
        self.token().map(str::to_ascii_lowercase)
    }

    /// Returns the raw text, quotes included, and the unescaped content.
    fn quoted_string(&mut self) -> PResult<(&'a str, String)> {
        self.sws();
        let start = self.s.idx();
        if !self.s.eat(b'"') {
            return self.fail("quoted string");
        }
        let mut clean = Vec::new();
        loop {
            match self.s.peek() {
                Some(b'"') => {
                    self.s.next();
                    break;
                }
                Some(b'\\') => {
                    self.s.next();
                    match self.s.peek() {
                        Some(b) if b < 0x80 && b != b'\r' && b != b'\n' => {
                            self.s.next();
                            clean.push(b);
                        }
                        _ => return self.fail("quoted pair"),
                    }
                }
                Some(b'\r') => {
                    if !self.lws() {
                        return self.fail("closing quote");
                    }
                    clean.push(b' ');
                }
                Some(b) if is_wsp(b) || (0x21..=0x7e).contains(&b) || b >= 0x80 => {
                    self.s.next();
                    clean.push(b);
                }
                _ => return self.fail("closing quote"),
            }
        }
        let raw = self.s.since(start);
        Ok((raw, String::from_utf8_lossy(&clean).into_owned()))
    }

    /// `token / quoted-string`, raw.
    fn token_or_quoted(&mut self) -> PResult<&'a str> {
        match self.s.peek() {
            Some(b'"') => Ok(self.quoted_string()?.0),
            _ => self.token(),
        }
    }

    /// `token / quoted-string`, with the quotes removed.
    fn token_or_quoted_clean(&mut self) -> PResult<String> {
        match self.s.peek() {
            Some(b'"') => Ok(self.quoted_string()?.1),
            _ => Ok(self.token()?.to_owned()),
        }
    }

    fn number(&mut self) -> PResult<u32> {
        match self.s.read_num::<u32>() {
            Ok(n) => Ok(n),
            Err(_) => self.fail("number"),
        }
    }

    fn call_id(&mut self) -> PResult<&'a str> {
        let start = self.s.idx();
        if self.s.read_while(|b| WORD_TAB[b as usize]).is_empty() {
            return self.fail("Call-ID");
        }
        if self.s.eat(b'@') && self.s.read_while(|b| WORD_TAB[b as usize]).is_empty() {
            return self.fail("Call-ID host");
        }
        Ok(self.s.since(start))
    }

    fn token_list(&mut self) -> PResult<Vec<String>> {
        let mut tokens = Vec::new();
        comma_separated!(self => tokens.push(self.token_lower()?));
        Ok(tokens)
    }

    fn uuid(&mut self) -> PResult<String> {
        let start = self.s.idx();
        for (i, len) in [8, 4, 4, 4, 12].into_iter().enumerate() {
            if i > 0 && !self.s.eat(b'-') {
                return self.fail("\"-\"");
            }
            if self.s.read_while(|b| b.is_ascii_hexdigit()).len() != len {
                return self.fail("hex digit");
            }
        }
        Ok(self.s.since(start).to_owned())
    }

    fn status_code(&mut self) -> PResult<u16> {
        let pos = self.s.position();
        let digits = self.s.read_str_while(is_digit);
        match digits.parse::<u16>() {
            Ok(code) if digits.len() == 3 && (100..=699).contains(&code) => Ok(code),
            _ => {
                self.s.rewind(pos);
                self.fail("status code")
            }
        }
    }

    /// `qvalue = ("0" ["." 0*3DIGIT]) / ("1" ["." 0*3("0")])`
    fn qvalue(&mut self) -> PResult<f32> {
        let start = self.s.idx();
        let fraction: fn(u8) -> bool = match self.s.peek() {
            Some(b'0') => is_digit,
            Some(b'1') => |b| b == b'0',
            _ => return self.fail("qvalue"),
        };
        self.s.next();
        if self.s.eat(b'.') {
            for _ in 0..3 {
                if self.s.read_if(fraction).is_none() {
                    break;
                }
            }
        }
        match self.s.since(start).parse() {
            Ok(q) => Ok(q),
            Err(_) => self.fail("qvalue"),
        }
    }

    fn port(&mut self) -> PResult<u16> {
        let pos = self.s.position();
        let digits = self.s.read_str_while(is_digit);
        match digits.parse::<u16>() {
            Ok(port) if digits.len() <= 5 => Ok(port),
            _ => {
                self.s.rewind(pos);
                self.fail("port")
            }
        }
    }

    fn sip_version(&mut self) -> PResult<()> {
        if !self.s.eat_ignore_case("SIP/") {
            return self.fail("\"SIP/\"");
        }
        if self.s.read_while(is_digit).is_empty() || !self.s.eat(b'.') {
            return self.fail("SIP version");
        }
        if self.s.read_while(is_digit).is_empty() {
            return self.fail("SIP version");
        }
        Ok(())
    }

    /// Reads `name [= value]` generic parameters after `SEMI`.
    fn generic_params(&mut self) -> PResult<Params> {
        let mut params = Params::new();
        semi_separated!(self => {
            let (name, value) = self.generic_param()?;
            params.set(&name, value);
        });
        Ok(params)
    }

    fn generic_param(&mut self) -> PResult<(String, Option<&'a str>)> {
        let name = self.token_lower()?;
        if !self.equal() {
            return Ok((name, None));
        }
        let value = match self.s.peek() {
            Some(b'"') => self.quoted_string()?.0,
            Some(b'[') => {
                let start = self.s.idx();
                self.ipv6_reference()?;
                self.s.since(start)
            }
            _ => self.token()?,
        };
        Ok((name, Some(value)))
    }

    // ---------------------------------------------------------------------
    // Hosts and URIs
    // ---------------------------------------------------------------------

    fn host(&mut self) -> PResult<(String, HostType)> {
        if self.s.peek() == Some(b'[') {
            let start = self.s.idx();
            self.ipv6_reference()?;
            return Ok((self.s.since(start).to_ascii_lowercase(), HostType::IPv6));
        }
        let pos = self.s.position();
        let text = self.s.read_str_while(|b| HOST_TAB[b as usize]);
        if text.parse::<Ipv4Addr>().is_ok() {
            return Ok((text.to_owned(), HostType::IPv4));
        }
        if !is_hostname(text) {
            self.s.rewind(pos);
            return self.fail("host");
        }
        Ok((text.to_ascii_lowercase(), HostType::Domain))
    }

    fn ipv6_reference(&mut self) -> PResult<()> {
        let pos = self.s.position();
        if !self.s.eat(b'[') {
            return self.fail("\"[\"");
        }
        let addr = self.s.read_str_while(|b| b.is_ascii_hexdigit() || b == b':' || b == b'.');
        if addr.parse::<Ipv6Addr>().is_err() || !self.s.eat(b']') {
            self.s.rewind(pos);
            return self.fail("IPv6 reference");
        }
        Ok(())
    }

    fn sent_by(&mut self) -> PResult<(String, HostType, Option<u16>)> {
        let (host, host_type) = self.host()?;
        let port = if self.colon() { Some(self.port()?) } else { None };
        Ok((host, host_type, port))
    }

    /// `SIP-URI / SIPS-URI`. Without `with_params` the URI parameters and
    /// headers are left unread, as in the addr-spec form of name-addr headers.
    fn sip_uri(&mut self, with_params: bool) -> PResult<Uri> {
        let scheme = if self.s.eat_ignore_case("sips:") {
            "sips"
        } else if self.s.eat_ignore_case("sip:") {
            "sip"
        } else {
            return self.fail("\"sip:\" or \"sips:\"");
        };

        let userinfo = self.opt(|g| {
            let user = g.s.read_str_while(|b| USER_TAB[b as usize]);
            if user.is_empty() {
                return g.fail("user");
            }
            let password = if g.s.eat(b':') {
                Some(g.s.read_str_while(|b| PASS_TAB[b as usize]))
            } else {
                None
            };
            g.byte(b'@', "\"@\"")?;
            Ok((user, password))
        });

        let (host, _) = self.host()?;
        let port = if self.s.eat(b':') { Some(self.port()?) } else { None };

        let user = userinfo.map(|(user, _)| unescape(user));
        let Ok(mut uri) = Uri::new(scheme, user.as_deref(), &host, port) else {
            return self.fail("host");
        };
        if let Some((_, Some(password))) = userinfo {
            uri.set_password(Some(&unescape(password)));
        }
        if !with_params {
            return Ok(uri);
        }

        while self.s.eat(b';') {
            let name = self.s.read_str_while(|b| PARAM_TAB[b as usize]);
            if name.is_empty() {
                return self.fail("uri parameter");
            }
            let name = name.to_ascii_lowercase();
            if self.s.eat(b'=') {
                let value = self.s.read_str_while(|b| PARAM_TAB[b as usize]);
                if value.is_empty() {
                    return self.fail("uri parameter value");
                }
                if name == "transport" {
                    uri.set_param(&name, Some(&value.to_ascii_lowercase()));
                } else {
                    uri.set_param(&name, Some(value));
                }
            } else {
                uri.set_param(&name, None);
            }
        }

        if self.s.eat(b'?') {
            loop {
                let name = self.s.read_str_while(|b| HDR_TAB[b as usize]);
                if name.is_empty() {
                    return self.fail("uri header");
                }
                self.byte(b'=', "\"=\"")?;
                let value = self.s.read_str_while(|b| HDR_TAB[b as usize]);
                uri.add_header(name, value);
                if !self.s.eat(b'&') {
                    break;
                }
            }
        }

        Ok(uri)
    }

    /// `absoluteURI`, kept opaque behind its scheme.
    fn absolute_uri(&mut self) -> PResult<Uri> {
        let start = self.s.idx();
        if !self.s.peek().is_some_and(|b| b.is_ascii_alphabetic()) {
            return self.fail("URI scheme");
        }
        self.s
            .read_while(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.');
        let scheme = self.s.since(start);
        self.byte(b':', "\":\"")?;
        let opaque = self.s.read_str_while(|b| b > b' ' && b < 0x7f && b != b'>');
        match Uri::new(scheme, None, opaque, None) {
            Ok(uri) => Ok(uri),
            Err(_) => self.fail("URI"),
        }
    }

    fn request_uri(&mut self) -> PResult<Uri> {
        match self.attempt(|g| g.sip_uri(true)) {
            Ok(uri) => Ok(uri),
            Err(_) => self.absolute_uri(),
        }
    }

    // ---------------------------------------------------------------------
    // Name-addr headers
    // ---------------------------------------------------------------------

    /// `display-name = *(token LWS) / quoted-string`
    fn display_name(&mut self) -> PResult<String> {
        if self.s.peek() == Some(b'"') {
            return Ok(self.quoted_string()?.1);
        }
        let start = self.s.idx();
        self.token()?;
        while self
            .opt(|g| {
                g.require(Self::lws, "LWS")?;
                g.token()
            })
            .is_some()
        {}
        Ok(self.s.since(start).to_owned())
    }

    fn name_addr(&mut self) -> PResult<(Option<String>, Uri)> {
        self.attempt(|g| {
            let display_name = g.opt(Self::display_name);
            g.require(Self::laquot, "\"<\"")?;
            let uri = g.sip_uri(true)?;
            g.require(Self::raquot, "\">\"")?;
            Ok((display_name, uri))
        })
    }

    /// `(name-addr / addr-spec) *(SEMI generic-param)`
    fn name_addr_header(&mut self, allow_addr_spec: bool) -> PResult<NameAddrHeader> {
        let (display_name, uri) = match self.name_addr() {
            Ok(name_addr) => name_addr,
            Err(_) if allow_addr_spec => (None, self.sip_uri(false)?),
            Err(fail) => return Err(fail),
        };
        let params = self.generic_params()?;
        Ok(NameAddrHeader::new(uri, display_name.as_deref(), params))
    }

    fn spanned_name_addr(&mut self, allow_addr_spec: bool) -> PResult<Spanned<NameAddrHeader>> {
        let start = self.s.idx();
        let value = self.name_addr_header(allow_addr_spec)?;
        Ok(Spanned {
            value,
            span: start..self.s.idx(),
        })
    }

    fn contact(&mut self) -> PResult<ParsedValue> {
        let pos = self.s.position();
        if self.sep(b'*') {
            if self.s.is_eof() {
                return Ok(ParsedValue::Star);
            }
            self.s.rewind(pos);
        }

        let mut contacts = Vec::new();
        comma_separated!(self => {
            let contact = self.spanned_name_addr(true)?;
            self.check_contact_params(contact.value.params())?;
            contacts.push(contact);
        });
        Ok(ParsedValue::NameAddrList(contacts))
    }

    fn check_contact_params(&mut self, params: &Params) -> PResult<()> {
        if let Some(q) = params.value("q") {
            if !matches_rule(q, |g| g.qvalue()) {
                return self.fail("qvalue");
            }
        }
        if let Some(expires) = params.value("expires") {
            if !matches_rule(expires, |g| g.number()) {
                return self.fail("delta-seconds");
            }
        }
        Ok(())
    }

    fn route_list(&mut self) -> PResult<Vec<Spanned<NameAddrHeader>>> {
        let mut routes = Vec::new();
        comma_separated!(self => routes.push(self.spanned_name_addr(false)?));
        Ok(routes)
    }

    // ---------------------------------------------------------------------
    // Other headers
    // ---------------------------------------------------------------------

    fn start_line(&mut self) -> PResult<StartLine> {
        let status_line = self.attempt(|g| {
            g.sip_version()?;
            g.byte(b' ', "SP")?;
            let status_code = g.status_code()?;
            g.byte(b' ', "SP")?;
            let reason_phrase = g.s.read_str_while(|b| b != b'\r' && b != b'\n');
            Ok(StartLine::Response {
                status_code,
                reason_phrase: reason_phrase.to_owned(),
            })
        });
        if let Ok(status_line) = status_line {
            return Ok(status_line);
        }

        let method = SipMethod::from(self.token()?);
        self.byte(b' ', "SP")?;
        let uri = self.request_uri()?;
        self.byte(b' ', "SP")?;
        self.sip_version()?;
        Ok(StartLine::Request { method, uri })
    }

    fn via_list(&mut self) -> PResult<Vec<Spanned<Via>>> {
        let mut vias = Vec::new();
        comma_separated!(self => {
            let start = self.s.idx();
            let value = self.via_parm()?;
            vias.push(Spanned { value, span: start..self.s.idx() });
        });
        Ok(vias)
    }

    /// `sent-protocol LWS sent-by *(SEMI via-params)`
    fn via_parm(&mut self) -> PResult<Via> {
        let protocol = self.token()?.to_ascii_uppercase();
        self.require(Self::slash, "\"/\"")?;
        let version = self.token()?.to_owned();
        self.require(Self::slash, "\"/\"")?;
        let transport = self.token()?.to_ascii_uppercase();
        self.require(Self::lws, "LWS")?;
        let (host, host_type, port) = self.sent_by()?;

        let mut via = Via {
            protocol,
            version,
            transport,
            host,
            host_type,
            port,
            branch: None,
            received: None,
            rport: None,
            ttl: None,
            maddr: None,
            params: Params::new(),
        };

        semi_separated!(self => {
            let name = self.token_lower()?;
            let has_value = self.equal();
            match (name.as_str(), has_value) {
                ("branch", true) => via.branch = Some(self.token()?.to_owned()),
                ("received", true) => via.received = Some(self.host()?.0),
                ("maddr", true) => via.maddr = Some(self.host()?.0),
                ("ttl", true) => {
                    let pos = self.s.position();
                    match self.s.read_num::<u8>() {
                        Ok(ttl) => via.ttl = Some(ttl),
                        Err(_) => {
                            self.s.rewind(pos);
                            return self.fail("ttl");
                        }
                    }
                }
                ("rport", true) => via.rport = Some(Some(self.port()?)),
                ("rport", false) => via.rport = Some(None),
                (_, true) => {
                    let value = match self.s.peek() {
                        Some(b'"') => self.quoted_string()?.0,
                        Some(b'[') => {
                            let start = self.s.idx();
                            self.ipv6_reference()?;
                            self.s.since(start)
                        }
                        _ => self.token()?,
                    };
                    via.params.set(&name, Some(value));
                }
                (_, false) => via.params.set(&name, None),
            }
        });

        Ok(via)
    }

    /// `1*DIGIT LWS Method`
    fn cseq(&mut self) -> PResult<CSeq> {
        let value = self.number()?;
        if value >= 1 << 31 {
            return self.fail("CSeq number");
        }
        self.require(Self::lws, "LWS")?;
        let method = SipMethod::from(self.token()?);
        Ok(CSeq::new(value, method))
    }

    fn content_type(&mut self) -> PResult<ContentType> {
        let mtype = self.token_lower()?;
        self.require(Self::slash, "\"/\"")?;
        let subtype = self.token_lower()?;
        let mut params = Params::new();
        semi_separated!(self => {
            let name = self.token_lower()?;
            self.require(Self::equal, "\"=\"")?;
            params.set(&name, Some(self.token_or_quoted()?));
        });
        Ok(ContentType {
            mtype,
            subtype,
            params,
        })
    }

    fn challenge(&mut self) -> PResult<Challenge> {
        let scheme = self.token()?.to_owned();
        self.require(Self::lws, "LWS")?;

        let mut challenge = Challenge {
            scheme,
            ..Default::default()
        };
        let digest = challenge.is_digest();

        comma_separated!(self => {
            let name = self.token_lower()?;
            self.require(Self::equal, "\"=\"")?;
            match name.as_str() {
                _ if !digest => challenge.auth_params.set(&name, Some(self.token_or_quoted()?)),
                "realm" => challenge.realm = Some(self.quoted_string()?.1),
                "domain" => challenge.domain = Some(self.quoted_string()?.1),
                "nonce" => challenge.nonce = Some(self.quoted_string()?.1),
                "opaque" => challenge.opaque = Some(self.quoted_string()?.1),
                "stale" => {
                    let stale = self.token()?;
                    if stale.eq_ignore_ascii_case("true") {
                        challenge.stale = Some(true);
                    } else if stale.eq_ignore_ascii_case("false") {
                        challenge.stale = Some(false);
                    } else {
                        return self.fail("\"true\" or \"false\"");
                    }
                }
                "algorithm" => challenge.algorithm = Some(self.token()?.to_ascii_uppercase()),
                "qop" => {
                    let qop = self.token_or_quoted_clean()?;
                    challenge.qop = Some(
                        qop.split(',')
                            .map(|v| v.trim().to_ascii_lowercase())
                            .filter(|v| !v.is_empty())
                            .collect(),
                    );
                }
                _ => challenge.auth_params.set(&name, Some(self.token_or_quoted()?)),
            }
        });

        Ok(challenge)
    }

    fn session_expires(&mut self) -> PResult<SessionExpires> {
        let expires = self.number()?;
        let mut refresher = None;
        let mut params = Params::new();
        semi_separated!(self => {
            let (name, value) = self.generic_param()?;
            match (name.as_str(), value) {
                ("refresher", Some(value)) => {
                    let value = value.to_ascii_lowercase();
                    if value != "uac" && value != "uas" {
                        return self.fail("\"uac\" or \"uas\"");
                    }
                    refresher = Some(value);
                }
                _ => params.set(&name, value),
            }
        });
        Ok(SessionExpires {
            expires,
            refresher,
            params,
        })
    }

    fn replaces(&mut self) -> PResult<Replaces> {
        let call_id = self.call_id()?.to_owned();
        let mut replaces = Replaces {
            call_id,
            to_tag: None,
            from_tag: None,
            early_only: false,
            params: Params::new(),
        };
        semi_separated!(self => {
            let (name, value) = self.generic_param()?;
            match (name.as_str(), value) {
                ("to-tag", Some(tag)) => replaces.to_tag = Some(tag.to_owned()),
                ("from-tag", Some(tag)) => replaces.from_tag = Some(tag.to_owned()),
                ("early-only", None) => replaces.early_only = true,
                _ => replaces.params.set(&name, value),
            }
        });
        Ok(replaces)
    }

    fn reason(&mut self) -> PResult<Reason> {
        let protocol = self.token()?.to_owned();
        let mut reason = Reason {
            protocol,
            cause: None,
            text: None,
            params: Params::new(),
        };
        semi_separated!(self => {
            let name = self.token_lower()?;
            let has_value = self.equal();
            match (name.as_str(), has_value) {
                ("cause", true) => {
                    let pos = self.s.position();
                    match self.s.read_num::<u16>() {
                        Ok(cause) => reason.cause = Some(cause),
                        Err(_) => {
                            self.s.rewind(pos);
                            return self.fail("cause");
                        }
                    }
                }
                ("text", true) => reason.text = Some(self.quoted_string()?.1),
                (_, true) => {
                    let value = self.token_or_quoted()?;
                    reason.params.set(&name, Some(value));
                }
                (_, false) => reason.params.set(&name, None),
            }
        });
        Ok(reason)
    }

    fn subscription_state(&mut self) -> PResult<SubscriptionState> {
        let state = self.token_lower()?;
        let mut subscription_state = SubscriptionState {
            state,
            reason: None,
            expires: None,
            retry_after: None,
            params: Params::new(),
        };
        semi_separated!(self => {
            let name = self.token_lower()?;
            let has_value = self.equal();
            match (name.as_str(), has_value) {
                ("reason", true) => subscription_state.reason = Some(self.token_lower()?),
                ("expires", true) => subscription_state.expires = Some(self.number()?),
                ("retry-after", true) => subscription_state.retry_after = Some(self.number()?),
                (_, true) => {
                    let value = self.token_or_quoted()?;
                    subscription_state.params.set(&name, Some(value));
                }
                (_, false) => subscription_state.params.set(&name, None),
            }
        });
        Ok(subscription_state)
    }

    fn event(&mut self) -> PResult<Event> {
        let event = self.token_lower()?;
        let params = self.generic_params()?;
        Ok(Event { event, params })
    }
}

/// Tells whether the whole of `input` matches `rule`.
fn matches_rule<T>(input: &str, rule: impl FnOnce(&mut Grammar<'_>) -> PResult<T>) -> bool {
    let mut grammar = Grammar::new(input);
    rule(&mut grammar).is_ok() && grammar.s.is_eof()
}

/// `hostname = *( domainlabel "." ) toplabel [ "." ]`
fn is_hostname(text: &str) -> bool {
    let text = text.strip_suffix('.').unwrap_or(text);
    if text.is_empty() {
        return false;
    }
    let valid_label = |label: &str| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    };
    text.split('.').all(valid_label)
        && text
            .rsplit('.')
            .next()
            .is_some_and(|top| top.starts_with(|c: char| c.is_ascii_alphabetic()))
}
