use std::fmt;

use crate::config::Configuration;
use crate::headers::headerize;
use crate::message::{ALLOWED_METHODS, MAX_FORWARDS, NameAddrHeader, Params, SipMethod, Uri};
use crate::{new_tag, random_token};

/// Optional values for building an [`OutgoingRequest`].
///
/// Everything left unset is derived from the configuration: From is the
/// local user with a new tag, To is the request URI, the Call-ID and CSeq
/// are random.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    /// Route header values, in the order they are sent.
    pub route_set: Vec<String>,
    pub call_id: Option<String>,
    pub cseq: Option<u32>,
    pub from_uri: Option<Uri>,
    pub from_display_name: Option<String>,
    pub from_tag: Option<String>,
    pub to_uri: Option<Uri>,
    pub to_display_name: Option<String>,
    pub to_tag: Option<String>,
}

/// A request originated by this user agent.
///
/// Headers are kept as raw values in insertion order. Extra headers are
/// complete header lines passed through verbatim; setting a header removes
/// the extra header lines with the same name.
///
/// # Examples
///
/// ```
/// # use sipcore::config::Configuration;
/// # use sipcore::message::{OutgoingRequest, RequestParams, SipMethod};
/// let config = Configuration::builder().with_uri("sip:alice@atlanta.com").build().unwrap();
/// let ruri = "sip:bob@biloxi.com".parse().unwrap();
/// let request = OutgoingRequest::new(
///     SipMethod::Options,
///     ruri,
///     &config,
///     RequestParams { cseq: Some(1), ..Default::default() },
///     vec!["X-Foo: bar".into()],
///     None,
/// );
///
/// assert_eq!(request.header("CSeq"), Some("1 OPTIONS"));
/// assert_eq!(request.header("x-foo"), Some("bar"));
/// assert!(request.to_string().starts_with("OPTIONS sip:bob@biloxi.com SIP/2.0\r\n"));
/// ```
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    method: SipMethod,
    ruri: Uri,
    headers: Vec<(String, Vec<String>)>,
    extra_headers: Vec<String>,
    body: Option<String>,
    from: NameAddrHeader,
    to: NameAddrHeader,
    call_id: String,
    cseq: u32,
    session_timers: bool,
    user_agent: String,
}

impl OutgoingRequest {
    pub fn new(
        method: SipMethod,
        ruri: Uri,
        config: &Configuration,
        params: RequestParams,
        extra_headers: Vec<String>,
        body: Option<String>,
    ) -> Self {
        let to_uri = params.to_uri.unwrap_or_else(|| ruri.clone());
        let mut to_params = Params::new();
        if let Some(tag) = &params.to_tag {
            to_params.set("tag", Some(tag));
        }
        let to = NameAddrHeader::new(to_uri, params.to_display_name.as_deref(), to_params);

        let from_uri = params.from_uri.unwrap_or_else(|| config.uri().clone());
        let from_tag = params.from_tag.unwrap_or_else(new_tag);
        let from_display_name = params
            .from_display_name
            .as_deref()
            .or(config.display_name());
        let from = NameAddrHeader::new(
            from_uri,
            from_display_name,
            Params::from([("tag", Some(from_tag.as_str()))]),
        );

        let call_id = params
            .call_id
            .unwrap_or_else(|| format!("{}{}", config.call_id_prefix(), random_token(15)));
        let cseq = params.cseq.unwrap_or_else(|| rand::random_range(0..10_000));

        let mut request = Self {
            method,
            ruri,
            headers: Vec::new(),
            extra_headers,
            body,
            from,
            to,
            call_id,
            cseq,
            session_timers: config.session_timers(),
            user_agent: config.user_agent().to_owned(),
        };

        if !params.route_set.is_empty() {
            request.set_header_values("Route", params.route_set);
        }
        // Placeholder keeping Via ahead of the other headers, filled in by
        // the client transaction.
        request.set_header_values("Via", Vec::new());
        request.set_header("Max-Forwards", MAX_FORWARDS.to_string());
        request.set_header("To", request.to.to_string());
        request.set_header("From", request.from.to_string());
        request.set_header("Call-ID", request.call_id.clone());
        request.set_header("CSeq", format!("{} {}", request.cseq, request.method));

        request
    }

    /// Builds the ACK or CANCEL belonging to this request's INVITE
    /// transaction, sharing its Via, Route, From, Call-ID and CSeq number.
    pub(crate) fn in_transaction(&self, method: SipMethod, to: &str) -> Self {
        let mut request = Self {
            method,
            ruri: self.ruri.clone(),
            headers: Vec::new(),
            extra_headers: Vec::new(),
            body: None,
            from: self.from.clone(),
            to: self.to.clone(),
            call_id: self.call_id.clone(),
            cseq: self.cseq,
            session_timers: self.session_timers,
            user_agent: self.user_agent.clone(),
        };

        let route = self.header_values("Route").into_iter().map(str::to_owned).collect();
        request.set_header_values("Route", route);
        let via = self.header_values("Via").into_iter().map(str::to_owned).collect();
        request.set_header_values("Via", via);
        request.set_header("Max-Forwards", MAX_FORWARDS.to_string());
        request.set_header("To", to);
        request.set_header("From", self.from.to_string());
        request.set_header("Call-ID", self.call_id.clone());
        request.set_header("CSeq", format!("{} {}", self.cseq, request.method));

        request
    }

    pub fn method(&self) -> &SipMethod {
        &self.method
    }

    /// The Request-URI.
    pub fn ruri(&self) -> &Uri {
        &self.ruri
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn extra_headers(&self) -> &[String] {
        &self.extra_headers
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

    pub fn to_tag(&self) -> Option<&str> {
        self.to.tag()
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    /// Sets the sequence number, updating the CSeq header.
    pub fn set_cseq(&mut self, cseq: u32) {
        self.cseq = cseq;
        self.set_header("CSeq", format!("{} {}", cseq, self.method));
    }

    /// Sets `name` to a single value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.set_header_values(name, vec![value.into()]);
    }

    /// Sets every value of `name`, keeping the position of a header that is
    /// already present.
    pub fn set_header_values(&mut self, name: &str, values: Vec<String>) {
        let name = headerize(name);
        self.extra_headers
            .retain(|line| extra_header_name(line).is_none_or(|n| n != name));

        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, old)) => *old = values,
            None => self.headers.push((name, values)),
        }
    }

    /// Returns the first value of `name`, looking in the extra headers when
    /// the header was not set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_values(name).into_iter().next()
    }

    /// Returns every value of `name`.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        let name = headerize(name);
        if let Some((_, values)) = self.headers.iter().find(|(n, _)| *n == name) {
            return values.iter().map(String::as_str).collect();
        }
        self.extra_headers
            .iter()
            .filter(|line| extra_header_name(line).is_some_and(|n| n == name))
            .filter_map(|line| line.split_once(':').map(|(_, value)| value.trim()))
            .collect()
    }

    pub fn has_header(&self, name: &str) -> bool {
        !self.header_values(name).is_empty()
    }

    /// Adds a Route to `route` unless the request already has one.
    pub(crate) fn preload_route(&mut self, route: String) {
        if !self.has_header("Route") {
            self.headers.insert(0, ("Route".into(), vec![route]));
        }
    }

    fn supported(&self) -> Vec<&'static str> {
        let mut supported = Vec::new();
        match self.method {
            SipMethod::Register => supported.extend(["path", "gruu"]),
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
                supported.push("ice");
            }
            _ => (),
        }
        supported.push("outbound");
        supported
    }
}

fn extra_header_name(line: &str) -> Option<String> {
    line.split_once(':').map(|(name, _)| headerize(name.trim()))
}

impl fmt::Display for OutgoingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0\r\n", self.method, self.ruri)?;

        for (name, values) in &self.headers {
            for value in values {
                write!(f, "{}: {}\r\n", name, value)?;
            }
        }
        for line in &self.extra_headers {
            write!(f, "{}\r\n", line.trim())?;
        }

        write!(f, "Allow: {}\r\n", ALLOWED_METHODS)?;
        write!(f, "Supported: {}\r\n", self.supported().join(","))?;
        write!(f, "User-Agent: {}\r\n", self.user_agent)?;

        match &self.body {
            Some(body) => write!(f, "Content-Length: {}\r\n\r\n{}", body.len(), body),
            None => f.write_str("Content-Length: 0\r\n\r\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils;

    fn request(method: SipMethod, params: RequestParams) -> OutgoingRequest {
        request_with(&test_utils::config(), method, params)
    }

    fn request_with(config: &Configuration, method: SipMethod, params: RequestParams) -> OutgoingRequest {
        OutgoingRequest::new(
            method,
            "sip:bob@biloxi.com".parse().unwrap(),
            config,
            params,
            Vec::new(),
            None,
        )
    }

    #[test]
    fn test_defaults_from_configuration() {
        let config = test_utils::config();
        let request = request_with(&config, SipMethod::Options, RequestParams::default());

        assert_eq!(request.header("Max-Forwards"), Some("69"));
        assert_eq!(request.header("To"), Some("<sip:bob@biloxi.com>"));
        assert_eq!(request.from().uri(), config.uri());
        assert_eq!(request.from_tag().map(str::len), Some(10));
        assert!(request.call_id().starts_with(config.call_id_prefix()));
        assert_eq!(request.call_id().len(), 20);
        assert!(request.cseq() < 10_000);
        assert_eq!(request.header("Via"), None);
    }

    #[test]
    fn test_serialization() {
        let params = RequestParams {
            route_set: vec!["<sip:p1.example.com;lr>".into(), "<sip:p2.example.com;lr>".into()],
            call_id: Some("a84b4c76e66710".into()),
            cseq: Some(314159),
            from_tag: Some("9fxced76sl".into()),
            to_tag: Some("8321234356".into()),
            ..Default::default()
        };
        let mut request = request(SipMethod::Invite, params);
        request.set_header("Via", "SIP/2.0/WS abc.invalid;branch=z9hG4bK776");
        request.body = Some("v=0 é".into());

        assert_eq!(
            request.to_string(),
            "INVITE sip:bob@biloxi.com SIP/2.0\r\n\
             Route: <sip:p1.example.com;lr>\r\n\
             Route: <sip:p2.example.com;lr>\r\n\
             Via: SIP/2.0/WS abc.invalid;branch=z9hG4bK776\r\n\
             Max-Forwards: 69\r\n\
             To: <sip:bob@biloxi.com>;tag=8321234356\r\n\
             From: \"Alice\" <sip:alice@atlanta.com>;tag=9fxced76sl\r\n\
             Call-ID: a84b4c76e66710\r\n\
             CSeq: 314159 INVITE\r\n\
             Allow: INVITE,ACK,CANCEL,BYE,UPDATE,MESSAGE,OPTIONS,REFER,INFO,NOTIFY\r\n\
             Supported: timer,ice,replaces,outbound\r\n\
             User-Agent: sipcore-test\r\n\
             Content-Length: 6\r\n\r\nv=0 é"
        );
    }

    #[test]
    fn test_supported_per_method() {
        let register = request(SipMethod::Register, RequestParams::default());
        let update = request(SipMethod::Update, RequestParams::default());
        let bye = request(SipMethod::Bye, RequestParams::default());

        assert!(register.to_string().contains("Supported: path,gruu,outbound\r\n"));
        assert!(update.to_string().contains("Supported: timer,ice,outbound\r\n"));
        assert!(bye.to_string().contains("Supported: outbound\r\n"));
    }

    #[test]
    fn test_set_header_removes_extra_header() {
        let config = test_utils::config();
        let mut request = OutgoingRequest::new(
            SipMethod::Message,
            "sip:bob@biloxi.com".parse().unwrap(),
            &config,
            RequestParams::default(),
            vec!["Contact: <sip:x@y>".into(), "X-Other: 1".into()],
            Some("hello".into()),
        );
        assert_eq!(request.header("contact"), Some("<sip:x@y>"));

        request.set_header("m", "<sip:alice@a.invalid>");

        assert_eq!(request.extra_headers(), ["X-Other: 1"]);
        assert_eq!(request.header_values("Contact"), ["<sip:alice@a.invalid>"]);
        assert!(request.to_string().ends_with("Content-Length: 5\r\n\r\nhello"));
    }

    #[test]
    fn test_set_cseq_updates_header() {
        let mut request = request(SipMethod::Register, RequestParams::default());
        request.set_cseq(7);

        assert_eq!(request.cseq(), 7);
        assert_eq!(request.header("CSeq"), Some("7 REGISTER"));
    }

    #[test]
    fn test_in_transaction_cancel() {
        let mut invite = request(
            SipMethod::Invite,
            RequestParams {
                route_set: vec!["<sip:proxy.example.com;lr>".into()],
                cseq: Some(5),
                ..Default::default()
            },
        );
        invite.set_header("Via", "SIP/2.0/WS abc.invalid;branch=z9hG4bK1");

        let cancel = invite.in_transaction(SipMethod::Cancel, invite.header("To").unwrap());

        assert_eq!(cancel.header("CSeq"), Some("5 CANCEL"));
        assert_eq!(cancel.header("Via"), invite.header("Via"));
        assert_eq!(cancel.header("Route"), Some("<sip:proxy.example.com;lr>"));
        assert_eq!(cancel.header("From"), invite.header("From"));
        assert_eq!(cancel.call_id(), invite.call_id());
        assert!(cancel.to_string().ends_with("Content-Length: 0\r\n\r\n"));
    }

    #[test]
    fn test_preload_route() {
        let mut request = request(SipMethod::Register, RequestParams::default());
        request.preload_route("<sip:edge.example.com;transport=ws;lr>".into());

        assert!(
            request
                .to_string()
                .starts_with("REGISTER sip:bob@biloxi.com SIP/2.0\r\nRoute: <sip:edge.example.com;transport=ws;lr>\r\n")
        );
    }
}
