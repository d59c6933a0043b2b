use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::grammar::{self, Rule};
use crate::headers::headerize;
use crate::message::Params;

/// A SIP URI.
///
/// Scheme and host are stored lowercase, the user and password are stored
/// decoded and escaped again on serialization.
#[derive(Debug, Clone)]
pub struct Uri {
    scheme: String,
    user: Option<String>,
    password: Option<String>,
    host: String,
    port: Option<u16>,
    params: Params,
    headers: Vec<(String, Vec<String>)>,
}

impl Uri {
    /// Creates a new URI. The scheme defaults to `sip` when empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `host` is empty.
    pub fn new(scheme: &str, user: Option<&str>, host: &str, port: Option<u16>) -> Result<Self> {
        if host.is_empty() {
            return Err(Error::InvalidArgument("missing or invalid \"host\" parameter".into()));
        }
        let scheme = if scheme.is_empty() { "sip" } else { scheme };

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            user: user.map(str::to_owned),
            password: None,
            host: host.to_ascii_lowercase(),
            port,
            params: Params::new(),
            headers: Vec::new(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn set_scheme(&mut self, scheme: &str) {
        self.scheme = scheme.to_ascii_lowercase();
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn set_user(&mut self, user: Option<&str>) {
        self.user = user.map(str::to_owned);
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn set_password(&mut self, password: Option<&str>) {
        self.password = password.map(str::to_owned);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Replaces the host.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `host` is empty.
    pub fn set_host(&mut self, host: &str) -> Result<()> {
        if host.is_empty() {
            return Err(Error::InvalidArgument("missing or invalid \"host\" parameter".into()));
        }
        self.host = host.to_ascii_lowercase();
        Ok(())
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn set_port(&mut self, port: Option<u16>) {
        self.port = port;
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Returns the parameter `name`, see [`Params::get`].
    pub fn param(&self, name: &str) -> Option<Option<&str>> {
        self.params.get(name)
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains(name)
    }

    pub fn set_param(&mut self, name: &str, value: Option<&str>) {
        self.params.set(name, value);
    }

    pub fn delete_param(&mut self, name: &str) -> Option<Option<String>> {
        self.params.remove(name)
    }

    pub fn clear_params(&mut self) {
        self.params.clear();
    }

    /// Returns the values of the URI header `name`.
    pub fn header(&self, name: &str) -> Option<&[String]> {
        let name = headerize(name);
        self.headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// Sets the URI header `name`, replacing any previous values.
    pub fn set_header(&mut self, name: &str, values: Vec<String>) {
        let name = headerize(name);
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, old)) => *old = values,
            None => self.headers.push((name, values)),
        }
    }

    /// Appends one value to the URI header `name`.
    pub fn add_header(&mut self, name: &str, value: &str) {
        let name = headerize(name);
        match self.headers.iter_mut().find(|(n, _)| *n == name) {
            Some((_, values)) => values.push(value.to_owned()),
            None => self.headers.push((name, vec![value.to_owned()])),
        }
    }

    pub fn delete_header(&mut self, name: &str) -> Option<Vec<String>> {
        let name = headerize(name);
        let pos = self.headers.iter().position(|(n, _)| *n == name)?;
        Some(self.headers.remove(pos).1)
    }

    pub fn clear_headers(&mut self) {
        self.headers.clear();
    }

    /// Returns the address-of-record form `scheme:user@host[:port]`.
    pub fn to_aor(&self, show_port: bool) -> String {
        let mut aor = format!("{}:", self.scheme);
        if let Some(user) = &self.user {
            aor.push_str(&escape_user(user));
            aor.push('@');
        }
        aor.push_str(&self.host);
        if let (true, Some(port)) = (show_port, self.port) {
            aor.push_str(&format!(":{}", port));
        }
        aor
    }
}

impl PartialEq for Uri {
    fn eq(&self, other: &Self) -> bool {
        self.scheme == other.scheme
            && self.user == other.user
            && self.password == other.password
            && self.host == other.host
            && self.port == other.port
            && self.params == other.params
            && self.headers.len() == other.headers.len()
            && self
                .headers
                .iter()
                .all(|(name, values)| other.header(name) == Some(values.as_slice()))
    }
}

impl Eq for Uri {}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(user) = &self.user {
            write!(f, "{}", escape_user(user))?;
            if let Some(password) = &self.password {
                write!(f, ":{}", escape(password, is_password_unescaped))?;
            }
            f.write_str("@")?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        write!(f, "{}", self.params)?;

        let mut sep = '?';
        for (name, values) in &self.headers {
            for value in values {
                write!(f, "{}{}={}", sep, name, value)?;
                sep = '&';
            }
        }
        Ok(())
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        grammar::parse(s, Rule::SipUri)?
            .into_uri()
            .map_err(|_| Error::InvalidArgument(format!("not a SIP URI: {}", s)))
    }
}

#[inline(always)]
fn is_user_unescaped(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-_.!~*'()&=+$,;?/".contains(&b)
}

#[inline(always)]
fn is_password_unescaped(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"-_.!~*'()&=+$,".contains(&b)
}

/// Percent-encodes the characters not allowed unescaped in a URI user part.
pub(crate) fn escape_user(user: &str) -> String {
    escape(user, is_user_unescaped)
}

fn escape(s: &str, unescaped: fn(u8) -> bool) -> String {
    let mut escaped = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if unescaped(b) {
            escaped.push(b as char);
        } else {
            escaped.push_str(&format!("%{:02X}", b));
        }
    }
    escaped
}

/// Decodes `%XX` sequences. Malformed sequences are kept verbatim.
pub(crate) fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2]));
            if let (Some(hi), Some(lo)) = hex {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_host() {
        assert!(Uri::new("sip", Some("alice"), "", None).is_err());

        let uri = Uri::new("", Some("alice"), "Example.COM", Some(5060)).unwrap();
        assert_eq!(uri.to_string(), "sip:alice@example.com:5060");
    }

    #[test]
    fn test_display_with_params_and_headers() {
        let mut uri = Uri::new("sip", Some("bob"), "biloxi.com", None).unwrap();
        uri.set_param("transport", Some("ws"));
        uri.set_param("lr", None);
        uri.add_header("subject", "hi");
        uri.add_header("Subject", "there");

        assert_eq!(uri.to_string(), "sip:bob@biloxi.com;transport=ws;lr?Subject=hi&Subject=there");
    }

    #[test]
    fn test_user_escaping() {
        let uri = Uri::new("sip", Some("al ice#1"), "example.com", None).unwrap();
        assert_eq!(uri.to_string(), "sip:al%20ice%231@example.com");
        assert_eq!(unescape("al%20ice%231"), "al ice#1");
        assert_eq!(unescape("100%"), "100%");
    }

    #[test]
    fn test_password_escaping() {
        let mut uri = Uri::new("sip", Some("alice"), "atlanta.com", None).unwrap();
        uri.set_password(Some("p@s;s:w rd&=+$,"));

        assert_eq!(uri.to_string(), "sip:alice:p%40s%3Bs%3Aw%20rd&=+$,@atlanta.com");
    }

    #[test]
    fn test_to_aor() {
        let uri = Uri::new("sip", Some("alice"), "atlanta.com", Some(5070)).unwrap();
        assert_eq!(uri.to_aor(false), "sip:alice@atlanta.com");
        assert_eq!(uri.to_aor(true), "sip:alice@atlanta.com:5070");
    }

    #[test]
    fn test_equality_ignores_param_order() {
        let mut a = Uri::new("sip", None, "a.com", None).unwrap();
        a.set_param("x", Some("1"));
        a.set_param("lr", None);
        let mut b = Uri::new("sip", None, "a.com", None).unwrap();
        b.set_param("lr", None);
        b.set_param("x", Some("1"));

        assert_eq!(a, b);
        assert_eq!(a.clone(), a);
    }
}
