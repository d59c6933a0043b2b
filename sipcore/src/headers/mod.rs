//! SIP Headers types
//!
//! The module provide the [`Headers`] struct, the raw header list of an
//! incoming message, together with the typed values of the headers the
//! grammar knows about.

mod auth;
mod content_type;
mod cseq;
mod event;
mod reason;
mod replaces;
mod session_expires;
mod subscription_state;
mod via;

pub use auth::Challenge;
pub use content_type::ContentType;
pub use cseq::CSeq;
pub use event::Event;
pub use reason::Reason;
pub use replaces::Replaces;
pub use session_expires::SessionExpires;
pub use subscription_state::SubscriptionState;
pub use via::{HostType, Via};

use itertools::Itertools;

use crate::grammar::{self, ParseFailure, ParsedValue, Rule, Spanned};

/// Expands a compact header name to its full form.
fn compact_form(name: &str) -> Option<&'static str> {
    let full = match name.to_ascii_lowercase().as_str() {
        "v" => "Via",
        "f" => "From",
        "t" => "To",
        "i" => "Call-ID",
        "m" => "Contact",
        "l" => "Content-Length",
        "c" => "Content-Type",
        "r" => "Refer-To",
        "o" => "Event",
        "x" => "Session-Expires",
        "k" => "Supported",
        "s" => "Subject",
        "e" => "Content-Encoding",
        "u" => "Allow-Events",
        _ => return None,
    };
    Some(full)
}

/// Returns the canonical capitalization of a header name.
///
/// # Examples
///
/// ```
/// # use sipcore::headers::headerize;
/// assert_eq!(headerize("record-route"), "Record-Route");
/// assert_eq!(headerize("CALL-ID"), "Call-ID");
/// assert_eq!(headerize("m"), "Contact");
/// ```
pub fn headerize(name: &str) -> String {
    if let Some(full) = compact_form(name) {
        return full.to_owned();
    }
    let capitalized = name
        .trim()
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .join("-");

    match capitalized.as_str() {
        "Call-Id" => "Call-ID".into(),
        "Cseq" => "CSeq".into(),
        "Www-Authenticate" => "WWW-Authenticate".into(),
        _ => capitalized,
    }
}

/// One header value of an incoming message.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    name: String,
    raw: String,
    parsed: Option<ParsedValue>,
}

impl Header {
    /// The canonical header name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The value as it appeared on the wire.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The typed value, for headers with a grammar rule.
    pub fn parsed(&self) -> Option<&ParsedValue> {
        self.parsed.as_ref()
    }
}

/// The headers of an incoming message, in wire order.
///
/// Values of headers with a grammar rule are parsed when added. Headers whose
/// grammar allows several comma separated values (Via, Contact, Route and
/// Record-Route) are stored one entry per value.
///
/// # Examples
///
/// ```
/// # use sipcore::headers::Headers;
/// let mut headers = Headers::new();
/// headers.add("m", "<sip:alice@a.invalid>, <sip:alice@b.invalid>").unwrap();
///
/// assert_eq!(headers.count("Contact"), 2);
/// assert_eq!(headers.get("contact"), Some("<sip:alice@a.invalid>"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers(Vec<Header>);

impl Headers {
    /// Create a new empty collection of headers.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Returns the number of header values in the collection.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Appends the raw value `raw` under `name`.
    ///
    /// # Errors
    ///
    /// Returns the grammar failure when the header has a rule and `raw` does
    /// not match it. Nothing is added in that case.
    pub fn add(&mut self, name: &str, raw: &str) -> Result<(), ParseFailure> {
        let name = headerize(name);
        let raw = raw.trim();

        let Some(rule) = Rule::for_header(&name) else {
            self.0.push(Header {
                name,
                raw: raw.to_owned(),
                parsed: None,
            });
            return Ok(());
        };

        match grammar::parse(raw, rule)? {
            ParsedValue::NameAddrList(list) => {
                self.extend_spanned(&name, raw, list, ParsedValue::NameAddr)
            }
            ParsedValue::ViaList(list) => self.extend_spanned(&name, raw, list, ParsedValue::Via),
            parsed => self.0.push(Header {
                name,
                raw: raw.to_owned(),
                parsed: Some(parsed),
            }),
        }
        Ok(())
    }

    fn extend_spanned<T>(
        &mut self,
        name: &str,
        raw: &str,
        list: Vec<Spanned<T>>,
        wrap: fn(T) -> ParsedValue,
    ) {
        for Spanned { value, span } in list {
            self.0.push(Header {
                name: name.to_owned(),
                raw: raw.get(span).unwrap_or_default().trim().to_owned(),
                parsed: Some(wrap(value)),
            });
        }
    }

    /// Replaces every value of `name` with `raw`.
    ///
    /// # Errors
    ///
    /// See [`Headers::add`]. The previous values are kept on error.
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), ParseFailure> {
        let mut values = Headers::new();
        values.add(name, raw)?;
        self.remove(name);
        self.0.extend(values.0);
        Ok(())
    }

    /// Removes every value of `name`.
    pub fn remove(&mut self, name: &str) {
        let name = headerize(name);
        self.0.retain(|h| h.name != name);
    }

    /// Returns the raw value of the first `name` header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).next().map(Header::raw)
    }

    /// Returns every value of `name`, in wire order.
    pub fn get_all(&self, name: &str) -> impl Iterator<Item = &Header> {
        let name = headerize(name);
        self.0.iter().filter(move |h| h.name == name)
    }

    /// Returns the typed value of the first `name` header.
    pub fn parsed(&self, name: &str) -> Option<&ParsedValue> {
        self.parsed_at(name, 0)
    }

    /// Returns the typed value of the `idx`-th `name` header.
    pub fn parsed_at(&self, name: &str, idx: usize) -> Option<&ParsedValue> {
        self.get_all(name).nth(idx).and_then(Header::parsed)
    }

    /// Returns how many values of `name` the collection holds.
    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_all(name).next().is_some()
    }

    /// Returns an iterator over all header values.
    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }
}
