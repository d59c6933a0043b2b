use std::fmt;

use crate::message::Params;

/// The kind of host found in a `sent-by` or URI host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostType {
    /// A domain name.
    Domain,
    /// An IPv4 address.
    IPv4,
    /// A bracketed IPv6 reference.
    IPv6,
}

/// The `Via` SIP header.
///
/// Indicates the path taken by the request so far and the
/// path that should be followed in routing responses.
///
/// # Examples
/// ```
/// # use sipcore::headers::Via;
/// let via = Via::new("WS", "df7jal23ls0d.invalid", Some("z9hG4bK5402"));
///
/// assert_eq!("SIP/2.0/WS df7jal23ls0d.invalid;branch=z9hG4bK5402", via.to_string());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Via {
    /// Protocol name, normally `SIP`.
    pub protocol: String,
    /// Protocol version, normally `2.0`.
    pub version: String,
    /// Uppercase transport token (`UDP`, `TCP`, `WS`...).
    pub transport: String,
    /// The `sent-by` host.
    pub host: String,
    /// Kind of [`Via::host`].
    pub host_type: HostType,
    /// The `sent-by` port.
    pub port: Option<u16>,
    /// The `branch` parameter.
    pub branch: Option<String>,
    /// The `received` parameter.
    pub received: Option<String>,
    /// The `rport` parameter, `Some(None)` when present without a value.
    pub rport: Option<Option<u16>>,
    /// The `ttl` parameter.
    pub ttl: Option<u8>,
    /// The `maddr` parameter.
    pub maddr: Option<String>,
    /// Any other parameter.
    pub params: Params,
}

impl Via {
    /// Creates a `SIP/2.0` Via with a transport, host and optional branch.
    pub fn new(transport: &str, host: &str, branch: Option<&str>) -> Self {
        Self {
            protocol: "SIP".into(),
            version: "2.0".into(),
            transport: transport.to_ascii_uppercase(),
            host: host.to_ascii_lowercase(),
            host_type: HostType::Domain,
            port: None,
            branch: branch.map(str::to_owned),
            received: None,
            rport: None,
            ttl: None,
            maddr: None,
            params: Params::new(),
        }
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{} {}", self.protocol, self.version, self.transport, self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        if let Some(branch) = &self.branch {
            write!(f, ";branch={}", branch)?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={}", received)?;
        }
        match self.rport {
            Some(Some(port)) => write!(f, ";rport={}", port)?,
            Some(None) => f.write_str(";rport")?,
            None => (),
        }
        if let Some(ttl) = self.ttl {
            write!(f, ";ttl={}", ttl)?;
        }
        if let Some(maddr) = &self.maddr {
            write!(f, ";maddr={}", maddr)?;
        }
        write!(f, "{}", self.params)
    }
}
