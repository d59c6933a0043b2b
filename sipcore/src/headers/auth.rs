//! SIP Auth types
//!
use std::fmt;

use crate::message::Params;

/// A `WWW-Authenticate` or `Proxy-Authenticate` challenge.
///
/// For schemes other than `Digest` only [`Challenge::scheme`] and
/// [`Challenge::auth_params`] are filled.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct Challenge {
    /// The authentication scheme, e.g. `Digest`.
    pub scheme: String,

    /// The realm of the digest authentication.
    pub realm: Option<String>,

    /// The domain of the digest authentication.
    pub domain: Option<String>,

    /// The nonce of the digest authentication.
    pub nonce: Option<String>,

    /// The opaque value of the digest authentication.
    pub opaque: Option<String>,

    /// Indicates whether the previous request was stale.
    pub stale: Option<bool>,

    /// The algorithm, uppercase.
    pub algorithm: Option<String>,

    /// The offered quality of protection values, lowercase.
    pub qop: Option<Vec<String>>,

    /// Any other parameter.
    pub auth_params: Params,
}

impl Challenge {
    /// Returns `true` if this challenge uses the `Digest` scheme.
    pub fn is_digest(&self) -> bool {
        self.scheme.eq_ignore_ascii_case("digest")
    }
}

impl fmt::Display for Challenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields = Vec::new();
        if let Some(realm) = &self.realm {
            fields.push(format!("realm=\"{realm}\""));
        }
        if let Some(domain) = &self.domain {
            fields.push(format!("domain=\"{domain}\""));
        }
        if let Some(nonce) = &self.nonce {
            fields.push(format!("nonce=\"{nonce}\""));
        }
        if let Some(opaque) = &self.opaque {
            fields.push(format!("opaque=\"{opaque}\""));
        }
        if let Some(stale) = self.stale {
            fields.push(format!("stale={}", if stale { "TRUE" } else { "FALSE" }));
        }
        if let Some(algorithm) = &self.algorithm {
            fields.push(format!("algorithm={algorithm}"));
        }
        if let Some(qop) = &self.qop {
            fields.push(format!("qop=\"{}\"", qop.join(",")));
        }
        for param in self.auth_params.iter() {
            fields.push(param.to_string());
        }

        write!(f, "{} {}", self.scheme, fields.join(", "))
    }
}
