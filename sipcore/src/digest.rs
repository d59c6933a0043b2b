//! Digest access authentication (RFC 2617) for SIP requests.

use crate::error::{Error, Result};
use crate::headers::Challenge;
use crate::random_token;

/// Upper bound of the 8 hex digit nonce count.
const NC_LIMIT: u64 = 1 << 32;

/// The credentials used to answer digest challenges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    /// A precomputed `MD5(username:realm:password)`.
    pub ha1: Option<String>,
    /// The realm `ha1` was computed for.
    pub realm: Option<String>,
}

/// The parts of a request covered by the digest response.
#[derive(Debug, Clone, Copy)]
pub struct RequestInfo<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub body: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qop {
    Auth,
    AuthInt,
}

impl Qop {
    fn as_str(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
        }
    }
}

/// Computes `Authorization` and `Proxy-Authorization` header values.
///
/// One instance answers the successive challenges of a request, so the nonce
/// count keeps increasing between calls to [`DigestAuthentication::authenticate`].
///
/// # Examples
///
/// ```
/// # use sipcore::digest::{Credentials, DigestAuthentication, RequestInfo};
/// # use sipcore::headers::Challenge;
/// let mut auth = DigestAuthentication::new(Credentials {
///     username: "alice".into(),
///     password: Some("secret".into()),
///     ..Default::default()
/// });
/// let challenge = Challenge {
///     scheme: "Digest".into(),
///     realm: Some("atlanta.com".into()),
///     nonce: Some("84a4cc6f3082121f32b42a2187831a9e".into()),
///     ..Default::default()
/// };
/// let request = RequestInfo { method: "REGISTER", uri: "sip:atlanta.com", body: None };
///
/// assert!(auth.authenticate(request, &challenge, None));
/// assert!(auth.header_value().unwrap().starts_with("Digest algorithm=MD5, username=\"alice\""));
/// ```
#[derive(Debug, Clone)]
pub struct DigestAuthentication {
    credentials: Credentials,
    cnonce: Option<String>,
    nc: u64,
    nc_hex: String,
    algorithm: Option<String>,
    realm: Option<String>,
    nonce: Option<String>,
    opaque: Option<String>,
    stale: Option<bool>,
    qop: Option<Qop>,
    uri: Option<String>,
    ha1: Option<String>,
    response: Option<String>,
}

impl DigestAuthentication {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            cnonce: None,
            nc: 0,
            nc_hex: "00000000".into(),
            algorithm: None,
            realm: None,
            nonce: None,
            opaque: None,
            stale: None,
            qop: None,
            uri: None,
            ha1: None,
            response: None,
        }
    }

    /// The realm of the last challenge.
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// The HA1 used for the last response.
    pub fn ha1(&self) -> Option<&str> {
        self.ha1.as_deref()
    }

    /// Whether the last challenge was flagged stale.
    pub fn stale(&self) -> bool {
        self.stale.unwrap_or(false)
    }

    /// The current nonce count as 8 lowercase hex digits.
    pub fn nonce_count(&self) -> &str {
        &self.nc_hex
    }

    /// Computes the digest response for `request` against `challenge`.
    ///
    /// `cnonce` overrides the random client nonce. Returns `false` when the
    /// challenge cannot be answered with the configured credentials.
    pub fn authenticate(
        &mut self,
        request: RequestInfo<'_>,
        challenge: &Challenge,
        cnonce: Option<&str>,
    ) -> bool {
        if !challenge.is_digest() {
            log::warn!("challenge with scheme {:?}, authentication aborted", challenge.scheme);
            return false;
        }

        self.algorithm = challenge.algorithm.clone();
        self.realm = challenge.realm.clone();
        self.nonce = challenge.nonce.clone();
        self.opaque = challenge.opaque.clone();
        self.stale = challenge.stale;

        match self.algorithm.as_deref() {
            None => self.algorithm = Some("MD5".into()),
            Some(algorithm) if algorithm.eq_ignore_ascii_case("MD5") => (),
            Some(algorithm) => {
                log::warn!(
                    "challenge with Digest algorithm different than \"MD5\" ({algorithm}), authentication aborted"
                );
                return false;
            }
        }

        let Some(nonce) = self.nonce.clone() else {
            log::warn!("challenge without Digest nonce, authentication aborted");
            return false;
        };
        let Some(realm) = self.realm.clone() else {
            log::warn!("challenge without Digest realm, authentication aborted");
            return false;
        };

        if self.credentials.password.is_none() {
            if self.credentials.ha1.is_none() {
                log::warn!("no plain SIP password nor ha1 provided, authentication aborted");
                return false;
            }
            if self.credentials.realm.as_deref() != Some(realm.as_str()) {
                log::warn!(
                    "no plain SIP password, and stored realm does not match the given realm, cannot authenticate [stored:{:?}, given:{:?}]",
                    self.credentials.realm,
                    realm
                );
                return false;
            }
        }

        self.qop = match &challenge.qop {
            Some(options) if options.iter().any(|qop| qop == "auth-int") => Some(Qop::AuthInt),
            Some(options) if options.iter().any(|qop| qop == "auth") => Some(Qop::Auth),
            Some(_) => {
                log::warn!(
                    "challenge without Digest qop different than \"auth\" or \"auth-int\", authentication aborted"
                );
                return false;
            }
            None => None,
        };

        self.uri = Some(request.uri.to_owned());
        let cnonce = cnonce.map_or_else(|| random_token(12), str::to_owned);

        self.nc += 1;
        if self.nc == NC_LIMIT {
            self.nc = 1;
        }
        self.nc_hex = format!("{:08x}", self.nc);

        let ha1 = match &self.credentials.password {
            Some(password) => md5_hex(&format!(
                "{}:{}:{}",
                self.credentials.username, realm, password
            )),
            None => self.credentials.ha1.clone().unwrap_or_default(),
        };

        let response = match self.qop {
            Some(Qop::Auth) => {
                let ha2 = md5_hex(&format!("{}:{}", request.method, request.uri));
                md5_hex(&format!("{ha1}:{nonce}:{}:{cnonce}:auth:{ha2}", self.nc_hex))
            }
            Some(Qop::AuthInt) => {
                let body_hash = md5_hex(request.body.unwrap_or_default());
                let ha2 = md5_hex(&format!("{}:{}:{}", request.method, request.uri, body_hash));
                md5_hex(&format!("{ha1}:{nonce}:{}:{cnonce}:auth-int:{ha2}", self.nc_hex))
            }
            None => {
                let ha2 = md5_hex(&format!("{}:{}", request.method, request.uri));
                md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
            }
        };

        self.cnonce = Some(cnonce);
        self.ha1 = Some(ha1);
        self.response = Some(response);

        true
    }

    /// Renders the `Digest ...` credentials of the last successful
    /// [`DigestAuthentication::authenticate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if no response was computed yet.
    pub fn header_value(&self) -> Result<String> {
        let Some(response) = &self.response else {
            return Err(Error::InvalidState(
                "response field does not exist, cannot generate Authorization header".into(),
            ));
        };
        let field = |value: &Option<String>| value.clone().unwrap_or_default();

        let mut params = vec![
            format!("algorithm={}", field(&self.algorithm)),
            format!("username=\"{}\"", self.credentials.username),
            format!("realm=\"{}\"", field(&self.realm)),
            format!("nonce=\"{}\"", field(&self.nonce)),
            format!("uri=\"{}\"", field(&self.uri)),
            format!("response=\"{}\"", response),
        ];
        if let Some(opaque) = &self.opaque {
            params.push(format!("opaque=\"{}\"", opaque));
        }
        if let Some(qop) = self.qop {
            params.push(format!("qop={}", qop.as_str()));
            params.push(format!("cnonce=\"{}\"", field(&self.cnonce)));
            params.push(format!("nc={}", self.nc_hex));
        }

        Ok(format!("Digest {}", params.join(", ")))
    }
}

/// Lowercase hex MD5 of `input`.
pub(crate) fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input))
}
