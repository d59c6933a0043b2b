//! User agent configuration.
//!
//! A [`Configuration`] is created with a [`ConfigurationBuilder`] and is
//! validated once, at [`ConfigurationBuilder::build`]. Every setting has a
//! usable default except the user's own URI.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::grammar::{self, Rule};
use crate::message::{SipMethod, Uri};
use crate::random_token;

const DEFAULT_REGISTER_EXPIRES: u32 = 600;
const DEFAULT_NO_ANSWER_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_RECOVERY_MIN_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_RECOVERY_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// The validated settings of a user agent.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) uri: Uri,
    pub(crate) password: Option<String>,
    pub(crate) ha1: Option<String>,
    pub(crate) realm: Option<String>,
    pub(crate) authorization_user: String,
    pub(crate) display_name: Option<String>,
    pub(crate) register: bool,
    pub(crate) register_expires: u32,
    pub(crate) registrar_server: Uri,
    pub(crate) contact_uri: Uri,
    pub(crate) via_host: String,
    pub(crate) instance_id: String,
    pub(crate) session_timers: bool,
    pub(crate) session_timers_refresh_method: SipMethod,
    pub(crate) no_answer_timeout: Duration,
    pub(crate) use_preloaded_route: bool,
    pub(crate) user_agent: String,
    pub(crate) connection_recovery_min_interval: Duration,
    pub(crate) connection_recovery_max_interval: Duration,
    pub(crate) call_id_prefix: String,
}

impl Configuration {
    /// Returns a builder for a configuration.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// The SIP URI of the local user.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn ha1(&self) -> Option<&str> {
        self.ha1.as_deref()
    }

    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// The username used in digest credentials.
    pub fn authorization_user(&self) -> &str {
        &self.authorization_user
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Whether the user agent registers once connected.
    pub fn register(&self) -> bool {
        self.register
    }

    /// Requested registration lifetime, in seconds.
    pub fn register_expires(&self) -> u32 {
        self.register_expires
    }

    pub fn registrar_server(&self) -> &Uri {
        &self.registrar_server
    }

    pub fn contact_uri(&self) -> &Uri {
        &self.contact_uri
    }

    /// The host put in the `sent-by` of our Via headers.
    pub fn via_host(&self) -> &str {
        &self.via_host
    }

    /// The instance UUID, without the `urn:uuid:` prefix.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn session_timers(&self) -> bool {
        self.session_timers
    }

    pub fn session_timers_refresh_method(&self) -> &SipMethod {
        &self.session_timers_refresh_method
    }

    pub fn no_answer_timeout(&self) -> Duration {
        self.no_answer_timeout
    }

    pub fn use_preloaded_route(&self) -> bool {
        self.use_preloaded_route
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn connection_recovery_min_interval(&self) -> Duration {
        self.connection_recovery_min_interval
    }

    pub fn connection_recovery_max_interval(&self) -> Duration {
        self.connection_recovery_max_interval
    }

    /// The prefix of every Call-ID this instance generates.
    pub fn call_id_prefix(&self) -> &str {
        &self.call_id_prefix
    }
}

/// Builder for [`Configuration`].
///
/// # Examples
///
/// ```
/// # use sipcore::config::Configuration;
/// let config = Configuration::builder()
///     .with_uri("sip:alice@example.com")
///     .with_password("secret")
///     .with_register_expires(300)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.authorization_user(), "alice");
/// assert_eq!(config.registrar_server().to_string(), "sip:example.com");
/// ```
#[derive(Debug, Default)]
pub struct ConfigurationBuilder {
    uri: Option<String>,
    password: Option<String>,
    ha1: Option<String>,
    realm: Option<String>,
    authorization_user: Option<String>,
    display_name: Option<String>,
    register: Option<bool>,
    register_expires: Option<u32>,
    registrar_server: Option<String>,
    contact_uri: Option<String>,
    instance_id: Option<String>,
    session_timers: Option<bool>,
    session_timers_refresh_method: Option<String>,
    no_answer_timeout: Option<Duration>,
    use_preloaded_route: bool,
    user_agent: Option<String>,
    connection_recovery_min_interval: Option<Duration>,
    connection_recovery_max_interval: Option<Duration>,
}

impl ConfigurationBuilder {
    /// Sets the SIP URI of the local user. The `sip:` scheme is optional.
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets a precomputed `MD5(username:realm:password)`.
    pub fn with_ha1(mut self, ha1: impl Into<String>) -> Self {
        self.ha1 = Some(ha1.into());
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    pub fn with_authorization_user(mut self, user: impl Into<String>) -> Self {
        self.authorization_user = Some(user.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_register(mut self, register: bool) -> Self {
        self.register = Some(register);
        self
    }

    pub fn with_register_expires(mut self, expires: u32) -> Self {
        self.register_expires = Some(expires);
        self
    }

    pub fn with_registrar_server(mut self, registrar: impl Into<String>) -> Self {
        self.registrar_server = Some(registrar.into());
        self
    }

    pub fn with_contact_uri(mut self, contact: impl Into<String>) -> Self {
        self.contact_uri = Some(contact.into());
        self
    }

    /// Sets the instance UUID, with or without the `urn:uuid:` prefix.
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn with_session_timers(mut self, enabled: bool) -> Self {
        self.session_timers = Some(enabled);
        self
    }

    /// Sets the method used to refresh sessions, `INVITE` or `UPDATE`.
    pub fn with_session_timers_refresh_method(mut self, method: impl Into<String>) -> Self {
        self.session_timers_refresh_method = Some(method.into());
        self
    }

    pub fn with_no_answer_timeout(mut self, timeout: Duration) -> Self {
        self.no_answer_timeout = Some(timeout);
        self
    }

    /// Adds a Route to the transport's own URI on every out of dialog request.
    pub fn with_preloaded_route(mut self, enabled: bool) -> Self {
        self.use_preloaded_route = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Sets the bounds of the transport reconnection backoff.
    pub fn with_connection_recovery(mut self, min: Duration, max: Duration) -> Self {
        self.connection_recovery_min_interval = Some(min);
        self.connection_recovery_max_interval = Some(max);
        self
    }

    /// Validates the settings and fills in the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first invalid or missing
    /// parameter.
    pub fn build(self) -> Result<Configuration> {
        let uri = self.uri.ok_or_else(|| Error::configuration("uri", ""))?;
        let uri = parse_sip_uri(&uri).ok_or_else(|| Error::configuration("uri", &uri))?;
        let Some(user) = uri.user().map(str::to_owned) else {
            return Err(Error::configuration("uri", &uri));
        };

        let registrar_server = match self.registrar_server {
            Some(registrar) => match parse_sip_uri(&registrar) {
                Some(parsed) if parsed.user().is_none() => parsed,
                _ => return Err(Error::configuration("registrar_server", registrar)),
            },
            None => {
                let mut registrar = uri.clone();
                registrar.set_user(None);
                registrar.set_password(None);
                registrar.clear_params();
                registrar.clear_headers();
                registrar
            }
        };

        let register_expires = match self.register_expires {
            Some(0) => return Err(Error::configuration("register_expires", 0)),
            Some(expires) => expires,
            None => DEFAULT_REGISTER_EXPIRES,
        };

        let via_host = format!("{}.invalid", random_token(12));
        let contact_uri = match self.contact_uri {
            Some(contact) => {
                parse_sip_uri(&contact).ok_or_else(|| Error::configuration("contact_uri", contact))?
            }
            None => {
                let mut contact = Uri::new("sip", Some(&random_token(8)), &via_host, None)?;
                contact.set_param("transport", Some("ws"));
                contact
            }
        };

        let instance_id = match self.instance_id {
            Some(id) => {
                let stripped = strip_prefix_ignore_case(&id, "urn:");
                let stripped = strip_prefix_ignore_case(stripped, "uuid:");
                if grammar::parse(stripped, Rule::Uuid).is_err() {
                    return Err(Error::configuration("instance_id", id));
                }
                stripped.to_owned()
            }
            None => uuid::Uuid::new_v4().to_string(),
        };

        let session_timers_refresh_method = match self.session_timers_refresh_method {
            Some(method) => match method.to_ascii_uppercase().as_str() {
                "INVITE" => SipMethod::Invite,
                "UPDATE" => SipMethod::Update,
                _ => return Err(Error::configuration("session_timers_refresh_method", method)),
            },
            None => SipMethod::Update,
        };

        let no_answer_timeout = self.no_answer_timeout.unwrap_or(DEFAULT_NO_ANSWER_TIMEOUT);
        if no_answer_timeout.is_zero() {
            return Err(Error::configuration(
                "no_answer_timeout",
                format!("{:?}", no_answer_timeout),
            ));
        }

        let min_interval = self
            .connection_recovery_min_interval
            .unwrap_or(DEFAULT_RECOVERY_MIN_INTERVAL);
        let max_interval = self
            .connection_recovery_max_interval
            .unwrap_or(DEFAULT_RECOVERY_MAX_INTERVAL);
        if min_interval.is_zero() || max_interval < min_interval {
            return Err(Error::configuration(
                "connection_recovery_max_interval",
                format!("{:?}", max_interval),
            ));
        }

        Ok(Configuration {
            authorization_user: self.authorization_user.unwrap_or(user),
            uri,
            password: self.password,
            ha1: self.ha1,
            realm: self.realm,
            display_name: self.display_name,
            register: self.register.unwrap_or(true),
            register_expires,
            registrar_server,
            contact_uri,
            via_host,
            instance_id,
            session_timers: self.session_timers.unwrap_or(true),
            session_timers_refresh_method,
            no_answer_timeout,
            use_preloaded_route: self.use_preloaded_route,
            user_agent: self
                .user_agent
                .unwrap_or_else(|| concat!("sipcore ", env!("CARGO_PKG_VERSION")).to_owned()),
            connection_recovery_min_interval: min_interval,
            connection_recovery_max_interval: max_interval,
            call_id_prefix: random_token(5),
        })
    }
}

/// Parses `value` as a SIP URI, adding the `sip:` scheme when missing.
fn parse_sip_uri(value: &str) -> Option<Uri> {
    let has_scheme = value
        .get(..4)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("sip:"));
    let value = if has_scheme {
        value.to_owned()
    } else {
        format!("sip:{}", value)
    };
    value.parse().ok()
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> &'a str {
    match value.get(..prefix.len()) {
        Some(head) if head.eq_ignore_ascii_case(prefix) => &value[prefix.len()..],
        _ => value,
    }
}
