//! REGISTER handling (RFC 3261 section 10, RFC 5626 outbound contact).

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::cause::Cause;
use crate::config::Configuration;
use crate::message::{IncomingResponse, OutgoingRequest, RequestParams, SipMethod, Uri};
use crate::random_token;
use crate::request_sender::RequestEventHandler;
use crate::timer::Timer;
use crate::ua::{UaEvent, UserAgent, WeakUserAgent};

/// Lowest expiry we accept from a registrar, in seconds.
pub const MIN_REGISTER_EXPIRES: u32 = 10;

/// Keeps the configured AOR bound to our contact at the registrar.
#[derive(Clone)]
pub(crate) struct Registrator(Arc<Inner>);

struct Inner {
    ua: WeakUserAgent,
    registrar: Uri,
    to_uri: Uri,
    /// Shared by every REGISTER of this registrator.
    call_id: String,
    contact: String,
    state: Mutex<RegistrationState>,
}

struct RegistrationState {
    expires: u32,
    cseq: u32,
    registered: bool,
    registering: bool,
    /// Sends the refresh REGISTER.
    timer: Timer,
}

impl Registrator {
    pub(crate) fn new(ua: WeakUserAgent, config: &Configuration) -> Self {
        let contact = format!(
            "<{}>;+sip.ice;reg-id=1;+sip.instance=\"<urn:uuid:{}>\"",
            config.contact_uri(),
            config.instance_id()
        );

        Self(Arc::new(Inner {
            ua,
            registrar: config.registrar_server().clone(),
            to_uri: config.uri().clone(),
            call_id: random_token(22),
            contact,
            state: Mutex::new(RegistrationState {
                expires: config.register_expires(),
                cseq: 0,
                registered: false,
                registering: false,
                timer: Timer::new(),
            }),
        }))
    }

    pub(crate) fn registered(&self) -> bool {
        self.lock().registered
    }

    /// Sends a REGISTER unless one is already pending.
    pub(crate) fn register(&self) {
        let Some(ua) = self.0.ua.upgrade() else {
            return;
        };

        let (cseq, expires) = {
            let mut state = self.lock();
            if state.registering {
                log::debug!("register request in progress");
                return;
            }
            state.cseq += 1;
            state.registering = true;
            (state.cseq, state.expires)
        };

        let extra_headers = vec![
            format!("Contact: {};expires={}", self.0.contact, expires),
            format!("Expires: {}", expires),
        ];
        let request = self.request(&ua, cseq, extra_headers);
        ua.send_request(request, Arc::new(RegisterHandler(self.clone())));
    }

    /// Removes our binding, or every binding of the AOR with `all`.
    pub(crate) fn unregister(&self, all: bool) {
        let Some(ua) = self.0.ua.upgrade() else {
            return;
        };

        let cseq = {
            let mut state = self.lock();
            if !state.registered {
                log::debug!("already unregistered");
                return;
            }
            state.registered = false;
            state.timer.cancel();
            state.cseq += 1;
            state.cseq
        };

        let contact = if all {
            "Contact: *".to_owned()
        } else {
            format!("Contact: {};expires=0", self.0.contact)
        };
        let request = self.request(&ua, cseq, vec![contact, "Expires: 0".to_owned()]);
        ua.send_request(request, Arc::new(UnregisterHandler(self.clone())));
    }

    /// Unregisters if registered, before the user agent stops.
    pub(crate) fn close(&self) {
        if self.registered() {
            self.unregister(false);
        }
    }

    pub(crate) fn on_transport_closed(&self) {
        let was_registered = {
            let mut state = self.lock();
            state.registering = false;
            state.timer.cancel();
            std::mem::replace(&mut state.registered, false)
        };

        if was_registered {
            self.emit(UaEvent::Unregistered {
                response: None,
                cause: None,
            });
        }
    }

    fn request(&self, ua: &UserAgent, cseq: u32, extra_headers: Vec<String>) -> OutgoingRequest {
        let params = RequestParams {
            call_id: Some(self.0.call_id.clone()),
            cseq: Some(cseq),
            to_uri: Some(self.0.to_uri.clone()),
            ..Default::default()
        };
        ua.create_request(
            SipMethod::Register,
            self.0.registrar.clone(),
            params,
            extra_headers,
            None,
        )
    }

    fn receive_register_response(&self, response: &IncomingResponse) {
        {
            let mut state = self.lock();
            // Responses to an older REGISTER.
            if response.cseq() != state.cseq {
                return;
            }
            state.timer.cancel();
        }

        match response.status_code() {
            100..=199 => (),
            200..=299 => self.registration_success(response),
            423 => match response.number("Min-Expires") {
                Some(min_expires) => {
                    {
                        let mut state = self.lock();
                        state.expires = min_expires.max(MIN_REGISTER_EXPIRES);
                        state.registering = false;
                    }
                    self.register();
                }
                None => {
                    log::debug!("423 response received for REGISTER without Min-Expires");
                    self.registration_failure(Some(response), Cause::SipFailureCode);
                }
            },
            code => self.registration_failure(Some(response), Cause::from_status(code)),
        }
    }

    fn registration_success(&self, response: &IncomingResponse) {
        self.lock().registering = false;

        let contacts = response.contacts();
        if contacts.is_empty() {
            log::debug!("no Contact header in response to REGISTER, response ignored");
            return;
        }

        let Some(ua) = self.0.ua.upgrade() else {
            return;
        };
        let user = ua.config().contact_uri().user();
        let Some(contact) = contacts.into_iter().find(|contact| contact.uri().user() == user)
        else {
            log::debug!("no Contact header pointing to us, response ignored");
            return;
        };

        let was_registered = {
            let mut state = self.lock();
            let expires = contact
                .param("expires")
                .flatten()
                .and_then(|expires| expires.parse().ok())
                .or_else(|| response.number("Expires"))
                .unwrap_or(state.expires)
                .max(MIN_REGISTER_EXPIRES);

            state
                .timer
                .start_weak(refresh_interval(expires), &self.0, |inner| {
                    Registrator(inner).register()
                });
            std::mem::replace(&mut state.registered, true)
        };

        if !was_registered {
            ua.emit(UaEvent::Registered {
                response: response.clone(),
            });
        }
    }

    fn registration_failure(&self, response: Option<&IncomingResponse>, cause: Cause) {
        let was_registered = {
            let mut state = self.lock();
            state.registering = false;
            std::mem::replace(&mut state.registered, false)
        };

        log::debug!("registration failed: {}", cause);
        self.emit(UaEvent::RegistrationFailed {
            response: response.cloned(),
            cause,
        });
        if was_registered {
            self.emit(UaEvent::Unregistered {
                response: response.cloned(),
                cause: Some(cause),
            });
        }
    }

    fn unregistered(&self, response: Option<&IncomingResponse>, cause: Option<Cause>) {
        {
            let mut state = self.lock();
            state.registering = false;
            state.registered = false;
        }
        self.emit(UaEvent::Unregistered {
            response: response.cloned(),
            cause,
        });
    }

    fn bump_cseq(&self) {
        self.lock().cseq += 1;
    }

    fn emit(&self, event: UaEvent) {
        if let Some(ua) = self.0.ua.upgrade() {
            ua.emit(event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistrationState> {
        self.0.state.lock().expect("Lock failed")
    }
}

/// Half the expiry plus some jitter for long registrations, five seconds
/// ahead of expiry for short ones.
fn refresh_interval(expires: u32) -> Duration {
    let expires = u64::from(expires);
    let millis = if expires > 64 {
        let jitter = ((expires / 2 - 32) * 1000) as f64 * rand::random::<f64>();
        expires * 1000 / 2 + jitter as u64
    } else {
        expires * 1000 - 5000
    };
    Duration::from_millis(millis)
}

struct RegisterHandler(Registrator);

impl RequestEventHandler for RegisterHandler {
    fn on_receive_response(&self, response: &IncomingResponse) {
        self.0.receive_register_response(response);
    }

    fn on_request_timeout(&self) {
        self.0.registration_failure(None, Cause::RequestTimeout);
    }

    fn on_transport_error(&self) {
        self.0.registration_failure(None, Cause::ConnectionError);
    }

    fn on_authenticated(&self, _request: &OutgoingRequest) {
        self.0.bump_cseq();
    }
}

struct UnregisterHandler(Registrator);

impl RequestEventHandler for UnregisterHandler {
    fn on_receive_response(&self, response: &IncomingResponse) {
        match response.status_code() {
            100..=199 => (),
            200..=299 => self.0.unregistered(Some(response), None),
            code => self
                .0
                .unregistered(Some(response), Some(Cause::from_status(code))),
        }
    }

    fn on_request_timeout(&self) {
        self.0.unregistered(None, Some(Cause::RequestTimeout));
    }

    fn on_transport_error(&self) {
        self.0.unregistered(None, Some(Cause::ConnectionError));
    }

    fn on_authenticated(&self, _request: &OutgoingRequest) {
        self.0.bump_cseq();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ua::{UaContext, ua_context};
    use crate::test_utils::{self, respond};
    use crate::transaction::{TIMER_F, TIMER_K};
    use crate::transport::TransportEvent;

    const CHALLENGE: &str = "WWW-Authenticate: Digest realm=\"atlanta.com\", \
        nonce=\"84a4cc6f3082121f32b42a2187831a9e\", qop=\"auth\"";

    fn our_contact(ctx: &UaContext, params: &str) -> String {
        format!("Contact: <{}>{}", ctx.ua.config().contact_uri(), params)
    }

    fn last_request(ctx: &UaContext) -> crate::message::IncomingRequest {
        test_utils::parse_request(&ctx.transport.last_message().unwrap())
    }

    fn answer_last(ctx: &UaContext, code: u16, extra_headers: &[&str]) {
        let sent = ctx.transport.last_message().unwrap();
        ctx.ua.receive_data(&respond(&sent, code, extra_headers));
    }

    /// Registers with a 200 binding our contact for `expires` seconds.
    fn registered(expires: u32) -> UaContext {
        let ctx = ua_context();
        ctx.ua.register();
        let contact = our_contact(&ctx, &format!(";expires={}", expires));
        answer_last(&ctx, 200, &[contact.as_str()]);
        assert!(ctx.ua.is_registered());
        ctx
    }

    fn registered_events(ctx: &UaContext) -> usize {
        ctx.handler
            .events()
            .iter()
            .filter(|event| matches!(event, UaEvent::Registered { .. }))
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_request() {
        let ctx = ua_context();

        ctx.ua.register();

        let register = last_request(&ctx);
        assert_eq!(*register.method(), SipMethod::Register);
        assert_eq!(register.ruri().to_string(), "sip:atlanta.com");
        assert_eq!(register.cseq(), 1);
        assert!(register.header("To").unwrap().contains("sip:alice@atlanta.com"));
        assert_eq!(register.header("Expires"), Some("600"));

        let contact = register.header("Contact").unwrap();
        assert!(contact.starts_with(&format!("<{}>", ctx.ua.config().contact_uri())));
        assert!(contact.contains(";+sip.ice;reg-id=1;+sip.instance=\"<urn:uuid:"));
        assert!(contact.ends_with(";expires=600"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_while_pending_is_ignored() {
        let ctx = ua_context();

        ctx.ua.register();
        ctx.ua.register();

        assert_eq!(ctx.transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_schedules_refresh() {
        let ctx = registered(600);
        let first = last_request(&ctx);
        assert_matches!(&ctx.handler.events()[..], [UaEvent::Registered { .. }]);

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(ctx.transport.sent_count(), 1);

        tokio::time::sleep(Duration::from_secs(270)).await;
        assert_eq!(ctx.transport.sent_count(), 2);
        let refresh = last_request(&ctx);
        assert_eq!(refresh.cseq(), 2);
        assert_eq!(refresh.call_id(), first.call_id());

        let contact = our_contact(&ctx, ";expires=600");
        answer_last(&ctx, 200, &[contact.as_str()]);
        assert_eq!(registered_events(&ctx), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_expiry_refreshes_five_seconds_early() {
        let ctx = registered(30);

        tokio::time::sleep(Duration::from_millis(24_900)).await;
        assert_eq!(ctx.transport.sent_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expires_header_is_used_and_clamped() {
        let ctx = ua_context();
        ctx.ua.register();
        let contact = our_contact(&ctx, "");
        answer_last(&ctx, 200, &[contact.as_str(), "Expires: 5"]);
        assert!(ctx.ua.is_registered());

        // Clamped to 10 seconds, refreshed 5 seconds before.
        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(ctx.transport.sent_count(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(ctx.transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_without_our_contact_is_ignored() {
        let ctx = ua_context();
        ctx.ua.register();

        answer_last(&ctx, 200, &["Contact: <sip:someone@else.invalid>;expires=600"]);

        assert!(!ctx.ua.is_registered());
        assert!(ctx.handler.events().is_empty());

        // No longer registering, a new attempt goes out.
        ctx.ua.register();
        assert_eq!(ctx.transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_too_brief_retries_with_min_expires() {
        let ctx = ua_context();
        ctx.ua.register();

        answer_last(&ctx, 423, &["Min-Expires: 1800"]);

        let retry = last_request(&ctx);
        assert_eq!(retry.cseq(), 2);
        assert_eq!(retry.header("Expires"), Some("1800"));
        assert!(retry.header("Contact").unwrap().ends_with(";expires=1800"));
        assert!(ctx.handler.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_too_brief_without_min_expires_fails() {
        let ctx = ua_context();
        ctx.ua.register();

        answer_last(&ctx, 423, &[]);

        assert_matches!(
            &ctx.handler.events()[..],
            [UaEvent::RegistrationFailed {
                response: Some(_),
                cause: Cause::SipFailureCode
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_refresh_unregisters() {
        let ctx = registered(30);
        tokio::time::sleep(Duration::from_secs(26)).await;

        answer_last(&ctx, 403, &[]);

        assert!(!ctx.ua.is_registered());
        assert_matches!(
            &ctx.handler.events()[..],
            [
                UaEvent::Registered { .. },
                UaEvent::RegistrationFailed {
                    response: Some(_),
                    cause: Cause::Rejected
                },
                UaEvent::Unregistered {
                    response: Some(_),
                    cause: Some(Cause::Rejected)
                }
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_own_binding() {
        let ctx = registered(600);

        ctx.ua.unregister(false);

        let unregister = last_request(&ctx);
        assert_eq!(unregister.cseq(), 2);
        assert_eq!(unregister.header("Expires"), Some("0"));
        assert!(unregister.header("Contact").unwrap().ends_with(";expires=0"));
        assert!(!ctx.ua.is_registered());

        answer_last(&ctx, 200, &[]);
        assert_matches!(
            ctx.handler.events().last(),
            Some(UaEvent::Unregistered {
                response: Some(_),
                cause: None
            })
        );

        // Nothing left to refresh.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ctx.transport.sent_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_all_bindings() {
        let ctx = registered(600);

        ctx.ua.unregister(true);

        assert_eq!(last_request(&ctx).header("Contact"), Some("*"));
        answer_last(&ctx, 500, &[]);
        assert_matches!(
            ctx.handler.events().last(),
            Some(UaEvent::Unregistered {
                response: Some(_),
                cause: Some(Cause::SipFailureCode)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregister_when_not_registered_sends_nothing() {
        let ctx = ua_context();

        ctx.ua.unregister(false);

        assert_eq!(ctx.transport.sent_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_closed_unregisters() {
        let ctx = registered(600);
        tokio::time::sleep(TIMER_K + Duration::from_millis(1)).await;

        ctx.ua
            .on_transport_event(TransportEvent::Disconnected { error: false });

        assert!(!ctx.ua.is_registered());
        assert_matches!(
            &ctx.handler.events()[..],
            [
                UaEvent::Registered { .. },
                UaEvent::Disconnected { error: false },
                UaEvent::Unregistered {
                    response: None,
                    cause: None
                }
            ]
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ctx.transport.sent_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_registration() {
        let ctx = ua_context();
        ctx.ua.register();

        tokio::time::sleep(TIMER_F + Duration::from_millis(1)).await;

        assert_matches!(
            &ctx.handler.events()[..],
            [UaEvent::RegistrationFailed {
                response: None,
                cause: Cause::RequestTimeout
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_to_older_register_is_ignored() {
        let ctx = ua_context();
        ctx.ua.register();
        let first = ctx.transport.last_message().unwrap();
        answer_last(&ctx, 423, &["Min-Expires: 1800"]);

        let contact = our_contact(&ctx, ";expires=600");
        let stale = test_utils::parse_response(&respond(&first, 200, &[contact.as_str()]));
        ctx.ua.0.registrator.receive_register_response(&stale);

        assert!(!ctx.ua.is_registered());
        assert!(ctx.handler.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_is_answered() {
        let ctx = ua_context();
        ctx.ua.register();

        answer_last(&ctx, 401, &[CHALLENGE]);

        let retry = last_request(&ctx);
        assert_eq!(retry.cseq(), 2);
        assert!(retry.header("Authorization").is_some());

        let contact = our_contact(&ctx, ";expires=600");
        answer_last(&ctx, 200, &[contact.as_str()]);
        assert!(ctx.ua.is_registered());
        assert_eq!(registered_events(&ctx), 1);
    }

    #[test]
    fn test_refresh_interval() {
        assert_eq!(refresh_interval(30), Duration::from_secs(25));
        assert_eq!(refresh_interval(64), Duration::from_secs(59));
        for _ in 0..100 {
            let interval = refresh_interval(600);
            assert!(interval >= Duration::from_secs(300));
            assert!(interval < Duration::from_secs(568));
        }
    }
}
