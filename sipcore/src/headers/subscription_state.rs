use crate::message::Params;

/// The `Subscription-State` SIP header (RFC 6665).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SubscriptionState {
    /// `active`, `pending`, `terminated` or an extension, lowercase.
    pub state: String,
    pub reason: Option<String>,
    pub expires: Option<u32>,
    pub retry_after: Option<u32>,
    pub params: Params,
}
