use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// An SIP Method.
///
/// This enum declares SIP methods as described by RFC3261 and Others.
pub enum SipMethod {
    /// SIP INVITE Method.
    Invite,
    /// SIP ACK Method.
    Ack,
    /// SIP BYE Method.
    Bye,
    /// SIP CANCEL Method.
    Cancel,
    /// SIP REGISTER Method.
    Register,
    /// SIP OPTIONS Method.
    Options,
    /// SIP INFO Method.
    Info,
    /// SIP NOTIFY Method.
    Notify,
    /// SIP SUBSCRIBE Method.
    Subscribe,
    /// SIP UPDATE Method.
    Update,
    /// SIP REFER Method.
    Refer,
    /// SIP PRACK Method.
    Prack,
    /// SIP MESSAGE Method.
    Message,
    /// SIP PUBLISH Method.
    Publish,
    /// An extension method, kept as it appeared on the wire.
    Other(String),
}

impl SipMethod {
    pub fn is_invite(&self) -> bool {
        matches!(self, Self::Invite)
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    /// Returns the string representation of a method.
    #[inline(always)]
    pub fn as_str(&self) -> &str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Register => "REGISTER",
            SipMethod::Options => "OPTIONS",
            SipMethod::Info => "INFO",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Update => "UPDATE",
            SipMethod::Refer => "REFER",
            SipMethod::Prack => "PRACK",
            SipMethod::Message => "MESSAGE",
            SipMethod::Publish => "PUBLISH",
            SipMethod::Other(method) => method,
        }
    }

    /// Returns `true` if a request with this method may change the session
    /// description, given whether it carries a body.
    pub fn modifies_session(&self, has_body: bool) -> bool {
        matches!(self, SipMethod::Invite) || (matches!(self, SipMethod::Update) && has_body)
    }
}

impl From<&str> for SipMethod {
    fn from(value: &str) -> Self {
        match value {
            "INVITE" => SipMethod::Invite,
            "CANCEL" => SipMethod::Cancel,
            "ACK" => SipMethod::Ack,
            "BYE" => SipMethod::Bye,
            "REGISTER" => SipMethod::Register,
            "OPTIONS" => SipMethod::Options,
            "INFO" => SipMethod::Info,
            "NOTIFY" => SipMethod::Notify,
            "SUBSCRIBE" => SipMethod::Subscribe,
            "UPDATE" => SipMethod::Update,
            "REFER" => SipMethod::Refer,
            "PRACK" => SipMethod::Prack,
            "MESSAGE" => SipMethod::Message,
            "PUBLISH" => SipMethod::Publish,
            other => SipMethod::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
