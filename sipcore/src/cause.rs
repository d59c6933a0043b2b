//! Failure causes reported to the application.

use std::fmt;

/// Why a request, registration or session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    ConnectionError,
    RequestTimeout,
    /// A SIP failure code without a more specific cause.
    SipFailureCode,
    InternalError,
    Busy,
    Rejected,
    Redirected,
    Unavailable,
    NotFound,
    AddressIncomplete,
    IncompatibleSdp,
    MissingSdp,
    AuthenticationError,
    Bye,
    Canceled,
    NoAnswer,
    Expires,
    NoAck,
    DialogError,
}

impl Cause {
    /// Maps a final SIP status code to a cause.
    pub fn from_status(code: u16) -> Self {
        match code {
            300 | 301 | 302 | 305 | 380 => Cause::Redirected,
            486 | 600 => Cause::Busy,
            403 | 603 => Cause::Rejected,
            404 | 604 => Cause::NotFound,
            408 | 410 | 430 | 480 => Cause::Unavailable,
            424 | 484 => Cause::AddressIncomplete,
            488 | 606 => Cause::IncompatibleSdp,
            401 | 407 => Cause::AuthenticationError,
            _ => Cause::SipFailureCode,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::ConnectionError => "Connection Error",
            Cause::RequestTimeout => "Request Timeout",
            Cause::SipFailureCode => "SIP Failure Code",
            Cause::InternalError => "Internal Error",
            Cause::Busy => "Busy",
            Cause::Rejected => "Rejected",
            Cause::Redirected => "Redirected",
            Cause::Unavailable => "Unavailable",
            Cause::NotFound => "Not Found",
            Cause::AddressIncomplete => "Address Incomplete",
            Cause::IncompatibleSdp => "Incompatible SDP",
            Cause::MissingSdp => "Missing SDP",
            Cause::AuthenticationError => "Authentication Error",
            Cause::Bye => "Terminated",
            Cause::Canceled => "Canceled",
            Cause::NoAnswer => "No Answer",
            Cause::Expires => "Expires",
            Cause::NoAck => "No ACK",
            Cause::DialogError => "Dialog Error",
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
