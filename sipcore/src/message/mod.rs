//! SIP Message types
//!
//! The module provides the values carried by SIP messages ([`Uri`],
//! [`NameAddrHeader`], [`Params`]), the requests we send
//! ([`OutgoingRequest`]) and the messages we receive ([`IncomingRequest`],
//! [`IncomingResponse`]).

mod code;
mod incoming;
mod method;
mod name_addr;
mod outgoing;
mod params;
pub(crate) mod uri;

pub use code::{CodeClass, is_failure, is_provisional, is_success, reason_phrase};
pub use incoming::{IncomingMessage, IncomingRequest, IncomingResponse, SipMessage};
pub use method::SipMethod;
pub use name_addr::NameAddrHeader;
pub use outgoing::{OutgoingRequest, RequestParams};
pub use params::{Param, Params};
pub use uri::Uri;

/// Methods listed in the `Allow` header of our requests and replies.
pub const ALLOWED_METHODS: &str = "INVITE,ACK,CANCEL,BYE,UPDATE,MESSAGE,OPTIONS,REFER,INFO,NOTIFY";

/// Body types listed in the `Accept` header of our replies.
pub const ACCEPTED_BODY_TYPES: &str = "application/sdp, application/dtmf-relay";

/// `Max-Forwards` value of the requests we originate.
pub const MAX_FORWARDS: u32 = 69;
