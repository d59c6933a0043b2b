use std::fmt;

use crate::message::Params;

/// The `Event` SIP header (RFC 6665).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Event {
    /// The event package, lowercase.
    pub event: String,
    pub params: Params,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.event, self.params)
    }
}
