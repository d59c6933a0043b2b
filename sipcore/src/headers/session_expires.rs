use std::fmt;

use crate::message::Params;

/// The `Session-Expires` SIP header (RFC 4028).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SessionExpires {
    /// Session interval in seconds.
    pub expires: u32,
    /// `uac` or `uas`, lowercase.
    pub refresher: Option<String>,
    /// Any other parameter.
    pub params: Params,
}

impl fmt::Display for SessionExpires {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expires)?;
        if let Some(refresher) = &self.refresher {
            write!(f, ";refresher={}", refresher)?;
        }
        write!(f, "{}", self.params)
    }
}
