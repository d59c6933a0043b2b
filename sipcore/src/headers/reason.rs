use std::fmt;

use crate::message::Params;

/// The `Reason` SIP header (RFC 3326).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Reason {
    /// `SIP`, `Q.850` or an extension token.
    pub protocol: String,
    pub cause: Option<u16>,
    pub text: Option<String>,
    pub params: Params,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.protocol)?;
        if let Some(cause) = self.cause {
            write!(f, ";cause={}", cause)?;
        }
        if let Some(text) = &self.text {
            write!(f, ";text=\"{}\"", text)?;
        }
        write!(f, "{}", self.params)
    }
}
