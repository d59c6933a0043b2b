use std::fmt;

use crate::message::Params;

/// The `media-type` that appears in the `Content-Type` SIP header.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ContentType {
    /// Top level type, lowercase.
    pub mtype: String,
    /// Subtype, lowercase.
    pub subtype: String,
    pub params: Params,
}

impl ContentType {
    /// Returns `type/subtype` without parameters.
    pub fn mime(&self) -> String {
        format!("{}/{}", self.mtype, self.subtype)
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}{}", self.mtype, self.subtype, self.params)
    }
}
