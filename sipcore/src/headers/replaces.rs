use std::fmt;

use crate::message::Params;

/// The `Replaces` SIP header (RFC 3891).
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Replaces {
    pub call_id: String,
    pub to_tag: Option<String>,
    pub from_tag: Option<String>,
    /// Set when the `early-only` flag is present.
    pub early_only: bool,
    pub params: Params,
}

impl fmt::Display for Replaces {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.call_id)?;
        if let Some(to_tag) = &self.to_tag {
            write!(f, ";to-tag={}", to_tag)?;
        }
        if let Some(from_tag) = &self.from_tag {
            write!(f, ";from-tag={}", from_tag)?;
        }
        if self.early_only {
            f.write_str(";early-only")?;
        }
        write!(f, "{}", self.params)
    }
}
