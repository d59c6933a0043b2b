use core::fmt;

use crate::message::SipMethod;

/// The `CSeq` SIP header.
///
/// Ensures order and tracking of SIP transactions within a
/// session.
///
/// # Examples
///
/// ```
/// # use sipcore::{headers::CSeq, message::SipMethod};
/// let cseq = CSeq::new(1, SipMethod::Options);
///
/// assert_eq!("1 OPTIONS", cseq.to_string());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct CSeq {
    /// The CSeq number.
    pub value: u32,
    /// The CSeq method.
    pub method: SipMethod,
}

impl CSeq {
    /// Creates a new `CSeq` instance.
    pub fn new(value: u32, method: SipMethod) -> Self {
        Self { value, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.method)
    }
}
