/// Classifies SIP status codes into categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeClass {
    /// Provisional responses (1xx)
    Provisional,
    /// Successful responses (2xx)
    Success,
    /// Redirection responses (3xx)
    Redirection,
    /// Client failure responses (4xx)
    ClientError,
    /// Server failure responses (5xx)
    ServerError,
    /// Global failure responses (6xx)
    GlobalFailure,
}

impl CodeClass {
    /// Classifies a numeric status code, `None` outside 100-699.
    pub fn of(code: u16) -> Option<Self> {
        match code {
            100..=199 => Some(CodeClass::Provisional),
            200..=299 => Some(CodeClass::Success),
            300..=399 => Some(CodeClass::Redirection),
            400..=499 => Some(CodeClass::ClientError),
            500..=599 => Some(CodeClass::ServerError),
            600..=699 => Some(CodeClass::GlobalFailure),
            _ => None,
        }
    }
}

/// Returns `true` for 1xx codes.
#[inline]
pub fn is_provisional(code: u16) -> bool {
    (100..200).contains(&code)
}

/// Returns `true` for 2xx codes.
#[inline]
pub fn is_success(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Returns `true` for 3xx-6xx codes.
#[inline]
pub fn is_failure(code: u16) -> bool {
    (300..700).contains(&code)
}

/// Returns the default reason phrase for a status code.
pub fn reason_phrase(code: u16) -> Option<&'static str> {
    let reason = match code {
        // 1xx – Provisional Responses
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        199 => "Early Dialog Terminated",
        // 2xx – Successful Responses
        200 => "OK",
        202 => "Accepted",
        204 => "No Notification",
        // 3xx – Redirection Responses
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        305 => "Use Proxy",
        380 => "Alternative Service",
        // 4xx – Client Failure Responses
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        412 => "Conditional Request Failed",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Unsupported URI Scheme",
        417 => "Unknown Resource-Priority",
        420 => "Bad Extension",
        421 => "Extension Required",
        422 => "Session Interval Too Small",
        423 => "Interval Too Brief",
        424 => "Bad Location Information",
        428 => "Use Identity Header",
        429 => "Provide Referrer Identity",
        430 => "Flow Failed",
        433 => "Anonymity Disallowed",
        436 => "Bad Identity-Info",
        437 => "Unsupported Certificate",
        438 => "Invalid Identity Header",
        439 => "First Hop Lacks Outbound Support",
        440 => "Max-Breadth Exceeded",
        469 => "Bad Info Package",
        470 => "Consent Needed",
        478 => "Unresolvable Destination",
        480 => "Temporarily Unavailable",
        481 => "Call/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        484 => "Address Incomplete",
        485 => "Ambiguous",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        489 => "Bad Event",
        491 => "Request Pending",
        493 => "Undecipherable",
        494 => "Security Agreement Required",
        // 5xx – Server Failure Responses
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        505 => "Version Not Supported",
        513 => "Message Too Large",
        580 => "Precondition Failure",
        // 6xx – Global Failure Responses
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does Not Exist Anywhere",
        606 => "Not Acceptable",
        _ => return None,
    };

    Some(reason)
}
