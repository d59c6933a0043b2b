//! # sipcore
//!
//! A SIP (RFC 3261) signaling core: message grammar and model, digest
//! authentication, transactions, dialogs and a user agent that routes
//! messages between them over a pluggable transport.

pub mod cause;
pub mod config;
pub mod dialog;
pub mod digest;
pub mod grammar;
pub mod headers;
pub mod message;
pub mod parser;
pub mod request_sender;
pub mod sanity;
pub mod transaction;
pub mod transport;
pub mod ua;

pub(crate) mod error;
pub(crate) mod macros;
pub(crate) mod timer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{DialogError, Error, Result};

#[cfg(test)]
#[macro_use]
extern crate assert_matches;

const TOKEN_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuv";

/// Returns a random token of `size` characters in base 32.
pub(crate) fn random_token(size: usize) -> String {
    (0..size)
        .map(|_| TOKEN_CHARS[rand::random_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

/// Returns a new random From/To tag.
pub(crate) fn new_tag() -> String {
    random_token(10)
}

/// The RFC 3261 magic cookie every branch starts with.
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// Returns a new random Via branch.
pub(crate) fn generate_branch() -> String {
    format!("{}{}", BRANCH_MAGIC_COOKIE, rand::random_range(0..10_000_000u32))
}
