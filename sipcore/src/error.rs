use thiserror::Error;

use crate::grammar::ParseFailure;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a dialog.
#[derive(Debug, PartialEq, Eq, Error)]
pub enum DialogError {
    #[error("unable to create a Dialog without Contact header field")]
    MissingContact,

    #[error("the message has no {0} tag")]
    MissingTag(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
    /// An invalid or missing mandatory setting.
    #[error("invalid value {value:?} for parameter \"{parameter}\"")]
    Configuration { parameter: &'static str, value: String },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Parse(#[from] ParseFailure),

    #[error(transparent)]
    Dialog(#[from] DialogError),

    #[error("Missing required '{0}' header")]
    MissingRequiredHeader(&'static str),

    #[error("the transport rejected the message")]
    Transport,
}

impl Error {
    pub(crate) fn configuration(parameter: &'static str, value: impl ToString) -> Self {
        Self::Configuration {
            parameter,
            value: value.to_string(),
        }
    }
}
