//! Error types for the SIP message model

use thiserror::Error;

/// Result type for sip-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building, parsing or inspecting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The wire text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// A header required by the operation is absent
    #[error("Missing header: {0}")]
    MissingHeader(String),

    /// A header is present but its value is malformed
    #[error("Invalid {name} header: {reason}")]
    InvalidHeader {
        /// Header name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// Unknown or malformed request method
    #[error("Invalid method: {0}")]
    InvalidMethod(String),

    /// Status code outside 100..=699
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// Malformed URI
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
}

impl Error {
    pub(crate) fn invalid_header(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidHeader {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
