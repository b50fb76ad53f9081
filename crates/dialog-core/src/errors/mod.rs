//! Error types for dialog-core
//!
//! [`DialogError`] is what application-facing operations return. Protocol
//! violations detected while filtering inbound traffic never become errors;
//! they are answered on the wire (see [`crate::routing`]).

use thiserror::Error;

use crate::dialog::DialogId;
use crate::transaction::error::Error as TransactionError;

/// Result type for dialog operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors raised by dialog and stack operations
#[derive(Error, Debug, Clone)]
pub enum DialogError {
    /// Malformed or missing headers, or an operation that is not valid for the message
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// I/O failure while sending
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// A timer expired before the expected event
    #[error("Timeout: {message}")]
    Timeout { message: String },

    /// Out-of-order CSeq or an ACK for an unknown 2xx
    #[error("Sequence error: {message}")]
    Sequence { message: String },

    /// Could not obtain the ACK gate in time
    #[error("Concurrency error: {message}")]
    Concurrency { message: String },

    #[error("Dialog not found: {id}")]
    DialogNotFound { id: String },

    #[error("Invalid dialog state: {message}")]
    InvalidState { message: String },

    /// Failure reported by the transaction layer
    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),
}

impl DialogError {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        DialogError::Protocol {
            message: message.into(),
        }
    }

    pub fn sequence_error(message: impl Into<String>) -> Self {
        DialogError::Sequence {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        DialogError::InvalidState {
            message: message.into(),
        }
    }

    pub fn concurrency_error(message: impl Into<String>) -> Self {
        DialogError::Concurrency {
            message: message.into(),
        }
    }

    pub fn not_found(id: &DialogId) -> Self {
        DialogError::DialogNotFound { id: id.to_string() }
    }
}

impl From<sipflow_sip_core::Error> for DialogError {
    fn from(e: sipflow_sip_core::Error) -> Self {
        DialogError::protocol_error(e.to_string())
    }
}

impl From<sipflow_sip_transport::Error> for DialogError {
    fn from(e: sipflow_sip_transport::Error) -> Self {
        DialogError::Transport {
            message: e.to_string(),
        }
    }
}
