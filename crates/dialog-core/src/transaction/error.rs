use thiserror::Error;

use crate::transaction::{TransactionKey, TransactionState};

/// Result type for transaction operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction layer errors
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Missing or malformed headers, or a request builder used on the wrong kind of transaction
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// `send_request` was called twice
    #[error("Request already sent")]
    AlreadySent,

    /// I/O failure; the transaction has been terminated
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transaction timed out: {0}")]
    Timeout(String),

    /// The operation is not allowed in the current state
    #[error("Operation '{operation}' not allowed in state {state:?}")]
    InvalidState {
        state: TransactionState,
        operation: String,
    },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// The runner for the transaction is gone or its queue is full
    #[error("Concurrency error: {0}")]
    Concurrency(String),
}

impl Error {
    pub(crate) fn invalid_state(state: TransactionState, operation: impl Into<String>) -> Self {
        Error::InvalidState {
            state,
            operation: operation.into(),
        }
    }
}

impl From<sipflow_sip_core::Error> for Error {
    fn from(e: sipflow_sip_core::Error) -> Self {
        Error::Protocol(e.to_string())
    }
}

impl From<sipflow_sip_transport::Error> for Error {
    fn from(e: sipflow_sip_transport::Error) -> Self {
        Error::Transport(e.to_string())
    }
}
