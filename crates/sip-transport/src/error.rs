use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Transport layer errors
#[derive(Error, Debug)]
pub enum Error {
    /// Socket level failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The transport was closed
    #[error("Transport closed")]
    TransportClosed,

    /// Could not reach the destination within the allowed time
    #[error("Connection to {0} timed out")]
    ConnectionTimeout(SocketAddr),

    /// Inbound bytes were not a SIP message
    #[error("Codec error: {0}")]
    Codec(#[from] sipflow_sip_core::Error),

    /// The requested transport kind is not provided here
    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),
}

impl Error {
    /// True for failures that will not go away on retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::TransportClosed | Error::UnsupportedTransport(_))
    }
}
