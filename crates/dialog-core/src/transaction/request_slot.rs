//! Original request storage with eviction
//!
//! A transaction keeps its request in wire form for retransmission. The parsed
//! form is dropped once the transaction reaches Completed or Terminated and is
//! re-parsed from the bytes only if something asks for it again.

use bytes::Bytes;
use sipflow_sip_core::{parse_message, Message, Request};

use crate::transaction::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RequestSlot {
    bytes: Bytes,
    parsed: Option<Request>,
}

impl RequestSlot {
    pub fn new(request: Request) -> Self {
        Self {
            bytes: request.to_bytes(),
            parsed: Some(request),
        }
    }

    /// Wire form, used for retransmissions
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    /// Parsed form, re-materialized from the bytes after an eviction
    pub fn request(&mut self) -> Result<Request> {
        if let Some(request) = &self.parsed {
            return Ok(request.clone());
        }
        match parse_message(&self.bytes)? {
            Message::Request(request) => {
                self.parsed = Some(request.clone());
                Ok(request)
            }
            Message::Response(_) => Err(Error::Protocol(
                "stored request bytes decode to a response".to_string(),
            )),
        }
    }

    /// Drops the parsed form, keeping only the bytes
    pub fn evict(&mut self) {
        self.parsed = None;
    }

    pub fn is_evicted(&self) -> bool {
        self.parsed.is_none()
    }
}
