pub mod channel;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sipflow_sip_core::Message;

use crate::error::{Error, Result};

/// Transport protocol of a listening point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportKind {
    /// Reliable transports disable retransmission timers (RFC 3261 §17.1.1.2)
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportKind::Udp)
    }

    /// Token used in the Via header
    pub fn via_token(&self) -> &'static str {
        match self {
            TransportKind::Udp => "UDP",
            TransportKind::Tcp => "TCP",
            TransportKind::Tls => "TLS",
            TransportKind::Ws => "WS",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.via_token())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UDP" => Ok(TransportKind::Udp),
            "TCP" => Ok(TransportKind::Tcp),
            "TLS" => Ok(TransportKind::Tls),
            "WS" | "WSS" => Ok(TransportKind::Ws),
            other => Err(Error::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Events emitted by a transport's receive loop
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message arrived
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
        kind: TransportKind,
    },
    /// A non-fatal error, e.g. an unparseable datagram
    Error { error: String },
    /// The transport stopped receiving
    Closed,
}

/// A listening point able to send SIP messages
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn local_addr(&self) -> Result<SocketAddr>;

    fn kind(&self) -> TransportKind;

    fn is_reliable(&self) -> bool {
        self.kind().is_reliable()
    }

    /// Sends pre-encoded bytes, e.g. a cached retransmission
    async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> Result<()>;

    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<()> {
        self.send_bytes(message.to_bytes(), destination).await
    }

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
