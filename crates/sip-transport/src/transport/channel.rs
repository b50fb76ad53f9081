//! In-memory point-to-point transport.
//!
//! Two [`ChannelTransport`]s created by [`ChannelTransport::pair`] form a wire:
//! whatever one side sends is encoded, decoded again and delivered as a
//! [`TransportEvent::MessageReceived`] to the other side.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportKind};

/// One end of an in-memory wire
#[derive(Clone)]
pub struct ChannelTransport {
    local: SocketAddr,
    kind: TransportKind,
    peer_tx: mpsc::Sender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl ChannelTransport {
    /// Creates both ends of a wire. Each end comes with the receiver on which
    /// it observes the other end's messages.
    pub fn pair(
        a: SocketAddr,
        b: SocketAddr,
        kind: TransportKind,
        capacity: usize,
    ) -> (
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
        (ChannelTransport, mpsc::Receiver<TransportEvent>),
    ) {
        let (a_tx, a_rx) = mpsc::channel(capacity);
        let (b_tx, b_rx) = mpsc::channel(capacity);
        let end_a = ChannelTransport {
            local: a,
            kind,
            peer_tx: b_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        let end_b = ChannelTransport {
            local: b,
            kind,
            peer_tx: a_tx,
            closed: Arc::new(AtomicBool::new(false)),
        };
        ((end_a, a_rx), (end_b, b_rx))
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        let message = sipflow_sip_core::parse_message(&bytes)?;
        trace!("{} -> {}: {}", self.local, destination, message.short_description());
        self.peer_tx
            .send(TransportEvent::MessageReceived {
                message,
                source: self.local,
                destination,
                kind: self.kind,
            })
            .await
            .map_err(|_| Error::TransportClosed)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closing channel transport {}", self.local);
            let _ = self.peer_tx.send(TransportEvent::Closed).await;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelTransport({}, {})", self.local, self.kind)
    }
}
