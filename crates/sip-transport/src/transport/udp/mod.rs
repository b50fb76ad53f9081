use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, TransportKind};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65_535;

/// UDP transport for SIP messages
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    closed: AtomicBool,
    close_tx: watch::Sender<bool>,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Binds a UDP socket and starts its receive loop
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr).await?;
        info!("SIP UDP transport bound to {}", socket.local_addr()?);

        let (close_tx, _) = watch::channel(false);
        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                closed: AtomicBool::new(false),
                close_tx,
                events_tx,
            }),
        };

        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    fn spawn_receive_loop(&self) {
        let transport = self.clone();
        let mut close_rx = self.inner.close_tx.subscribe();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let local_addr = match inner.socket.local_addr() {
                Ok(addr) => addr,
                Err(e) => {
                    error!("UDP socket has no local address: {}", e);
                    return;
                }
            };
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                let (len, source) = tokio::select! {
                    _ = close_rx.changed() => break,
                    received = inner.socket.recv_from(&mut buf) => match received {
                        Ok(r) => r,
                        Err(e) => {
                            if inner.closed.load(Ordering::Relaxed) {
                                break;
                            }
                            error!("Error receiving UDP packet: {}", e);
                            let _ = inner
                                .events_tx
                                .send(TransportEvent::Error {
                                    error: format!("Error receiving packet: {}", e),
                                })
                                .await;
                            continue;
                        }
                    },
                };

                let packet = &buf[..len];
                // CRLF keep-alives (RFC 5626 §3.5.1)
                if packet.iter().all(|b| matches!(b, b'\r' | b'\n')) {
                    trace!("Keep-alive from {}", source);
                    continue;
                }

                match sipflow_sip_core::parse_message(packet) {
                    Ok(message) => {
                        debug!("Received {} from {}", message.short_description(), source);
                        let event = TransportEvent::MessageReceived {
                            message,
                            source,
                            destination: local_addr,
                            kind: TransportKind::Udp,
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            debug!("Event receiver dropped, stopping UDP receive loop");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Error parsing SIP message from {}: {}", source, e);
                        let _ = inner
                            .events_tx
                            .send(TransportEvent::Error {
                                error: format!("Error parsing SIP message: {}", e),
                            })
                            .await;
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.socket.local_addr()?)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    async fn send_bytes(&self, bytes: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        debug!("Sending {} byte message to {}", bytes.len(), destination);
        self.inner.socket.send_to(&bytes, destination).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        let _ = self.inner.close_tx.send(true);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.socket.local_addr() {
            Ok(addr) => write!(f, "UdpTransport({})", addr),
            Err(_) => write!(f, "UdpTransport(<e>)"),
        }
    }
}
