//! SIP transport layer for sipflow
//!
//! Transports turn [`Message`](sipflow_sip_core::Message)s into bytes on a
//! socket and report inbound traffic as [`TransportEvent`]s on an mpsc
//! channel. [`UdpTransport`] is the production transport; [`ChannelTransport`]
//! wires two endpoints together in memory.

pub mod error;
pub mod transport;


pub use error::{Error, Result};
pub use transport::channel::ChannelTransport;
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent, TransportKind};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

pub mod prelude {
    pub use crate::{
        bind_udp, ChannelTransport, Error, Result, Transport, TransportEvent, TransportKind,
        UdpTransport,
    };
}
