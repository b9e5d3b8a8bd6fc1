//! Transport abstraction for STUN traffic
//!
//! The transaction engine only needs three things from a transport: a way to
//! push bytes at a server, the local address it is bound to, and whether the
//! transport is reliable (which selects the retransmission policy). Inbound
//! traffic arrives as [`TransportEvent`]s on an mpsc channel handed out at
//! construction time; the client wires that channel into the transaction
//! tracker.

mod tcp;
mod udp;

pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use stun_core::StunMessage;

use crate::error::Result;

// Default inbound event channel capacity
pub(crate) const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Events emitted by a transport's receive loop
#[derive(Debug)]
pub enum TransportEvent {
    /// A well-formed STUN message arrived
    MessageReceived {
        /// The decoded message
        message: StunMessage,
        /// Peer the datagram came from
        source: SocketAddr,
        /// Local address it arrived on
        destination: SocketAddr,
    },
    /// The transport observed a delivery failure for a peer (ICMP
    /// unreachable, connection reset, ...). Transactions addressed to that
    /// peer are condemned; nothing else is affected.
    ConnectionError {
        /// The unreachable peer
        remote: SocketAddr,
        /// Description of the underlying failure
        error: String,
    },
    /// The transport shut down; no further events will arrive
    Closed,
}

/// A bidirectional STUN transport
#[async_trait::async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The local address this transport is bound to
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Whether delivery is reliable. Reliable transports get a single send
    /// and a long wait; unreliable ones get the full retransmission
    /// schedule.
    fn is_reliable(&self) -> bool;

    /// Send one encoded message to `destination`
    async fn send_to(&self, data: Bytes, destination: SocketAddr) -> Result<()>;

    /// Shut down the transport and its receive loop
    async fn close(&self) -> Result<()>;

    /// Whether `close` has been called
    fn is_closed(&self) -> bool;
}
