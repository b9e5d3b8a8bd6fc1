//! Asynchronous STUN client (RFC 5389 binding usage).
//!
//! Discovers a host's server-reflexive address — the address a NAT maps its
//! traffic to, as seen by a public STUN server — for ICE candidate
//! gathering and NAT traversal.
//!
//! The moving parts:
//!
//! - [`transaction::TransactionTracker`] — correlates inbound responses
//!   with pending requests by transaction ID, resolving each at most once.
//! - [`retransmit`] — drives a request over an unreliable transport with
//!   the RFC 3489bis expanding backoff, or a single shot over a reliable
//!   one.
//! - [`pool::ServerPool`] — ranks candidate servers by observed
//!   success/failure and rotates away from unreliable ones.
//! - [`transport`] — the [`Transport`](transport::Transport) trait plus UDP
//!   and TCP implementations.
//! - [`StunClient`] — the facade: `connect`, `write`,
//!   `server_reflexive_address`, `close`.
//!
//! # Example
//!
//! ```no_run
//! use stun_client::{StunClient, StunClientConfig};
//!
//! # async fn example() -> stun_client::Result<()> {
//! let client = StunClient::udp(StunClientConfig::default()).await?;
//! client.connect().await?;
//! let reflexive = client.server_reflexive_address().await?;
//! println!("public address: {}", reflexive);
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod pool;
pub mod retransmit;
pub mod transaction;
pub mod transport;

pub use client::{ClientState, StunClient};
pub use config::{StunClientConfig, DEFAULT_SERVERS, DEFAULT_STUN_PORT};
pub use error::{Error, Result};
pub use pool::{RankedServer, ServerPool};
pub use transaction::{TransactionOutcome, TransactionTracker};
pub use transport::{TcpTransport, Transport, TransportEvent, UdpTransport};

// Re-export the protocol layer so callers need only one import
pub use stun_core::{StunAttribute, StunAttributeType, StunMessage, StunMessageType, TransactionId};
