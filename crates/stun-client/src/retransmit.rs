//! Retransmission engine (RFC 3489bis section 7.1)
//!
//! Drives one binding-request transaction to completion over a transport.
//! Unreliable transports get the expanding resend schedule; reliable ones
//! get a single send and a long wait, since delivery is the transport's
//! problem. Exhaustion is a returned sentinel outcome, never an error:
//! "no reply" is a normal result the server pool recovers from, unlike
//! "no network" which fails at connect time.

use std::net::SocketAddr;
use std::time::Duration;

use stun_core::StunMessage;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::transaction::{TransactionOutcome, TransactionTracker};
use crate::transport::Transport;

/// Default retransmission timeout, per RFC 3489bis section 7.1. We use this
/// value directly rather than caching RTT estimates per server.
pub const DEFAULT_RTO: Duration = Duration::from_millis(100);

/// Maximum number of requests sent for one transaction over an unreliable
/// transport
pub const MAX_REQUESTS: u32 = 7;

/// Wait after the last retransmission before declaring the transaction dead
pub const FINAL_UDP_WAIT: Duration = Duration::from_millis(1600);

/// Single-shot wait ceiling for reliable transports (RFC 3489bis section
/// 7.2.2)
pub const RELIABLE_WAIT: Duration = Duration::from_millis(7900);

/// Run one transaction to completion.
///
/// The transaction is registered with the tracker before the first send, so
/// a response racing the registration cannot be lost. Every resend carries
/// the identical bytes, transaction ID included: to the tracker all
/// retransmissions are one logical request.
pub async fn run_transaction(
    transport: &dyn Transport,
    tracker: &TransactionTracker,
    request: &StunMessage,
    local: SocketAddr,
    remote: SocketAddr,
    rto: Duration,
) -> TransactionOutcome {
    let id = request.transaction_id;
    let wire = stun_core::codec::encode(request);
    let mut outcome_rx = tracker.add_transaction(request, local, remote);

    let outcome = if transport.is_reliable() {
        send_once(transport, &mut outcome_rx, wire, remote).await
    } else {
        send_with_backoff(transport, &mut outcome_rx, wire, remote, rto).await
    };

    // A tracker-resolved outcome has already left the table; outcomes the
    // engine produced itself (timeout, failed send) have not.
    tracker.remove(&id);

    match outcome {
        Some(outcome) => outcome,
        None => {
            warn!("no response from {} for transaction {}", remote, id);
            TransactionOutcome::TimedOut
        }
    }
}

/// Unreliable policy: resend on an expanding schedule, at most
/// [`MAX_REQUESTS`] sends, then one final grace wait for a late response.
async fn send_with_backoff(
    transport: &dyn Transport,
    outcome_rx: &mut oneshot::Receiver<TransactionOutcome>,
    wire: bytes::Bytes,
    remote: SocketAddr,
    rto: Duration,
) -> Option<TransactionOutcome> {
    let mut wait_time = Duration::ZERO;
    let mut requests = 0;

    while requests < MAX_REQUESTS {
        if !wait_time.is_zero() {
            if let Some(outcome) = wait_for_outcome(outcome_rx, wait_time).await {
                return Some(outcome);
            }
        }

        debug!("sending request {}/{} to {}", requests + 1, MAX_REQUESTS, remote);
        if let Err(e) = transport.send_to(wire.clone(), remote).await {
            // The kernel already knows this peer is unreachable; treat it
            // like an ICMP error rather than retrying into a wall.
            debug!("send to {} failed: {}", remote, e);
            return Some(TransactionOutcome::ConnectionError);
        }

        wait_time = wait_time * 2 + rto;
        requests += 1;
    }

    wait_for_outcome(outcome_rx, FINAL_UDP_WAIT).await
}

/// Reliable policy: one send, one bounded wait
async fn send_once(
    transport: &dyn Transport,
    outcome_rx: &mut oneshot::Receiver<TransactionOutcome>,
    wire: bytes::Bytes,
    remote: SocketAddr,
) -> Option<TransactionOutcome> {
    if let Err(e) = transport.send_to(wire, remote).await {
        debug!("send to {} failed: {}", remote, e);
        return Some(TransactionOutcome::ConnectionError);
    }
    wait_for_outcome(outcome_rx, RELIABLE_WAIT).await
}

/// Wait up to `duration` for the tracker to resolve the transaction.
/// `None` means the wait expired with no resolution.
async fn wait_for_outcome(
    outcome_rx: &mut oneshot::Receiver<TransactionOutcome>,
    duration: Duration,
) -> Option<TransactionOutcome> {
    match timeout(duration, outcome_rx).await {
        Ok(Ok(outcome)) => Some(outcome),
        // Sender dropped: the tracker vanished underneath us (client torn
        // down); report as a connection error rather than hanging on.
        Ok(Err(_)) => Some(TransactionOutcome::ConnectionError),
        Err(_) => None,
    }
}
