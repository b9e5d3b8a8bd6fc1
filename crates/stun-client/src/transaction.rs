//! Transaction tracking: correlating responses with pending requests
//!
//! Every outgoing binding request is registered here before its first send,
//! keyed by transaction ID. The transport receive loop hands decoded inbound
//! messages (and synthetic connection errors) to the tracker, which resolves
//! the matching waiter exactly once. Retransmission means duplicate responses
//! for already-resolved IDs are routine; they are dropped quietly.

use std::net::SocketAddr;

use dashmap::DashMap;
use stun_core::{StunMessage, StunMessageType, TransactionId};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Terminal result of a single STUN transaction.
///
/// `ConnectionError` and `TimedOut` never existed on the wire: the first is
/// the synthetic outcome for a transport delivery failure (e.g. ICMP
/// unreachable), the second the sentinel for an exhausted retransmission
/// budget. Both flow through the same dispatch path as real responses so
/// callers handle all failures uniformly.
#[derive(Debug)]
pub enum TransactionOutcome {
    /// A binding success response arrived
    Succeeded(StunMessage),
    /// A binding error response arrived
    Failed(StunMessage),
    /// The transport reported a delivery failure for the target server
    ConnectionError,
    /// No response within the retry budget
    TimedOut,
}

impl TransactionOutcome {
    /// Whether this outcome carries a success response
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// The wire message behind this outcome, if there was one
    pub fn message(&self) -> Option<&StunMessage> {
        match self {
            Self::Succeeded(m) | Self::Failed(m) => Some(m),
            Self::ConnectionError | Self::TimedOut => None,
        }
    }
}

struct PendingTransaction {
    outcome_tx: oneshot::Sender<TransactionOutcome>,
    local: SocketAddr,
    remote: SocketAddr,
}

/// Concurrent table of in-flight transactions.
///
/// Registration happens on the sending path, resolution on the transport's
/// receive task. The per-entry locking of the underlying map keeps unrelated
/// transactions from serializing on each other.
#[derive(Default)]
pub struct TransactionTracker {
    table: DashMap<TransactionId, PendingTransaction>,
}

impl TransactionTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self {
            table: DashMap::new(),
        }
    }

    /// Register a transaction before its request is first sent.
    ///
    /// Registering first closes the race with a fast response: even if the
    /// response is dispatched before the sender starts waiting, the oneshot
    /// channel holds the outcome until the receiver polls it.
    pub fn add_transaction(
        &self,
        request: &StunMessage,
        local: SocketAddr,
        remote: SocketAddr,
    ) -> oneshot::Receiver<TransactionOutcome> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let id = request.transaction_id;
        trace!("tracking transaction {} -> {}", id, remote);
        let previous = self.table.insert(
            id,
            PendingTransaction {
                outcome_tx,
                local,
                remote,
            },
        );
        if previous.is_some() {
            // 96 random bits colliding means a broken ID source, not luck.
            warn!("transaction ID collision on {}", id);
        }
        outcome_rx
    }

    /// Dispatch an inbound message to the transaction that is waiting on it.
    ///
    /// Unmatched messages are dropped at trace level: with retransmission in
    /// play, late duplicates for resolved transactions are expected and are
    /// not an error condition.
    pub fn dispatch(&self, message: StunMessage, source: SocketAddr) {
        let id = message.transaction_id;
        match message.msg_type {
            StunMessageType::BindingSuccessResponse => {
                self.resolve(id, TransactionOutcome::Succeeded(message));
            }
            StunMessageType::BindingErrorResponse => {
                self.resolve(id, TransactionOutcome::Failed(message));
            }
            StunMessageType::BindingRequest => {
                // A client should never be asked to answer bindings.
                warn!("dropping binding request from {}", source);
            }
            StunMessageType::Other { class, method } => {
                debug!(
                    "dropping unsupported message from {} (class {}, method 0x{:03x})",
                    source, class, method
                );
            }
        }
    }

    /// Resolve every pending transaction addressed to `remote` with a
    /// connection error. Invoked when the transport reports a delivery
    /// failure, which condemns all traffic to that server at once.
    pub fn fail_remote(&self, remote: SocketAddr) {
        let condemned: Vec<TransactionId> = self
            .table
            .iter()
            .filter(|entry| entry.remote == remote)
            .map(|entry| *entry.key())
            .collect();
        for id in condemned {
            debug!("failing transaction {} after transport error on {}", id, remote);
            self.resolve(id, TransactionOutcome::ConnectionError);
        }
    }

    /// Resolve every pending transaction with a connection error. Invoked on
    /// close so no waiter is left to ride out its full timeout schedule.
    pub fn fail_all(&self) {
        let all: Vec<TransactionId> = self.table.iter().map(|entry| *entry.key()).collect();
        for id in all {
            self.resolve(id, TransactionOutcome::ConnectionError);
        }
    }

    /// Drop a transaction the engine has given up on
    pub fn remove(&self, id: &TransactionId) {
        self.table.remove(id);
    }

    /// Number of transactions currently in flight
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no transactions are in flight
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// First resolution wins: removing the entry is the linearization point,
    /// so concurrent duplicates find nothing and fall through.
    fn resolve(&self, id: TransactionId, outcome: TransactionOutcome) {
        match self.table.remove(&id) {
            Some((_, pending)) => {
                trace!(
                    "resolving transaction {} ({} -> {})",
                    id,
                    pending.local,
                    pending.remote
                );
                // The waiter may already have timed out and dropped its
                // receiver; that is not an error.
                let _ = pending.outcome_tx.send(outcome);
            }
            None => {
                trace!("no transaction matches {}, dropping", id);
            }
        }
    }
}
