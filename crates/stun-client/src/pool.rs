//! Ranked STUN server pool
//!
//! Servers are scored by observed behavior: successes minus failures, each
//! counter capped so ancient history cannot dominate. Selection always
//! returns the best-scoring server; ties break on address order so the
//! ranking is deterministic. The pool is constructed explicitly and passed
//! in — there is no process-wide server registry.

use std::net::SocketAddr;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};

/// Ceiling on each counter, bounding the influence of history
const COUNTER_CAP: u32 = 5;

/// A candidate server with its observed track record
#[derive(Debug, Clone)]
pub struct RankedServer {
    /// The server's socket address
    pub addr: SocketAddr,
    /// Capped count of successful transactions
    pub successes: u32,
    /// Capped count of failed transactions
    pub failures: u32,
}

impl RankedServer {
    fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            successes: 0,
            failures: 0,
        }
    }

    /// Ranking score: successes minus failures
    pub fn score(&self) -> i32 {
        self.successes as i32 - self.failures as i32
    }
}

/// Pool of candidate STUN servers ordered by score
#[derive(Debug, Default)]
pub struct ServerPool {
    servers: Mutex<Vec<RankedServer>>,
}

impl ServerPool {
    /// Build a pool from candidate addresses. Duplicates are collapsed.
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        let mut servers: Vec<RankedServer> = Vec::new();
        for addr in addrs {
            if !servers.iter().any(|s| s.addr == addr) {
                servers.push(RankedServer::new(addr));
            }
        }
        Self {
            servers: Mutex::new(servers),
        }
    }

    /// The best-scoring server, or [`Error::NoServersAvailable`] for an
    /// empty pool.
    pub fn select(&self) -> Result<SocketAddr> {
        let servers = self.servers.lock();
        servers
            .iter()
            .max_by(|a, b| {
                a.score()
                    .cmp(&b.score())
                    // Stable tie-break: lower address wins, so repeated
                    // selections are deterministic.
                    .then_with(|| b.addr.cmp(&a.addr))
            })
            .map(|s| s.addr)
            .ok_or(Error::NoServersAvailable)
    }

    /// The best-scoring server other than `skip`, when the caller wants to
    /// rotate away from the one it just used.
    pub fn select_excluding(&self, skip: SocketAddr) -> Result<SocketAddr> {
        let servers = self.servers.lock();
        servers
            .iter()
            .filter(|s| s.addr != skip)
            .max_by(|a, b| {
                a.score()
                    .cmp(&b.score())
                    .then_with(|| b.addr.cmp(&a.addr))
            })
            .map(|s| s.addr)
            .ok_or(Error::NoServersAvailable)
    }

    /// Record a successful transaction against `addr`
    pub fn record_success(&self, addr: SocketAddr) {
        let mut servers = self.servers.lock();
        if let Some(server) = servers.iter_mut().find(|s| s.addr == addr) {
            if server.successes < COUNTER_CAP {
                server.successes += 1;
            }
            debug!("server {} score now {}", addr, server.score());
        }
    }

    /// Record a failed transaction against `addr`, demoting it in the
    /// ranking
    pub fn record_failure(&self, addr: SocketAddr) {
        let mut servers = self.servers.lock();
        if let Some(server) = servers.iter_mut().find(|s| s.addr == addr) {
            if server.failures < COUNTER_CAP {
                server.failures += 1;
            }
            debug!("server {} score now {}", addr, server.score());
        }
    }

    /// Number of servers in the pool
    pub fn len(&self) -> usize {
        self.servers.lock().len()
    }

    /// Whether the pool has no servers
    pub fn is_empty(&self) -> bool {
        self.servers.lock().is_empty()
    }

    /// Snapshot of the current ranking, for diagnostics
    pub fn snapshot(&self) -> Vec<RankedServer> {
        self.servers.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("192.0.2.1:{}", port).parse().unwrap()
    }

    #[test]
    fn empty_pool_has_no_servers() {
        let pool = ServerPool::new([]);
        assert!(matches!(pool.select(), Err(Error::NoServersAvailable)));
    }

    #[test]
    fn duplicates_are_collapsed() {
        let pool = ServerPool::new([addr(1), addr(1), addr(2)]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn selection_is_deterministic_on_equal_scores() {
        let pool = ServerPool::new([addr(3), addr(1), addr(2)]);
        assert_eq!(pool.select().unwrap(), addr(1));
        assert_eq!(pool.select().unwrap(), addr(1));
    }

    #[test]
    fn failure_demotes_a_server() {
        let pool = ServerPool::new([addr(1), addr(2)]);
        pool.record_failure(addr(1));
        assert_eq!(pool.select().unwrap(), addr(2));
    }

    #[test]
    fn success_promotes_a_server() {
        let pool = ServerPool::new([addr(1), addr(2)]);
        pool.record_success(addr(2));
        assert_eq!(pool.select().unwrap(), addr(2));
    }

    #[test]
    fn counters_cap_at_five() {
        let pool = ServerPool::new([addr(1)]);
        for _ in 0..20 {
            pool.record_failure(addr(1));
        }
        for _ in 0..20 {
            pool.record_success(addr(1));
        }
        let server = &pool.snapshot()[0];
        assert_eq!(server.failures, 5);
        assert_eq!(server.successes, 5);
        assert_eq!(server.score(), 0);
    }

    #[test]
    fn consistently_failing_server_is_never_selected_again() {
        let pool = ServerPool::new([addr(1), addr(2), addr(3)]);
        for _ in 0..5 {
            pool.record_failure(addr(1));
            pool.record_success(addr(2));
            pool.record_success(addr(3));
        }
        for _ in 0..10 {
            let selected = pool.select().unwrap();
            assert_ne!(selected, addr(1));
            pool.record_success(selected);
        }
    }

    #[test]
    fn select_excluding_rotates_away() {
        let pool = ServerPool::new([addr(1), addr(2)]);
        pool.record_success(addr(1));
        assert_eq!(pool.select().unwrap(), addr(1));
        assert_eq!(pool.select_excluding(addr(1)).unwrap(), addr(2));
    }

    #[test]
    fn select_excluding_the_only_server_is_exhaustion() {
        let pool = ServerPool::new([addr(1)]);
        assert!(matches!(
            pool.select_excluding(addr(1)),
            Err(Error::NoServersAvailable)
        ));
    }
}
