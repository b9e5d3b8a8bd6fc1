//! STUN client facade
//!
//! Ties the pieces together: picks a server from the ranked pool, opens or
//! reuses a session to it, drives the retransmission engine, and feeds
//! transaction outcomes back into the pool. One client owns one transport,
//! one transaction tracker and one pool.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use stun_core::{StunAttribute, StunMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::StunClientConfig;
use crate::error::{Error, Result};
use crate::pool::ServerPool;
use crate::retransmit;
use crate::transaction::{TransactionOutcome, TransactionTracker};
use crate::transport::{Transport, TransportEvent, UdpTransport};

/// Client lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Created but not yet connected to a server
    Unconnected,
    /// Holding a session to the currently selected server
    Connected,
    /// Closed; terminal
    Closed,
}

impl std::fmt::Display for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connected => write!(f, "connected"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// An open transport-level 5-tuple
#[derive(Debug, Clone, Copy)]
struct Session {
    local: SocketAddr,
    remote: SocketAddr,
}

/// Asynchronous STUN client
///
/// Cheap to clone; clones share the transport, tracker and pool.
#[derive(Clone)]
pub struct StunClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: StunClientConfig,
    transport: Arc<dyn Transport>,
    tracker: Arc<TransactionTracker>,
    pool: ServerPool,
    state: RwLock<ClientState>,
    /// The server the next operation will target
    current_server: Mutex<SocketAddr>,
    /// At most one session per distinct remote, so repeated writes to the
    /// same server do not reconnect.
    sessions: Mutex<HashMap<SocketAddr, Session>>,
}

impl StunClient {
    /// Create a UDP client: resolves the configured servers, binds a socket
    /// and starts the receive machinery.
    pub async fn udp(config: StunClientConfig) -> Result<Self> {
        let servers = config.resolve_servers().await?;
        let bind_addr = config
            .local_addr
            .unwrap_or_else(|| "0.0.0.0:0".parse().expect("literal address"));
        let (transport, events_rx) = UdpTransport::bind(bind_addr, None).await?;
        Self::with_transport(config, servers, Arc::new(transport), events_rx)
    }

    /// Create a client over an existing transport.
    ///
    /// This is the seam tests and custom transports plug into: anything
    /// implementing [`Transport`] plus its event stream works.
    pub fn with_transport(
        config: StunClientConfig,
        servers: Vec<SocketAddr>,
        transport: Arc<dyn Transport>,
        events_rx: mpsc::Receiver<TransportEvent>,
    ) -> Result<Self> {
        let pool = ServerPool::new(servers);
        let current_server = pool.select()?;
        let tracker = Arc::new(TransactionTracker::new());
        spawn_dispatch_loop(tracker.clone(), events_rx);

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                transport,
                tracker,
                pool,
                state: RwLock::new(ClientState::Unconnected),
                current_server: Mutex::new(current_server),
                sessions: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> ClientState {
        *self.inner.state.read()
    }

    /// Connect to the currently selected server.
    ///
    /// A connect failure counts against the server and rotates selection
    /// before the error is returned, so the next attempt targets a
    /// different candidate.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_not_closed()?;
        let server = *self.inner.current_server.lock();
        match self.open_session(server).await {
            Ok(session) => {
                info!("connected to STUN server {} from {}", server, session.local);
                *self.inner.state.write() = ClientState::Connected;
                Ok(())
            }
            Err(e) => {
                self.inner.pool.record_failure(server);
                self.rotate_away_from(server);
                Err(e)
            }
        }
    }

    /// The local address this client's transport is bound to
    pub fn host_address(&self) -> Result<SocketAddr> {
        self.inner.transport.local_addr()
    }

    /// The STUN server the next operation will target
    pub fn stun_server_address(&self) -> SocketAddr {
        *self.inner.current_server.lock()
    }

    /// Snapshot of the server rankings, for diagnostics
    pub fn server_rankings(&self) -> Vec<crate::pool::RankedServer> {
        self.inner.pool.snapshot()
    }

    /// Send a binding request and await its outcome, using the configured
    /// RTO.
    ///
    /// Exhausting the retransmission budget is not an error: it comes back
    /// as [`TransactionOutcome::TimedOut`]. Errors are reserved for misuse
    /// (closed client) and session failures.
    pub async fn write(
        &self,
        request: &StunMessage,
        remote: SocketAddr,
    ) -> Result<TransactionOutcome> {
        self.write_with_rto(request, remote, self.inner.config.rto).await
    }

    /// Send a binding request with an explicit RTO. The RTO only matters on
    /// unreliable transports.
    pub async fn write_with_rto(
        &self,
        request: &StunMessage,
        remote: SocketAddr,
        rto: Duration,
    ) -> Result<TransactionOutcome> {
        self.ensure_connected()?;
        let session = self.open_session(remote).await?;
        Ok(retransmit::run_transaction(
            self.inner.transport.as_ref(),
            &self.inner.tracker,
            request,
            session.local,
            session.remote,
            rto,
        )
        .await)
    }

    /// Discover this host's server-reflexive address.
    ///
    /// Walks the pool at most once: each candidate gets one full
    /// retransmission budget, failures demote it and advance to the
    /// next-ranked server. After a success the selection also rotates, to
    /// spread load and keep scores current. Only a whole failed round is an
    /// error.
    pub async fn server_reflexive_address(&self) -> Result<SocketAddr> {
        self.ensure_connected()?;

        for _ in 0..self.inner.pool.len() {
            let server = *self.inner.current_server.lock();
            info!("requesting server reflexive address from {}", server);

            let request = self.build_binding_request();
            let outcome = self.write(&request, server).await?;

            match outcome {
                TransactionOutcome::Succeeded(response) => match response.mapped_address() {
                    Ok(addr) => {
                        self.inner.pool.record_success(server);
                        // Keep rotating even on success.
                        self.rotate_away_from(server);
                        return Ok(addr);
                    }
                    Err(e) => {
                        warn!("success response from {} without usable address: {}", server, e);
                    }
                },
                TransactionOutcome::Failed(response) => {
                    match response.error_code() {
                        Ok((code, reason)) => {
                            warn!("binding error from {}: {} {}", server, code, reason)
                        }
                        Err(_) => warn!("binding error from {} with no error code", server),
                    }
                }
                TransactionOutcome::ConnectionError => {
                    // Unlike a timeout this means the server is unusable,
                    // not that packets got lost.
                    warn!("transport error talking to {}", server);
                }
                TransactionOutcome::TimedOut => {
                    debug!("no response from {}", server);
                }
            }

            self.inner.pool.record_failure(server);
            self.rotate_away_from(server);
        }

        // Every server in the pool failed this round. Maybe we're offline.
        Err(Error::NoServersAvailable)
    }

    /// Close the client: shuts the transport down and unblocks every
    /// in-flight waiter. Terminal.
    pub async fn close(&self) -> Result<()> {
        debug!("closing STUN client");
        *self.inner.state.write() = ClientState::Closed;
        self.inner.sessions.lock().clear();
        self.inner.transport.close().await?;
        self.inner.tracker.fail_all();
        Ok(())
    }

    fn build_binding_request(&self) -> StunMessage {
        let mut request = StunMessage::binding_request();
        if let Some(software) = &self.inner.config.software {
            request.add_attribute(StunAttribute::software(software));
        }
        request
    }

    /// Open or reuse the session for `remote`. The cache holds at most one
    /// session per distinct remote address.
    async fn open_session(&self, remote: SocketAddr) -> Result<Session> {
        if let Some(session) = self.inner.sessions.lock().get(&remote) {
            debug!("reusing session {} -> {}", session.local, session.remote);
            return Ok(*session);
        }
        if self.inner.transport.is_closed() {
            return Err(Error::TransportClosed);
        }
        let session = Session {
            local: self.inner.transport.local_addr()?,
            remote,
        };
        debug!("opened session {} -> {}", session.local, session.remote);
        self.inner.sessions.lock().insert(remote, session);
        Ok(session)
    }

    /// Move selection to the best-ranked server other than `server`, when
    /// one exists. A single-server pool keeps its only candidate.
    fn rotate_away_from(&self, server: SocketAddr) {
        if let Ok(next) = self.inner.pool.select_excluding(server) {
            *self.inner.current_server.lock() = next;
        }
    }

    fn ensure_not_closed(&self) -> Result<()> {
        if self.state() == ClientState::Closed {
            return Err(Error::invalid_state("client is closed"));
        }
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        match self.state() {
            ClientState::Connected => Ok(()),
            other => Err(Error::invalid_state(format!(
                "client is {}, call connect() first",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for StunClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StunClient")
            .field("state", &self.state())
            .field("server", &self.stun_server_address())
            .finish()
    }
}

fn spawn_dispatch_loop(
    tracker: Arc<TransactionTracker>,
    mut events_rx: mpsc::Receiver<TransportEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                TransportEvent::MessageReceived { message, source, .. } => {
                    tracker.dispatch(message, source);
                }
                TransportEvent::ConnectionError { remote, error } => {
                    warn!("transport reports {} unreachable: {}", remote, error);
                    tracker.fail_remote(remote);
                }
                TransportEvent::Closed => {
                    tracker.fail_all();
                    break;
                }
            }
        }
        debug!("dispatch loop terminated");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    /// Transport stub for state-machine tests; sends vanish
    #[derive(Debug, Default)]
    struct NullTransport {
        closed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Transport for NullTransport {
        fn local_addr(&self) -> Result<SocketAddr> {
            Ok("127.0.0.1:5000".parse().unwrap())
        }

        fn is_reliable(&self) -> bool {
            false
        }

        async fn send_to(&self, _data: Bytes, _destination: SocketAddr) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, std::sync::atomic::Ordering::Relaxed);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(std::sync::atomic::Ordering::Relaxed)
        }
    }

    fn test_client() -> StunClient {
        let (_events_tx, events_rx) = mpsc::channel(8);
        StunClient::with_transport(
            StunClientConfig::default(),
            vec!["192.0.2.1:3478".parse().unwrap()],
            Arc::new(NullTransport::default()),
            events_rx,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn starts_unconnected_and_connects() {
        let client = test_client();
        assert_eq!(client.state(), ClientState::Unconnected);
        client.connect().await.unwrap();
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(
            client.host_address().unwrap(),
            "127.0.0.1:5000".parse::<SocketAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn write_before_connect_is_invalid_state() {
        let client = test_client();
        let request = StunMessage::binding_request();
        let result = client.write(&request, client.stun_server_address()).await;
        assert!(matches!(result, Err(Error::InvalidState { .. })));
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let client = test_client();
        client.connect().await.unwrap();
        client.close().await.unwrap();
        assert_eq!(client.state(), ClientState::Closed);
        assert!(matches!(
            client.connect().await,
            Err(Error::InvalidState { .. })
        ));
        let request = StunMessage::binding_request();
        assert!(matches!(
            client.write(&request, client.stun_server_address()).await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn empty_server_list_fails_construction() {
        let (_events_tx, events_rx) = mpsc::channel(8);
        let result = StunClient::with_transport(
            StunClientConfig::default(),
            Vec::new(),
            Arc::new(NullTransport::default()),
            events_rx,
        );
        assert!(matches!(result.err(), Some(Error::NoServersAvailable)));
    }

    #[tokio::test]
    async fn sessions_are_reused_per_remote() {
        let client = test_client();
        client.connect().await.unwrap();
        let remote = client.stun_server_address();
        let a = client.open_session(remote).await.unwrap();
        let b = client.open_session(remote).await.unwrap();
        assert_eq!(a.local, b.local);
        assert_eq!(client.inner.sessions.lock().len(), 1);
    }
}
