//! UDP transport for STUN messages

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, DEFAULT_CHANNEL_CAPACITY};

// Largest datagram we expect; STUN messages for the binding usage are far
// smaller, but leave headroom for unknown attributes.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// UDP transport: one unconnected socket shared by all sessions
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpTransportInner>,
}

struct UdpTransportInner {
    socket: UdpSocket,
    local_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl UdpTransport {
    /// Bind a UDP transport to the given local address (use port 0 for an
    /// ephemeral port) and start its receive loop.
    pub async fn bind(
        addr: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        info!("STUN UDP transport bound to {}", local_addr);

        let transport = UdpTransport {
            inner: Arc::new(UdpTransportInner {
                socket,
                local_addr,
                closed: AtomicBool::new(false),
                events_tx,
            }),
        };
        transport.spawn_receive_loop();

        Ok((transport, events_rx))
    }

    // Spawns the task that decodes inbound datagrams into events
    fn spawn_receive_loop(&self) {
        let transport = self.clone();

        tokio::spawn(async move {
            let inner = &transport.inner;
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

            while !inner.closed.load(Ordering::Relaxed) {
                match inner.socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        match stun_core::codec::decode(&buf[..len]) {
                            Ok(message) => {
                                let event = TransportEvent::MessageReceived {
                                    message,
                                    source,
                                    destination: inner.local_addr,
                                };
                                if inner.events_tx.send(event).await.is_err() {
                                    debug!("event receiver dropped, stopping UDP loop");
                                    break;
                                }
                            }
                            Err(e) => {
                                // Not fatal to anything: whatever transaction
                                // this was meant for keeps waiting.
                                warn!("dropping undecodable datagram from {}: {}", source, e);
                            }
                        }
                    }
                    Err(e) => {
                        if inner.closed.load(Ordering::Relaxed) {
                            break;
                        }
                        error!("error receiving UDP datagram: {}", e);
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("UDP receive loop terminated");
        });
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_reliable(&self) -> bool {
        false
    }

    async fn send_to(&self, data: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        debug!("sending {} bytes to {}", data.len(), destination);
        let sent = self.inner.socket.send_to(&data, destination).await?;
        if sent != data.len() {
            return Err(Error::network(format!(
                "short send to {}: {} of {} bytes",
                destination,
                sent,
                data.len()
            )));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "UdpTransport({})", self.inner.local_addr)
    }
}
