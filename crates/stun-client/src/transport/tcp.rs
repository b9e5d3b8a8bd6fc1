//! TCP transport for STUN messages
//!
//! Over a stream the STUN header itself is the framing: each message declares
//! its body length, so the read loop pulls a 20-byte header, then exactly the
//! declared remainder. TCP is reliable, which switches the transaction engine
//! to its single-shot policy.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use stun_core::HEADER_SIZE;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent, DEFAULT_CHANNEL_CAPACITY};

/// TCP transport: a single connected stream to one STUN server
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<TcpTransportInner>,
}

struct TcpTransportInner {
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    closed: AtomicBool,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TcpTransport {
    /// Connect to a STUN server over TCP and start the framed read loop
    pub async fn connect(
        remote: SocketAddr,
        channel_capacity: Option<usize>,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let capacity = channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::channel(capacity);

        let stream = TcpStream::connect(remote).await?;
        let local_addr = stream.local_addr()?;
        info!("STUN TCP transport connected {} -> {}", local_addr, remote);

        let (read_half, write_half) = stream.into_split();
        let transport = TcpTransport {
            inner: Arc::new(TcpTransportInner {
                write_half: Mutex::new(write_half),
                local_addr,
                remote_addr: remote,
                closed: AtomicBool::new(false),
                events_tx,
            }),
        };
        transport.spawn_read_loop(read_half);

        Ok((transport, events_rx))
    }

    fn spawn_read_loop(&self, mut read_half: tokio::net::tcp::OwnedReadHalf) {
        let transport = self.clone();

        tokio::spawn(async move {
            let inner = &transport.inner;

            while !inner.closed.load(Ordering::Relaxed) {
                let mut header = [0u8; HEADER_SIZE];
                if let Err(e) = read_half.read_exact(&mut header).await {
                    transport.report_read_failure(e).await;
                    break;
                }

                let total = match stun_core::codec::framed_len(&header) {
                    Ok(total) => total,
                    Err(e) => {
                        // A framing error on a stream is unrecoverable: we
                        // no longer know where the next message starts.
                        warn!("unframeable STUN header from {}: {}", inner.remote_addr, e);
                        transport.emit_connection_error(e.to_string()).await;
                        break;
                    }
                };

                let mut message = vec![0u8; total];
                message[..HEADER_SIZE].copy_from_slice(&header);
                if let Err(e) = read_half.read_exact(&mut message[HEADER_SIZE..]).await {
                    transport.report_read_failure(e).await;
                    break;
                }

                match stun_core::codec::decode(&message) {
                    Ok(decoded) => {
                        let event = TransportEvent::MessageReceived {
                            message: decoded,
                            source: inner.remote_addr,
                            destination: inner.local_addr,
                        };
                        if inner.events_tx.send(event).await.is_err() {
                            debug!("event receiver dropped, stopping TCP loop");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("dropping undecodable message from {}: {}", inner.remote_addr, e);
                    }
                }
            }

            let _ = inner.events_tx.send(TransportEvent::Closed).await;
            info!("TCP read loop for {} terminated", inner.remote_addr);
        });
    }

    async fn report_read_failure(&self, e: std::io::Error) {
        if !self.inner.closed.load(Ordering::Relaxed) {
            debug!("TCP read from {} failed: {}", self.inner.remote_addr, e);
            self.emit_connection_error(e.to_string()).await;
        }
    }

    async fn emit_connection_error(&self, error: String) {
        let _ = self
            .inner
            .events_tx
            .send(TransportEvent::ConnectionError {
                remote: self.inner.remote_addr,
                error,
            })
            .await;
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr)
    }

    fn is_reliable(&self) -> bool {
        true
    }

    async fn send_to(&self, data: Bytes, destination: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        if destination != self.inner.remote_addr {
            return Err(Error::network(format!(
                "TCP transport is connected to {}, not {}",
                self.inner.remote_addr, destination
            )));
        }
        let mut write_half = self.inner.write_half.lock().await;
        write_half.write_all(&data).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::Relaxed);
        let mut write_half = self.inner.write_half.lock().await;
        let _ = write_half.shutdown().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TcpTransport({} -> {})",
            self.inner.local_addr, self.inner.remote_addr
        )
    }
}
