//! STUN client configuration

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::lookup_host;
use tracing::warn;

use crate::error::{Error, Result};
use crate::retransmit::DEFAULT_RTO;

/// The well-known STUN port
pub const DEFAULT_STUN_PORT: u16 = 3478;

/// Public STUN servers used when the caller configures none
pub const DEFAULT_SERVERS: &[&str] = &[
    "stun.l.google.com:19302",
    "stun.ekiga.net:3478",
    "stun.ideasip.com:3478",
    "stun.voipbuster.com:3478",
];

/// Configuration for a [`StunClient`](crate::StunClient)
///
/// Servers are given as `host:port` strings and resolved once, at client
/// construction. A host that does not resolve is skipped with a warning;
/// resolution fails outright only when no candidate is left at all.
#[derive(Debug, Clone)]
pub struct StunClientConfig {
    /// Candidate STUN servers as `host:port`
    pub servers: Vec<String>,
    /// Local address to bind; `None` binds an ephemeral port on all
    /// interfaces
    pub local_addr: Option<SocketAddr>,
    /// Base retransmission timeout for unreliable transports
    pub rto: Duration,
    /// Value for the SOFTWARE attribute on outgoing requests, if any
    pub software: Option<String>,
}

impl Default for StunClientConfig {
    fn default() -> Self {
        Self {
            servers: DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            local_addr: None,
            rto: DEFAULT_RTO,
            software: Some(format!("stun-client/{}", env!("CARGO_PKG_VERSION"))),
        }
    }
}

impl StunClientConfig {
    /// Replace the server list with `host:port` strings
    pub fn with_servers(mut self, servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the server list with already-resolved addresses
    pub fn with_server_addrs(mut self, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.servers = addrs.into_iter().map(|a| a.to_string()).collect();
        self
    }

    /// Bind to a specific local address instead of an ephemeral port
    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Override the base retransmission timeout
    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.rto = rto;
        self
    }

    /// Set or clear the SOFTWARE attribute value
    pub fn with_software(mut self, software: Option<String>) -> Self {
        self.software = software;
        self
    }

    /// Resolve the configured servers to socket addresses.
    ///
    /// Unresolvable hosts are recorded as absent and skipped; only an empty
    /// result is an error, since a client without a single candidate cannot
    /// do anything.
    pub async fn resolve_servers(&self) -> Result<Vec<SocketAddr>> {
        let mut resolved = Vec::with_capacity(self.servers.len());
        for server in &self.servers {
            match lookup_host(server.as_str()).await {
                Ok(mut addrs) => match addrs.next() {
                    Some(addr) => resolved.push(addr),
                    None => warn!("no addresses for STUN server {}", server),
                },
                Err(e) => {
                    warn!("could not resolve STUN server {}: {}", server, e);
                }
            }
        }
        if resolved.is_empty() {
            return Err(Error::UnknownHost {
                host: self.servers.join(", "),
            });
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_resolve_without_dns() {
        let config = StunClientConfig::default()
            .with_servers(["192.0.2.1:3478", "192.0.2.2:3478"]);
        let resolved = config.resolve_servers().await.unwrap();
        assert_eq!(resolved.len(), 2);
    }

    #[tokio::test]
    async fn unresolvable_hosts_are_skipped_not_fatal() {
        let config = StunClientConfig::default()
            .with_servers(["definitely.invalid.:3478", "192.0.2.1:3478"]);
        let resolved = config.resolve_servers().await.unwrap();
        assert_eq!(resolved, vec!["192.0.2.1:3478".parse().unwrap()]);
    }

    #[tokio::test]
    async fn no_resolvable_host_is_fatal() {
        let config = StunClientConfig::default().with_servers(["definitely.invalid.:3478"]);
        assert!(matches!(
            config.resolve_servers().await,
            Err(Error::UnknownHost { .. })
        ));
    }

    #[test]
    fn builder_overrides_apply() {
        let config = StunClientConfig::default()
            .with_rto(Duration::from_millis(50))
            .with_local_addr("127.0.0.1:5000".parse().unwrap())
            .with_software(None);
        assert_eq!(config.rto, Duration::from_millis(50));
        assert_eq!(config.local_addr, Some("127.0.0.1:5000".parse().unwrap()));
        assert!(config.software.is_none());
    }
}
