//! Upstream forwarding over UDP.

use std::future::Future;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Default time to wait for an upstream reply.
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that can answer a raw DNS query.
pub trait Upstream: Send + Sync + 'static {
    /// Send `query` and return the raw reply.
    ///
    /// Fails with [`Error::UpstreamTimeout`] when no reply arrives in time and
    /// [`Error::UpstreamUnavailable`] on socket errors.
    fn forward(&self, query: &[u8]) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Forwards queries to a single upstream resolver.
///
/// Every call binds its own ephemeral socket, so an abandoned receive never
/// leaks a late reply into a later call.
#[derive(Debug, Clone)]
pub struct UdpForwarder {
    upstream: SocketAddr,
    timeout: Duration,
}

impl UdpForwarder {
    pub fn new(upstream: SocketAddr, timeout: Duration) -> Self {
        Self { upstream, timeout }
    }

    async fn exchange(&self, query: &[u8]) -> std::io::Result<Vec<u8>> {
        let local: SocketAddr = if self.upstream.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(local).await?;
        socket.connect(self.upstream).await?;
        socket.send(query).await?;

        let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);

        Ok(buf)
    }
}

impl Upstream for UdpForwarder {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        match tokio::time::timeout(self.timeout, self.exchange(query)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(Error::UpstreamUnavailable(e)),
            Err(_) => Err(Error::UpstreamTimeout(self.timeout)),
        }
    }
}
