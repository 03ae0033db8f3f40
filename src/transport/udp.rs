//! UDP transport for DNS queries.
//!
//! One task owns the listening socket and receives datagrams; each datagram is
//! handled on its own spawned task so a slow upstream never holds up other
//! clients. Replies go out through the shared socket, whose `send_to` is safe
//! to call from many tasks at once.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::Error;
use crate::events::QueryLogger;
use crate::forwarder::Upstream;
use crate::resolver::{QueryAction, Resolver};

use super::MAX_DNS_PACKET_SIZE;

/// UDP transport for the DNS server.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive loop. Returns once `shutdown` is cancelled.
    ///
    /// Handlers already spawned keep running to completion; each holds its own
    /// reference to the socket for the reply.
    pub async fn run<U: Upstream>(
        self,
        resolver: Arc<Resolver<U>>,
        logger: QueryLogger,
        shutdown: CancellationToken,
    ) {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("UDP receive loop shutting down");
                    break;
                }
                result = self.socket.recv_from(&mut buf) => {
                    let (len, src) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            warn!(error = %e, "UDP recv error");
                            continue;
                        }
                    };

                    tokio::spawn(handle_query(
                        self.socket.clone(),
                        resolver.clone(),
                        logger.clone(),
                        buf[..len].to_vec(),
                        src,
                    ));
                }
            }
        }
    }
}

/// Run one query through the resolver and send the reply, if any.
async fn handle_query<U: Upstream>(
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver<U>>,
    logger: QueryLogger,
    query: Vec<u8>,
    src: SocketAddr,
) {
    let start_time = Instant::now();
    logger.request(&src.to_string());

    let action = resolver.process_query(&query).await;
    let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
    let stats = resolver.stats();

    let (domain, response) = match action {
        QueryAction::Dropped { reason } => {
            logger.error("parser", &reason);
            stats.record_dropped();
            return;
        }
        QueryAction::Blocked { response, domain } => {
            logger.blocked(&domain, elapsed_ms);
            stats.record_blocked(elapsed_ms);
            (domain, response)
        }
        QueryAction::Cached { response, domain } => {
            logger.cached(&domain, elapsed_ms);
            stats.record_cached(elapsed_ms);
            (domain, Ok(response))
        }
        QueryAction::Forwarded {
            response,
            domain,
            upstream_ms,
        } => {
            logger.forwarded(&domain, elapsed_ms, upstream_ms);
            stats.record_forwarded(elapsed_ms);
            (domain, Ok(response))
        }
        QueryAction::Failed {
            response,
            domain,
            error,
        } => {
            match error {
                Error::UpstreamTimeout(_) => logger.timeout(&domain, elapsed_ms),
                error => logger.error(&domain, &format!("forwarding failed: {error}")),
            }
            stats.record_failed(elapsed_ms);
            (domain, response)
        }
    };

    let response = match response {
        Ok(response) => response,
        Err(e) => {
            logger.error(&domain, &format!("failed to build reply: {e}"));
            return;
        }
    };
    if let Err(e) = socket.send_to(&response, src).await {
        logger.error(&domain, &format!("failed to send reply to {src}: {e}"));
    }
}
