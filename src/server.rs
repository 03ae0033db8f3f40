//! DNS server orchestration.
//!
//! Builds the components from a [`ServerConfig`], wires them together and runs
//! the UDP transport plus the background cache sweeper and stats reporter.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cache::DnsCache;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::events::{DEFAULT_EVENT_CAPACITY, EventEmitter, QueryLogger, ServerEvent};
use crate::filter::Blacklist;
use crate::forwarder::{UdpForwarder, Upstream};
use crate::resolver::Resolver;
use crate::transport::UdpTransport;

/// A caching, filtering DNS forwarder.
///
/// Owns every component; nothing is shared through globals.
pub struct Server<U = UdpForwarder> {
    config: ServerConfig,
    resolver: Arc<Resolver<U>>,
    events: EventEmitter,
    logger: QueryLogger,
}

impl Server<UdpForwarder> {
    /// Create a server forwarding to `config.upstream` over UDP.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let forwarder = UdpForwarder::new(config.upstream, config.forward_timeout);
        Self::with_upstream(config, forwarder)
    }
}

impl<U: Upstream> Server<U> {
    /// Create a server that forwards through `upstream`.
    ///
    /// Validates the configuration and loads the blacklist.
    pub fn with_upstream(config: ServerConfig, upstream: U) -> Result<Self> {
        config.validate()?;

        let events = EventEmitter::new_enabled(DEFAULT_EVENT_CAPACITY);
        let cache = Arc::new(DnsCache::new(events.clone()));
        let blacklist = Arc::new(Blacklist::new(config.blacklist.clone(), events.clone()));
        blacklist.load()?;

        let resolver = Arc::new(Resolver::new(blacklist, cache, upstream));
        let logger = QueryLogger::new(events.clone());

        Ok(Self {
            config,
            resolver,
            events,
            logger,
        })
    }

    /// Subscribe to log lines, cache snapshots and blacklist snapshots.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ServerEvent>> {
        self.events.subscribe()
    }

    /// Re-read the blacklist source. Returns the number of active patterns.
    pub fn reload_blacklist(&self) -> Result<usize> {
        let count = self.resolver.blacklist().reload()?;
        self.logger.info(&format!("blacklist reloaded ({count} patterns)"));
        Ok(count)
    }

    pub fn cache(&self) -> &Arc<DnsCache> {
        self.resolver.cache()
    }

    pub fn blacklist(&self) -> &Arc<Blacklist> {
        self.resolver.blacklist()
    }

    /// Bind the configured listen address and serve until `shutdown` is
    /// cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let transport = UdpTransport::bind(self.config.listen_addr).await?;
        self.serve(transport, shutdown).await
    }

    /// Serve queries on an already bound transport until `shutdown` is
    /// cancelled.
    pub async fn serve(&self, transport: UdpTransport, shutdown: CancellationToken) -> Result<()> {
        let local_addr = transport.local_addr()?;
        self.logger.info(&format!(
            "DNS server listening on {} ({} blacklist patterns), forwarding to {}",
            local_addr,
            self.resolver.blacklist().len(),
            self.config.upstream
        ));

        let background = shutdown.child_token();
        tokio::spawn(
            self.resolver
                .cache()
                .clone()
                .run_sweeper(self.config.sweep_interval, background.clone()),
        );
        if let Some(interval) = self.config.stats_interval {
            tokio::spawn(report_stats(
                self.resolver.clone(),
                interval,
                background.clone(),
            ));
        }

        transport
            .run(self.resolver.clone(), self.logger.clone(), shutdown)
            .await;

        background.cancel();
        self.logger.info("DNS server stopped");
        Ok(())
    }
}

/// Log request statistics every `interval`.
async fn report_stats<U: Upstream>(
    resolver: Arc<Resolver<U>>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let stats = resolver.stats().snapshot_and_reset();
                info!(
                    uptime_secs = stats.uptime_secs,
                    cache = resolver.cache().len(),
                    requests = stats.requests,
                    forwarded = stats.forwarded,
                    cached = stats.cached,
                    blocked = stats.blocked,
                    failed = stats.failed,
                    dropped = stats.dropped,
                    avg_response_ms = stats.avg_response_ms,
                    "stats"
                );
            }
        }
    }
}
