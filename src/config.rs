//! Server configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::DEFAULT_SWEEP_INTERVAL;
use crate::error::{Error, Result};
use crate::filter::PatternSource;
use crate::forwarder::DEFAULT_FORWARD_TIMEOUT;

pub const DEFAULT_DNS_PORT: u16 = 53;
pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the DNS server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Local address to listen on (e.g. 0.0.0.0:53)
    pub listen_addr: SocketAddr,
    /// Upstream resolver queries are forwarded to
    pub upstream: SocketAddr,
    /// Where blacklist patterns are read from
    pub blacklist: PatternSource,
    pub forward_timeout: Duration,
    pub sweep_interval: Duration,
    /// How often to log request statistics; `None` disables the report
    pub stats_interval: Option<Duration>,
}

impl ServerConfig {
    /// Configuration with default timings and an empty blacklist.
    pub fn new(listen_addr: SocketAddr, upstream: SocketAddr) -> Self {
        Self {
            listen_addr,
            upstream,
            blacklist: PatternSource::Inline(String::new()),
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            stats_interval: Some(DEFAULT_STATS_INTERVAL),
        }
    }

    /// Build a configuration from command-line style strings.
    ///
    /// `upstream` is either `ip` (port 53 implied) or `ip:port`.
    pub fn parse(bind: &str, port: u16, upstream: &str) -> Result<Self> {
        if port == 0 {
            return Err(Error::Config("listen port must be between 1 and 65535".into()));
        }
        let bind: IpAddr = bind
            .parse()
            .map_err(|_| Error::Config(format!("invalid bind address: {bind}")))?;

        Ok(Self::new(SocketAddr::new(bind, port), parse_upstream(upstream)?))
    }

    pub fn with_blacklist_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.blacklist = PatternSource::File(path.into());
        self
    }

    pub fn with_blacklist(mut self, source: PatternSource) -> Self {
        self.blacklist = source;
        self
    }

    pub fn with_forward_timeout(mut self, timeout: Duration) -> Self {
        self.forward_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.upstream.port() == 0 {
            return Err(Error::Config(format!(
                "invalid upstream address: {}",
                self.upstream
            )));
        }
        if self.forward_timeout.is_zero() {
            return Err(Error::Config("forward timeout must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("cache sweep interval must be non-zero".into()));
        }
        if self.stats_interval.is_some_and(|i| i.is_zero()) {
            return Err(Error::Config("stats interval must be non-zero".into()));
        }
        Ok(())
    }
}

/// Parse `ip` or `ip:port`, defaulting to port 53.
pub fn parse_upstream(upstream: &str) -> Result<SocketAddr> {
    if let Ok(addr) = upstream.parse::<SocketAddr>() {
        return Ok(addr);
    }
    upstream
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, DEFAULT_DNS_PORT))
        .map_err(|_| Error::Config(format!("invalid upstream address: {upstream}")))
}
