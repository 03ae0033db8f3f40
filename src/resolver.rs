//! DNS query resolution logic.
//!
//! Handles the core query processing pipeline, stopping at the first step
//! that applies:
//! 1. Parse (malformed queries are dropped without a reply)
//! 2. Blacklist (refuse with a failure response)
//! 3. Cache lookup
//! 4. Forward to upstream and cache the answers
//!
//! Transports handle the actual I/O, the resolver handles decisions.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::cache::DnsCache;
use crate::dns::{self, DnsHeader, DnsQuestion};
use crate::error::{Error, Result};
use crate::filter::Blacklist;
use crate::forwarder::Upstream;
use crate::stats::Stats;

/// Outcome of processing one query.
#[derive(Debug)]
pub enum QueryAction {
    /// The query could not be parsed. No reply is sent.
    Dropped { reason: String },
    /// The domain is blacklisted; `response` is the failure response, or the
    /// error hit while building it.
    Blocked {
        response: Result<Vec<u8>>,
        domain: String,
    },
    /// Answered from the cache.
    Cached { response: Vec<u8>, domain: String },
    /// Upstream reply, relayed verbatim.
    Forwarded {
        response: Vec<u8>,
        domain: String,
        upstream_ms: f64,
    },
    /// Forwarding failed. `response` is the failure response to send, or the
    /// error hit while building it.
    Failed {
        response: Result<Vec<u8>>,
        domain: String,
        error: Error,
    },
}

/// Resolver handles DNS query processing decisions.
///
/// Owns the shared pipeline state: blacklist, cache and upstream. Transports
/// call [`Resolver::process_query`] for every datagram.
pub struct Resolver<U> {
    blacklist: Arc<Blacklist>,
    cache: Arc<DnsCache>,
    upstream: U,
    stats: Stats,
}

impl<U: Upstream> Resolver<U> {
    pub fn new(blacklist: Arc<Blacklist>, cache: Arc<DnsCache>, upstream: U) -> Self {
        Self {
            blacklist,
            cache,
            upstream,
            stats: Stats::new(),
        }
    }

    /// Process a raw DNS query and decide what to reply.
    pub async fn process_query(&self, query: &[u8]) -> QueryAction {
        let (header, question) = match dns::parse_query(query) {
            Ok(parsed) => parsed,
            Err(e) => {
                return QueryAction::Dropped {
                    reason: e.to_string(),
                };
            }
        };
        if question.domain.is_empty() {
            return QueryAction::Dropped {
                reason: "empty domain name in query".to_string(),
            };
        }
        let domain = question.domain.clone();

        // Step 1: Check blacklist
        if self.blacklist.is_blocked(&domain) {
            return QueryAction::Blocked {
                response: failure_response(&header, &question),
                domain,
            };
        }

        // Step 2: Check cache
        if let Some(records) = self.cache.lookup(&domain) {
            match dns::build_response(&header, &question, &records, false, false) {
                Ok(response) => return QueryAction::Cached { response, domain },
                Err(e) => debug!(domain = %domain, error = %e, "cached answer unusable, forwarding"),
            }
        }

        // Step 3: Forward to upstream
        let started = Instant::now();
        let reply = self.upstream.forward(query).await;
        let upstream_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = reply.and_then(|reply| {
            let (_, _, answers) = dns::parse_response(&reply)?;
            Ok((reply, answers))
        });

        match result {
            Ok((response, answers)) => {
                self.cache.store(&domain, answers);
                QueryAction::Forwarded {
                    response,
                    domain,
                    upstream_ms,
                }
            }
            Err(error) => QueryAction::Failed {
                response: failure_response(&header, &question),
                domain,
                error,
            },
        }
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn cache(&self) -> &Arc<DnsCache> {
        &self.cache
    }

    pub fn blacklist(&self) -> &Arc<Blacklist> {
        &self.blacklist
    }
}

/// Authoritative NXDOMAIN with no answers, used for blocked domains and
/// upstream failures alike.
fn failure_response(header: &DnsHeader, question: &DnsQuestion) -> Result<Vec<u8>> {
    dns::build_response(header, question, &[], true, true)
}
