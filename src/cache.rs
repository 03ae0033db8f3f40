//! DNS answer cache with TTL-based expiration.

use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dns::DnsRecord;
use crate::events::{EventEmitter, ServerEvent};

/// TTL applied to an entry stored with no records.
pub const FALLBACK_TTL: Duration = Duration::from_secs(300);

/// Interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Source of the current instant, injectable for tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    records: Vec<DnsRecord>,
    ttl: Duration,
    created_at: Instant,
    stored_at: SystemTime,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) <= self.ttl
    }
}

/// A copy of one cache entry, as published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntrySnapshot {
    pub domain: String,
    pub records: Vec<DnsRecord>,
    pub ttl: Duration,
    pub stored_at: SystemTime,
}

/// TTL-based DNS cache keyed by the domain exactly as queried.
///
/// A single mutex guards the map; request handlers and the sweeper all go
/// through it.
pub struct DnsCache {
    entries: Mutex<FxHashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
    events: EventEmitter,
}

impl DnsCache {
    pub fn new(events: EventEmitter) -> Self {
        Self::with_clock(events, Arc::new(SystemClock))
    }

    pub fn with_clock(events: EventEmitter, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(FxHashMap::default()),
            clock,
            events,
        }
    }

    fn entries(&self) -> MutexGuard<'_, FxHashMap<String, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a fresh record set, evicting the entry if it has expired.
    pub fn lookup(&self, domain: &str) -> Option<Vec<DnsRecord>> {
        let now = self.clock.now();
        let mut entries = self.entries();

        let fresh = entries.get(domain)?.is_fresh(now);
        if fresh {
            return entries.get(domain).map(|entry| entry.records.clone());
        }

        entries.remove(domain);
        debug!(domain = %domain, "evicted expired cache entry");
        self.publish(&entries);
        None
    }

    /// Store `records` under `domain`, replacing any previous entry.
    ///
    /// The entry lives for the smallest record TTL, or [`FALLBACK_TTL`] when
    /// `records` is empty.
    pub fn store(&self, domain: &str, records: Vec<DnsRecord>) {
        let ttl = records
            .iter()
            .map(|record| Duration::from_secs(u64::from(record.ttl)))
            .min()
            .unwrap_or(FALLBACK_TTL);

        let mut entries = self.entries();
        entries.insert(
            domain.to_string(),
            CacheEntry {
                records,
                ttl,
                created_at: self.clock.now(),
                stored_at: SystemTime::now(),
            },
        );
        self.publish(&entries);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries();

        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();

        if removed > 0 {
            self.publish(&entries);
        }
        removed
    }

    /// Copy out every entry currently held.
    pub fn snapshot(&self) -> Vec<CacheEntrySnapshot> {
        Self::collect_snapshot(&self.entries())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep every `interval` until `shutdown` is cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("cache sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        info!(removed, remaining = self.len(), "cache sweep completed");
                    }
                }
            }
        }
    }

    fn publish(&self, entries: &FxHashMap<String, CacheEntry>) {
        self.events
            .emit_with(|| ServerEvent::CacheSnapshot(Self::collect_snapshot(entries)));
    }

    fn collect_snapshot(entries: &FxHashMap<String, CacheEntry>) -> Vec<CacheEntrySnapshot> {
        entries
            .iter()
            .map(|(domain, entry)| CacheEntrySnapshot {
                domain: domain.clone(),
                records: entry.records.clone(),
                ttl: entry.ttl,
                stored_at: entry.stored_at,
            })
            .collect()
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new(EventEmitter::new_disabled())
    }
}
