//! Event fan-out for external observers.
//!
//! The core publishes a log entry per request outcome, a cache snapshot after
//! every cache mutation and a pattern snapshot after every blacklist load.
//! Publishing is fire-and-forget: with no subscribers attached nothing is
//! built or sent.

use std::fmt;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::CacheEntrySnapshot;

/// Default number of events buffered per subscriber before it starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Kind of a logged request outcome or server notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Info,
    Request,
    Blocked,
    Cached,
    Forward,
    Timeout,
    Error,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Info => "INFO",
            EventKind::Request => "REQUEST",
            EventKind::Blocked => "BLOCKED",
            EventKind::Cached => "CACHED",
            EventKind::Forward => "FORWARD",
            EventKind::Timeout => "TIMEOUT",
            EventKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub kind: EventKind,
    pub domain: String,
    pub message: String,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone)]
pub enum ServerEvent {
    Log(LogEntry),
    CacheSnapshot(Vec<CacheEntrySnapshot>),
    BlacklistSnapshot(Vec<String>),
}

/// Publishes [`ServerEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct EventEmitter {
    sender: Option<broadcast::Sender<ServerEvent>>,
}

impl EventEmitter {
    /// An emitter that drops everything and cannot be subscribed to.
    pub fn new_disabled() -> Self {
        Self { sender: None }
    }

    pub fn new_enabled(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { sender: Some(tx) }
    }

    /// Attach a new subscriber. Returns `None` on a disabled emitter.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<ServerEvent>> {
        self.sender.as_ref().map(|tx| tx.subscribe())
    }

    /// Whether anyone is currently listening.
    pub fn has_subscribers(&self) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|tx| tx.receiver_count() > 0)
    }

    pub fn emit(&self, event: ServerEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event);
        }
    }

    /// Build and publish an event only when someone is listening.
    pub fn emit_with(&self, build: impl FnOnce() -> ServerEvent) {
        if self.has_subscribers() {
            self.emit(build());
        }
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new_disabled()
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter")
            .field("enabled", &self.sender.is_some())
            .field("subscribers", &self.has_subscribers())
            .finish()
    }
}

/// Logger for DNS query outcomes.
///
/// Every line goes to `tracing` and, when subscribed, out as a
/// [`ServerEvent::Log`].
#[derive(Debug, Clone)]
pub struct QueryLogger {
    events: EventEmitter,
}

impl QueryLogger {
    pub fn new(events: EventEmitter) -> Self {
        Self { events }
    }

    pub fn log(&self, kind: EventKind, domain: &str, message: &str) {
        match kind {
            EventKind::Error | EventKind::Timeout => {
                warn!(kind = %kind, domain = %domain, "{}", message)
            }
            EventKind::Request => debug!(kind = %kind, domain = %domain, "{}", message),
            _ => info!(kind = %kind, domain = %domain, "{}", message),
        }

        self.events.emit_with(|| {
            ServerEvent::Log(LogEntry {
                kind,
                domain: domain.to_string(),
                message: message.to_string(),
                timestamp: SystemTime::now(),
            })
        });
    }

    pub fn info(&self, message: &str) {
        self.log(EventKind::Info, "system", message);
    }

    pub fn request(&self, client: &str) {
        self.log(EventKind::Request, client, "query received");
    }

    pub fn blocked(&self, domain: &str, elapsed_ms: f64) {
        self.log(
            EventKind::Blocked,
            domain,
            &format!("blacklisted total={elapsed_ms:.3}ms"),
        );
    }

    pub fn cached(&self, domain: &str, elapsed_ms: f64) {
        self.log(
            EventKind::Cached,
            domain,
            &format!("answered from cache total={elapsed_ms:.3}ms"),
        );
    }

    pub fn forwarded(&self, domain: &str, total_ms: f64, upstream_ms: f64) {
        self.log(
            EventKind::Forward,
            domain,
            &format!("forwarded total={total_ms:.3}ms upstream={upstream_ms:.3}ms"),
        );
    }

    pub fn timeout(&self, domain: &str, elapsed_ms: f64) {
        self.log(
            EventKind::Timeout,
            domain,
            &format!("upstream timed out total={elapsed_ms:.3}ms"),
        );
    }

    pub fn error(&self, domain: &str, message: &str) {
        self.log(EventKind::Error, domain, message);
    }
}
