//! End-to-end tests: a real UDP listener, real clients and a fake upstream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use sievedns::dns::{self, CLASS_IN, DnsRecord, TYPE_A};
use sievedns::events::ServerEvent;
use sievedns::filter::PatternSource;
use sievedns::forwarder::{UdpForwarder, Upstream};
use sievedns::transport::UdpTransport;
use sievedns::{Error, Result, Server, ServerConfig};

const MAX_DNS_PACKET_SIZE: usize = 4096;
const CLIENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build the reply the fake upstreams give: one A record for the question.
fn answer_for(query: &[u8], ttl: u32) -> Result<Vec<u8>> {
    let (header, question) = dns::parse_query(query)?;
    let record = DnsRecord {
        name: question.domain.clone(),
        rtype: TYPE_A,
        class: CLASS_IN,
        ttl,
        rdata: vec![93, 184, 216, 34],
    };
    dns::build_response(&header, &question, &[record], false, false)
}

/// In-process upstream that counts calls and can stall on request.
#[derive(Clone)]
struct CountingUpstream {
    calls: Arc<AtomicUsize>,
    ttl: u32,
    delay_for: Option<(&'static str, Duration)>,
}

impl CountingUpstream {
    fn new(ttl: u32) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            ttl,
            delay_for: None,
        }
    }

    fn slow_for(mut self, domain: &'static str, delay: Duration) -> Self {
        self.delay_for = Some((domain, delay));
        self
    }
}

impl Upstream for CountingUpstream {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (_, question) = dns::parse_query(query)?;
        if let Some((domain, delay)) = self.delay_for {
            if question.domain == domain {
                tokio::time::sleep(delay).await;
            }
        }
        answer_for(query, self.ttl)
    }
}

/// Mock UDP upstream answering every query with one A record.
async fn spawn_udp_upstream(ttl: u32) -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    tokio::spawn(async move {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
        loop {
            if let Ok((len, src)) = socket.recv_from(&mut buf).await {
                counter.fetch_add(1, Ordering::SeqCst);
                if let Ok(reply) = answer_for(&buf[..len], ttl) {
                    let _ = socket.send_to(&reply, src).await;
                }
            }
        }
    });

    (addr, calls)
}

fn test_config(upstream: SocketAddr) -> ServerConfig {
    ServerConfig::new("127.0.0.1:0".parse().unwrap(), upstream)
        .with_blacklist(PatternSource::Inline("# test list\nblocked.*\n".to_string()))
        .with_stats_interval(None)
}

struct Running<U> {
    server: Arc<Server<U>>,
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

async fn start<U: Upstream>(server: Server<U>) -> Running<U> {
    let server = Arc::new(server);
    let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = transport.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let handle = tokio::spawn({
        let server = server.clone();
        let shutdown = shutdown.clone();
        async move { server.serve(transport, shutdown).await }
    });

    Running {
        server,
        addr,
        shutdown,
        handle,
    }
}

/// Send `query` from a fresh client socket and wait for one reply.
async fn exchange(server: SocketAddr, query: &[u8]) -> Option<Vec<u8>> {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.send_to(query, server).await.unwrap();

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    match tokio::time::timeout(CLIENT_TIMEOUT, client.recv_from(&mut buf)).await {
        Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
        _ => None,
    }
}

fn assert_failure_reply(reply: &[u8], query: &[u8]) {
    let (header, questions, answers) = dns::parse_response(reply).unwrap();
    assert_eq!(&reply[..2], &query[..2]);
    assert!(header.is_response);
    assert!(header.authoritative);
    assert_eq!(header.response_code, 3);
    assert_eq!(header.answer_count, 0);
    assert!(answers.is_empty());
    assert_eq!(questions.len(), 1);
}

#[tokio::test]
async fn forwards_caches_and_serves_from_cache() {
    let (upstream, calls) = spawn_udp_upstream(120).await;
    let running = start(Server::new(test_config(upstream)).unwrap()).await;

    let query = dns::build_query("good.com").unwrap();
    let reply = exchange(running.addr, &query).await.expect("no reply");

    // Relayed verbatim: identical to what the upstream produced.
    assert_eq!(reply, answer_for(&query, 120).unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let cached = running.server.cache().lookup("good.com").unwrap();
    assert_eq!(cached.len(), 1);
    assert_eq!(cached[0].ttl, 120);

    let second = dns::build_query("good.com").unwrap();
    let reply = exchange(running.addr, &second).await.expect("no reply");
    let (header, questions, answers) = dns::parse_response(&reply).unwrap();

    assert_eq!(&reply[..2], &second[..2]);
    assert!(!header.authoritative);
    assert_eq!(header.response_code, 0);
    assert_eq!(questions[0].domain, "good.com");
    assert_eq!(answers, cached);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn blacklisted_domain_is_refused_without_forwarding() {
    let upstream = CountingUpstream::new(60);
    let server = Server::with_upstream(
        test_config("127.0.0.1:53".parse().unwrap()),
        upstream.clone(),
    )
    .unwrap();
    let running = start(server).await;

    let query = dns::build_query("blocked.test").unwrap();
    let reply = exchange(running.addr, &query).await.expect("no reply");

    assert_failure_reply(&reply, &query);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    assert!(running.server.cache().is_empty());

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn upstream_timeout_yields_failure_and_no_cache_entry() {
    // Bound but never read, so every forward times out.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let config = test_config(silent.local_addr().unwrap())
        .with_forward_timeout(Duration::from_millis(200));
    let running = start(Server::new(config).unwrap()).await;

    let query = dns::build_query("slow.example").unwrap();
    let reply = exchange(running.addr, &query).await.expect("no reply");

    assert_failure_reply(&reply, &query);
    assert!(running.server.cache().lookup("slow.example").is_none());
    assert!(running.server.cache().is_empty());

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn malformed_query_gets_no_reply() {
    let upstream = CountingUpstream::new(60);
    let running = start(
        Server::with_upstream(test_config("127.0.0.1:53".parse().unwrap()), upstream.clone())
            .unwrap(),
    )
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&[0x12, 0x34, 0x01, 0x00, 0x00], running.addr)
        .await
        .unwrap();

    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];
    let reply = tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buf)).await;
    assert!(reply.is_err(), "malformed query must not be answered");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);

    // The listener is still serving afterwards.
    let query = dns::build_query("after.com").unwrap();
    assert!(exchange(running.addr, &query).await.is_some());

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn slow_forward_does_not_block_other_clients() {
    let upstream =
        CountingUpstream::new(60).slow_for("slow.com", Duration::from_millis(500));
    let running = start(
        Server::with_upstream(test_config("127.0.0.1:53".parse().unwrap()), upstream.clone())
            .unwrap(),
    )
    .await;
    let addr = running.addr;

    let slow = tokio::spawn(async move {
        let query = dns::build_query("slow.com").unwrap();
        exchange(addr, &query).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = tokio::time::Instant::now();
    let domains = ["a.com", "b.com", "c.com", "blocked.test"];
    let replies = join_all(domains.iter().map(|domain| async move {
        let query = dns::build_query(domain).unwrap();
        exchange(addr, &query).await
    }))
    .await;

    assert!(replies.iter().all(Option::is_some));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert!(slow.await.unwrap().is_some());

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn subscribers_see_cache_and_log_events() {
    let upstream = CountingUpstream::new(300);
    let server =
        Server::with_upstream(test_config("127.0.0.1:53".parse().unwrap()), upstream).unwrap();
    let mut events = server.subscribe().unwrap();
    let running = start(server).await;

    let query = dns::build_query("watched.com").unwrap();
    exchange(running.addr, &query).await.expect("no reply");

    let mut saw_snapshot = false;
    let mut saw_forward_log = false;
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        match event {
            ServerEvent::CacheSnapshot(entries) => {
                saw_snapshot |= entries.iter().any(|e| e.domain == "watched.com");
            }
            ServerEvent::Log(entry) => {
                saw_forward_log |= entry.domain == "watched.com";
            }
            ServerEvent::BlacklistSnapshot(_) => {}
        }
    }

    assert!(saw_snapshot);
    assert!(saw_forward_log);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn reload_swaps_blacklist_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("blacklist.txt");
    std::fs::write(&path, "blocked.*\n").unwrap();

    let upstream = CountingUpstream::new(60);
    let config = test_config("127.0.0.1:53".parse().unwrap()).with_blacklist_file(&path);
    let running = start(Server::with_upstream(config, upstream.clone()).unwrap()).await;

    let query = dns::build_query("ads.net").unwrap();
    let reply = exchange(running.addr, &query).await.expect("no reply");
    assert_eq!(dns::parse_response(&reply).unwrap().0.response_code, 0);

    std::fs::write(&path, "*.net\n").unwrap();
    assert_eq!(running.server.reload_blacklist().unwrap(), 1);

    let query = dns::build_query("tracker.net").unwrap();
    let reply = exchange(running.addr, &query).await.expect("no reply");
    assert_failure_reply(&reply, &query);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);

    running.shutdown.cancel();
    running.handle.await.unwrap().unwrap();
}

#[test]
fn invalid_configuration_refuses_to_start() {
    let config = ServerConfig::new(
        "127.0.0.1:0".parse().unwrap(),
        "127.0.0.1:53".parse().unwrap(),
    )
    .with_forward_timeout(Duration::ZERO);

    let forwarder = UdpForwarder::new("127.0.0.1:53".parse().unwrap(), Duration::ZERO);
    assert!(matches!(
        Server::with_upstream(config, forwarder),
        Err(Error::Config(_))
    ));
}
