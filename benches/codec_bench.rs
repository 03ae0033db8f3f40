//! Benchmarks for DNS message parsing and construction.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use sievedns::dns::{self, CLASS_IN, DnsRecord, TYPE_A};

fn build_dns_response() -> Vec<u8> {
    let mut response = dns::build_query("example.com").unwrap();
    response[2] = 0x81; // Response flag
    response[3] = 0x80; // Recursion available
    response[6] = 0x00; // Answer count
    response[7] = 0x02;
    for ip in [[93, 184, 216, 34], [93, 184, 216, 35]] {
        response.extend_from_slice(&[0xc0, 0x0c]); // Name pointer
        response.extend_from_slice(&[0x00, 0x01]); // Type: A
        response.extend_from_slice(&[0x00, 0x01]); // Class: IN
        response.extend_from_slice(&[0x00, 0x00, 0x01, 0x2c]); // TTL: 300
        response.extend_from_slice(&[0x00, 0x04]); // Data length: 4
        response.extend_from_slice(&ip);
    }
    response
}

fn bench_parse(c: &mut Criterion) {
    let query = dns::build_query("www.example.com").unwrap();
    let response = build_dns_response();

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));
    group.bench_function("query", |b| b.iter(|| dns::parse_query(black_box(&query))));
    group.bench_function("compressed_response", |b| {
        b.iter(|| dns::parse_response(black_box(&response)))
    });
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let (header, question) = dns::parse_query(&dns::build_query("example.com").unwrap()).unwrap();
    let answers: Vec<DnsRecord> = (0..4)
        .map(|i| DnsRecord {
            name: "example.com".to_string(),
            rtype: TYPE_A,
            class: CLASS_IN,
            ttl: 300,
            rdata: vec![10, 0, 0, i],
        })
        .collect();

    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(1));
    group.bench_function("query", |b| b.iter(|| dns::build_query(black_box("example.com"))));
    group.bench_function("cached_response", |b| {
        b.iter(|| dns::build_response(&header, &question, black_box(&answers), false, false))
    });
    group.bench_function("failure_response", |b| {
        b.iter(|| dns::build_response(&header, &question, black_box(&answers), true, true))
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_build);
criterion_main!(benches);
