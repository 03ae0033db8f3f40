//! Transport layer for the DNS server.
//!
//! Receives DNS queries from clients over UDP, hands them to the resolver and
//! sends back whatever reply it decides on.

pub mod udp;

pub use udp::UdpTransport;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;
