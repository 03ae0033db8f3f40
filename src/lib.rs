//! sievedns - a caching, blacklist-filtering DNS forwarder.
//!
//! Queries arrive over UDP and go through a fixed pipeline: blacklisted
//! domains are refused, fresh cached answers are served locally, and
//! everything else is forwarded to a single upstream resolver whose answers
//! are cached for their TTL.

pub mod cache;
pub mod config;
pub mod dns;
pub mod error;
pub mod events;
pub mod filter;
pub mod forwarder;
pub mod resolver;
pub mod server;
pub mod stats;
pub mod transport;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use server::Server;
