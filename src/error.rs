//! Error types shared by every component.

use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Input bytes do not follow the DNS wire format.
    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    /// A name that cannot be written as length-prefixed labels.
    #[error("invalid domain name: {0}")]
    InvalidName(String),

    #[error("upstream did not answer within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
