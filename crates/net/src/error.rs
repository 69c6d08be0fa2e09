//! Serving core errors.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// An error occurring in the serving core.
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The listen address is held by another process. Usually another
    /// master instance that has not fully shut down yet.
    #[error("address {0} is already in use")]
    BindInUse(SocketAddr),

    /// Any other failure to bind the listen address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: io::Error,
    },
}
