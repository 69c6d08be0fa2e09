use thiserror::Error;

use hyperion_wire as wire;

/// An error resulting from a master-side slave operation.
#[derive(Error, Debug)]
pub enum Error {
    /// No connected slave has authenticated under the hostname.
    #[error("slave at '{0}' is not reachable")]
    SlaveNotReachable(String),

    /// The slave did not connect back within the bootstrap window.
    #[error("slave on '{0}' did not connect in time")]
    ConnectTimeout(String),

    /// The remote launcher failed.
    #[error("remote launcher failed: {0}")]
    Launcher(eyre::Report),

    /// An outbound frame could not be encoded.
    #[error(transparent)]
    Wire(#[from] wire::Error),

    /// The slave server never published its listen port.
    #[error("slave server is not running")]
    NotRunning,
}
