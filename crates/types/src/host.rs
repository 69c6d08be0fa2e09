use serde::{Deserialize, Serialize};

use crate::HostConnectionState;

/// Last known liveness of a remote host, as tracked by the master.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostStatus {
    /// Seconds since epoch of the last poll that saw the host alive.
    /// Zero when the host was never seen or is gone.
    pub last_seen: u64,
    pub connection: HostConnectionState,
}

impl HostStatus {
    pub fn connected(last_seen: u64) -> Self {
        Self {
            last_seen,
            connection: HostConnectionState::Connected,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            last_seen: 0,
            connection: HostConnectionState::Disconnected,
        }
    }
}

/// Point-in-time resource usage reported for one host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HostStats {
    /// One-minute load average.
    pub load_avg: f32,
    /// CPU usage in percent.
    pub cpu: f32,
    /// Memory usage in percent.
    pub mem: f32,
}
