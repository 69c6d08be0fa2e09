//! Cluster events.
use serde::{Deserialize, Serialize};

use crate::CheckState;

/// An unsolicited notification of cluster state change.
///
/// Events originate on slave agents or on the master itself and are fanned
/// out to every attached UI client. The set is closed: forwarding code
/// matches on the variant and passes the payload through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClusterEvent {
    /// Outcome of a component health check.
    Check {
        comp_id: String,
        check_state: CheckState,
    },
    /// A host became unreachable from the master.
    Disconnect { host_name: String },
    /// A slave handshake succeeded after prior liveness.
    SlaveReconnect { host_name: String, port: u16 },
    /// A slave socket died.
    SlaveDisconnect { host_name: String, port: u16 },
    /// A component start finished; `failed` names the dependency that broke
    /// the chain, if any.
    StartReport {
        comp_id: String,
        failed: Option<String>,
    },
    /// A supervised component vanished without a stop request.
    Crash { comp_id: String },
    /// The master reloaded its configuration.
    ConfigReload,
}
