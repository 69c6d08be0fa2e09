//! Seam to the control center owning dependency resolution and component
//! execution. The serving core only ever talks to this trait.
use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use hyperion_types::{CheckState, ConfigSnapshot, HostStats, HostStatus, StartState};

/// An error reported by the control center.
#[derive(Error, Debug)]
pub enum ControlError {
    /// The component id does not exist in the loaded configuration.
    #[error("component '{0}' is unknown")]
    UnknownComponent(String),

    /// The operation itself failed.
    #[error("{0}")]
    Failed(String),
}

/// Master-side operations the UI server delegates to.
#[async_trait]
pub trait ControlCenter: Send + Sync {
    /// Start every component, dependency-ordered.
    async fn start_all(&self);

    /// Stop every component, reverse dependency order.
    async fn stop_all(&self);

    async fn start_component(&self, comp_id: &str, force: bool)
        -> Result<StartState, ControlError>;

    async fn stop_component(&self, comp_id: &str) -> Result<(), ControlError>;

    /// Run a health check; the outcome additionally surfaces as a cluster
    /// event through the master's local event queue.
    async fn check_component(&self, comp_id: &str) -> Result<CheckState, ControlError>;

    /// Snapshot of the loaded configuration.
    fn config(&self) -> ConfigSnapshot;

    /// Host name to last-seen liveness.
    fn host_states(&self) -> HashMap<String, HostStatus>;

    /// Host name to resource usage.
    fn host_stats(&self) -> HashMap<String, HostStats>;

    /// Overwrite a host's entry with the disconnected state.
    fn mark_host_disconnected(&self, host: &str);

    async fn reload_config(&self) -> Result<(), ControlError>;

    async fn reconnect_with_host(&self, host: &str) -> Result<(), ControlError>;

    /// Whether the component is pinned to the master's own host.
    fn runs_on_master(&self, comp_id: &str) -> Result<bool, ControlError>;

    /// Host a component is pinned to.
    fn component_host(&self, comp_id: &str) -> Result<String, ControlError>;

    /// Open a clone of the component's terminal session on the master.
    async fn start_local_clone_session(&self, comp_id: &str) -> Result<(), ControlError>;

    /// Release everything on shutdown. `full` also tears down the local
    /// terminal sessions.
    async fn cleanup(&self, full: bool);
}

#[cfg(any(test, feature = "mocks"))]
mockall::mock! {
    pub ControlCenter {}

    #[async_trait]
    impl ControlCenter for ControlCenter {
        async fn start_all(&self);
        async fn stop_all(&self);
        async fn start_component(&self, comp_id: &str, force: bool)
            -> Result<StartState, ControlError>;
        async fn stop_component(&self, comp_id: &str) -> Result<(), ControlError>;
        async fn check_component(&self, comp_id: &str) -> Result<CheckState, ControlError>;
        fn config(&self) -> ConfigSnapshot;
        fn host_states(&self) -> HashMap<String, HostStatus>;
        fn host_stats(&self) -> HashMap<String, HostStats>;
        fn mark_host_disconnected(&self, host: &str);
        async fn reload_config(&self) -> Result<(), ControlError>;
        async fn reconnect_with_host(&self, host: &str) -> Result<(), ControlError>;
        fn runs_on_master(&self, comp_id: &str) -> Result<bool, ControlError>;
        fn component_host(&self, comp_id: &str) -> Result<String, ControlError>;
        async fn start_local_clone_session(&self, comp_id: &str) -> Result<(), ControlError>;
        async fn cleanup(&self, full: bool);
    }
}
