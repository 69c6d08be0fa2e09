//! Control-center glue of the standalone master: keeps the host book and
//! relays per-component operations to the slave on the component's host.
//! Dependency resolution and local component execution live in their own
//! services and are not wired into this binary.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flume as chan;
use tracing::{error, info, warn};

use hyperion_net::Waker;
use hyperion_server::{ControlCenter, ControlError, SlaveHandle};
use hyperion_types::{
    CheckState, ClusterEvent, ComponentInfo, ConfigSnapshot, HostStats, HostStatus, StartState,
};

use crate::config::MasterConfig;
use crate::launch::{FileLogSink, SshLauncher};

pub struct RelayControlCenter {
    snapshot: ConfigSnapshot,
    master_host: String,
    component_wait: Duration,
    log_dir: std::path::PathBuf,
    host_states: Mutex<HashMap<String, HostStatus>>,
    /// Master-local events, drained by the UI server.
    events: chan::Sender<ClusterEvent>,
    slaves: SlaveHandle<Waker>,
    launcher: Arc<SshLauncher>,
}

impl RelayControlCenter {
    pub fn new(
        config: &MasterConfig,
        slaves: SlaveHandle<Waker>,
        launcher: Arc<SshLauncher>,
        events: chan::Sender<ClusterEvent>,
    ) -> Self {
        let master_host = config.hostname();

        // Every configured host starts out disconnected until its slave
        // authenticates.
        let host_states = config
            .components
            .iter()
            .map(|comp| (comp.host.clone(), HostStatus::disconnected()))
            .collect();

        Self {
            snapshot: config.snapshot(),
            master_host,
            component_wait: config.component_wait(),
            log_dir: config.log_dir.clone(),
            host_states: Mutex::new(host_states),
            events,
            slaves,
            launcher,
        }
    }

    fn component(&self, comp_id: &str) -> Result<&ComponentInfo, ControlError> {
        self.snapshot
            .components
            .iter()
            .find(|comp| comp.id == comp_id)
            .ok_or_else(|| ControlError::UnknownComponent(comp_id.to_string()))
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ControlCenter for RelayControlCenter {
    async fn start_all(&self) {
        info!("Starting all {} component(s)", self.snapshot.components.len());

        for comp in self.snapshot.components.clone() {
            if let Err(err) = self.start_component(&comp.id, false).await {
                error!("{}", err);
            }
        }
    }

    async fn stop_all(&self) {
        for comp in self.snapshot.components.clone() {
            if let Err(err) = self.stop_component(&comp.id).await {
                error!("{}", err);
            }
        }
    }

    async fn start_component(
        &self,
        comp_id: &str,
        _force: bool,
    ) -> Result<StartState, ControlError> {
        let comp = self.component(comp_id)?;

        if comp.host == self.master_host {
            warn!("'{}' runs on the master; its executor is not part of this binary", comp_id);
            return Err(ControlError::Failed(format!(
                "no local executor for '{comp_id}'"
            )));
        }

        self.slaves
            .start_component(comp_id, &comp.host)
            .map_err(|err| ControlError::Failed(err.to_string()))?;

        Ok(StartState::Started)
    }

    async fn stop_component(&self, comp_id: &str) -> Result<(), ControlError> {
        let comp = self.component(comp_id)?;

        if comp.host == self.master_host {
            return Err(ControlError::Failed(format!(
                "no local executor for '{comp_id}'"
            )));
        }

        self.slaves
            .stop_component(comp_id, &comp.host)
            .map_err(|err| ControlError::Failed(err.to_string()))
    }

    async fn check_component(&self, comp_id: &str) -> Result<CheckState, ControlError> {
        let comp = self.component(comp_id)?;

        if comp.host == self.master_host {
            return Err(ControlError::Failed(format!(
                "no local executor for '{comp_id}'"
            )));
        }

        let state = self
            .slaves
            .check_component(comp_id, &comp.host, self.component_wait)
            .await
            .map_err(|err| ControlError::Failed(err.to_string()))?;

        // Surface the outcome to every UI subscriber as well.
        self.events
            .send(ClusterEvent::Check {
                comp_id: comp_id.to_string(),
                check_state: state,
            })
            .ok();

        Ok(state)
    }

    fn config(&self) -> ConfigSnapshot {
        self.snapshot.clone()
    }

    fn host_states(&self) -> HashMap<String, HostStatus> {
        self.host_states.lock().expect("host state lock").clone()
    }

    fn host_stats(&self) -> HashMap<String, HostStats> {
        // Slaves do not report resource usage yet.
        HashMap::new()
    }

    fn mark_host_disconnected(&self, host: &str) {
        self.host_states
            .lock()
            .expect("host state lock")
            .insert(host.to_string(), HostStatus::disconnected());
    }

    async fn reload_config(&self) -> Result<(), ControlError> {
        warn!("Configuration reloads require a restart of this master");
        self.events.send(ClusterEvent::ConfigReload).ok();

        Ok(())
    }

    async fn reconnect_with_host(&self, host: &str) -> Result<(), ControlError> {
        let sink = FileLogSink::create(&self.log_dir, &self.snapshot.name, host)
            .map_err(|err| ControlError::Failed(err.to_string()))?;

        self.slaves
            .start_slave(self.launcher.as_ref(), host, Box::new(sink), vec![])
            .await
            .map_err(|err| ControlError::Failed(err.to_string()))?;

        self.host_states
            .lock()
            .expect("host state lock")
            .insert(host.to_string(), HostStatus::connected(Self::now()));

        Ok(())
    }

    fn runs_on_master(&self, comp_id: &str) -> Result<bool, ControlError> {
        Ok(self.component(comp_id)?.host == self.master_host)
    }

    fn component_host(&self, comp_id: &str) -> Result<String, ControlError> {
        Ok(self.component(comp_id)?.host.clone())
    }

    async fn start_local_clone_session(&self, comp_id: &str) -> Result<(), ControlError> {
        Err(ControlError::Failed(format!(
            "no local session manager for '{comp_id}'"
        )))
    }

    async fn cleanup(&self, full: bool) {
        info!("Sending shutdown command to all connected slaves");

        if let Err(err) = self.slaves.kill_slaves(full) {
            error!("Could not notify slaves: {}", err);
        }
    }
}
