use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flume as chan;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info};

use hyperion_net::{Reactor, Registry};
use hyperion_server::{ControlCenter, SlaveService, UiService};

use crate::config::MasterConfig;
use crate::control::RelayControlCenter;
use crate::launch::SshLauncher;

/// The limit of time to wait for the master to shut down.
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// The running master: both reactors plus the control glue between them.
pub struct Master {
    config: MasterConfig,
    control: Option<Arc<RelayControlCenter>>,
    cancelation: CancellationToken,
    task_tracker: TaskTracker,
}

impl Master {
    pub fn new(config: MasterConfig) -> Self {
        Self {
            config,
            control: None,
            cancelation: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Wait for any part of the master to request cancellation.
    pub async fn cancelled(&self) {
        self.cancelation.cancelled().await
    }

    /// Bring up the slave server, then the UI server.
    pub async fn run(&mut self) -> eyre::Result<()> {
        let (notify_tx, notify_rx) = chan::unbounded();
        let (local_tx, local_rx) = chan::unbounded();

        // Slave-facing server; the OS picks its loopback port.
        let slave_registry = Arc::new(Registry::new());
        let (slave_listen_tx, slave_listen_rx) = chan::bounded(1);
        let mut slave_reactor = Reactor::new(slave_registry.clone(), slave_listen_tx)?;
        let slave_service = SlaveService::new(slave_registry, notify_tx);
        let slaves = slave_service.handle(
            slave_reactor.waker(),
            slave_listen_rx,
            self.config.hostname(),
        );

        let launcher = Arc::new(SshLauncher::new(&self.config.slave, &self.config.name));
        let control = Arc::new(RelayControlCenter::new(
            &self.config,
            slaves.clone(),
            launcher,
            local_tx,
        ));

        // UI-facing server on the configured loopback port.
        let ui_registry = Arc::new(Registry::new());
        let (ui_listen_tx, ui_listen_rx) = chan::bounded(1);
        let mut ui_reactor = Reactor::new(ui_registry.clone(), ui_listen_tx)?;
        let ui_service = UiService::new(
            ui_registry,
            control.clone(),
            slaves.clone(),
            ui_reactor.waker(),
            notify_rx,
            local_rx,
            self.cancelation.clone(),
        );

        let slave_addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let cancel = self.cancelation.clone();
        self.task_tracker.spawn(async move {
            if let Err(err) = slave_reactor
                .run(&slave_addr, slave_service, cancel.clone())
                .await
            {
                error!("Slave management server failed: {}", err);
                cancel.cancel();
            }
        });

        let slave_port = slaves.port().await?;
        info!("Slave management server listening on localhost:{}", slave_port);

        let ui_addr: SocketAddr = ([127, 0, 0, 1], self.config.ui.port).into();
        let cancel = self.cancelation.clone();
        self.task_tracker.spawn(async move {
            if let Err(err) = ui_reactor.run(&ui_addr, ui_service, cancel.clone()).await {
                error!("Server failed: {}", err);
                cancel.cancel();
            }
        });

        ui_listen_rx
            .recv_async()
            .await
            .map_err(|_| eyre::eyre!("the UI server did not come up"))?;
        info!(
            "Hyperion server up and running on localhost:{}",
            self.config.ui.port
        );

        self.control = Some(control);
        self.task_tracker.close();

        Ok(())
    }

    pub async fn shutdown(&self) {
        info!("Shutting down master, draining client queues...");

        // Queue the shutdown command for the slaves first, so the reactors
        // deliver it during their drain phase.
        if let Some(control) = &self.control {
            control.cleanup(true).await;
        }
        self.cancelation.cancel();

        let timeout = self
            .config
            .shutdown_timeout
            .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

        select! {
            _ = self.task_tracker.wait() => {},
            _ = sleep(Duration::from_secs(timeout)) => {
                info!("Shutdown timeout reached, exiting...");
            },
        }
    }
}
