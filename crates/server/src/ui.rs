//! The UI-facing server: answers queries from interactive clients, runs
//! their control actions and fans cluster events out to every subscriber.
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use flume as chan;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use hyperion_net::{ConnId, DisconnectReason, Io, Registry, Service, Wake};
use hyperion_types::ClusterEvent;
use hyperion_wire::{self as wire, actions, Decoder, Value};

use crate::control::ControlCenter;
use crate::dispatch::{respond, ResponseType};
use crate::slave::SlaveHandle;

/// Response routing of the UI actions that answer at all.
fn response_type(action: &str) -> Option<ResponseType> {
    match action {
        actions::GET_CONF | actions::GET_HOST_STATES | actions::GET_HOST_STATS => {
            Some(ResponseType::Single)
        }
        _ => None,
    }
}

/// The UI-facing service, driven by a reactor.
pub struct UiService<C, W: Wake> {
    state: UiState<C, W>,
    /// Events deposited by the slave server.
    notify: chan::Receiver<ClusterEvent>,
    /// Events originating on the master itself.
    local: chan::Receiver<ClusterEvent>,
    inboxes: HashMap<ConnId, Decoder>,
    outbox: VecDeque<Io>,
}

/// The shareable part of the UI service, cloned into each worker task.
struct UiState<C, W: Wake> {
    registry: Arc<Registry>,
    cc: Arc<C>,
    slaves: SlaveHandle<W>,
    waker: W,
    shutdown: CancellationToken,
}

impl<C, W: Wake> Clone for UiState<C, W> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            cc: self.cc.clone(),
            slaves: self.slaves.clone(),
            waker: self.waker.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<C, W> UiService<C, W>
where
    C: ControlCenter + 'static,
    W: Wake + 'static,
{
    /// Create the service.
    ///
    /// `notify` is the slave server's event queue, `local` the master's own;
    /// both are drained on every tick. Cancelling `shutdown` is how the
    /// `quit` action reaches the supervisor.
    pub fn new(
        registry: Arc<Registry>,
        cc: Arc<C>,
        slaves: SlaveHandle<W>,
        waker: W,
        notify: chan::Receiver<ClusterEvent>,
        local: chan::Receiver<ClusterEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            state: UiState {
                registry,
                cc,
                slaves,
                waker,
                shutdown,
            },
            notify,
            local,
            inboxes: HashMap::new(),
            outbox: VecDeque::new(),
        }
    }

    fn dispatch(&mut self, addr: ConnId, envelope: wire::Envelope) {
        let Some(action) = envelope.action else {
            debug!("Dropping actionless frame from UI client {}", addr);
            return;
        };

        debug!("Action: {}, {} arg(s)", action, envelope.args.len());

        if action == actions::UNSUBSCRIBE {
            debug!("Client {} unsubscribed", addr);
            self.outbox
                .push_back(Io::Disconnect(addr, DisconnectReason::Unsubscribed));
            return;
        }

        // Handlers may block on the control center; each runs in its own
        // short-lived task so the reactor keeps serving.
        let state = self.state.clone();
        tokio::spawn(async move { state.handle(addr, action, envelope.args).await });
    }

    /// Encode one event and enqueue it on every connected UI client.
    fn fan_out(&self, event: ClusterEvent) {
        if let ClusterEvent::Disconnect { host_name } = &event {
            // Keep the host map consistent before any client re-queries it.
            self.state.cc.mark_host_disconnected(host_name);
        }

        match wire::to_value(&event)
            .and_then(|value| wire::encode_request(actions::QUEUE_EVENT, vec![value]))
        {
            Ok(message) => self.state.registry.broadcast(&message),
            Err(err) => error!("Failed to encode event for fan-out: {}", err),
        }
    }
}

impl<C, W> UiState<C, W>
where
    C: ControlCenter,
    W: Wake,
{
    async fn handle(&self, conn: ConnId, action: String, args: Vec<Value>) {
        let ret = match self.invoke(&action, &args).await {
            Ok(ret) => ret,
            Err(err) => {
                error!(
                    "Ignoring action '{}' with unexpected arguments: {}",
                    action, err
                );
                return;
            }
        };

        let Some(response_type) = response_type(&action) else {
            return;
        };
        let Some(value) = ret else {
            return;
        };

        if let Err(err) = respond(&self.registry, &conn, &action, value, response_type) {
            error!("Failed to encode response to '{}': {}", action, err);
            return;
        }
        self.waker.wake().ok();
    }

    /// Invoke the handler for `action`. `Err` means the arguments did not
    /// match the handler's signature; handler failures are logged in place
    /// and never surface to the client.
    async fn invoke(&self, action: &str, args: &[Value]) -> Result<Option<Value>, wire::Error> {
        match action {
            actions::START_ALL => self.cc.start_all().await,
            actions::STOP_ALL => self.cc.stop_all().await,
            actions::START => {
                let comp_id: String = wire::arg(args, 0)?;
                let force = wire::opt_arg::<bool>(args, 1)?.unwrap_or(false);

                if let Err(err) = self.cc.start_component(&comp_id, force).await {
                    error!("{}", err);
                }
            }
            actions::STOP => {
                let comp_id: String = wire::arg(args, 0)?;

                if let Err(err) = self.cc.stop_component(&comp_id).await {
                    error!("{}", err);
                }
            }
            actions::CHECK => {
                let comp_id: String = wire::arg(args, 0)?;

                if let Err(err) = self.cc.check_component(&comp_id).await {
                    error!("{}", err);
                }
            }
            actions::GET_CONF => return Ok(Some(wire::to_value(&self.cc.config())?)),
            actions::GET_HOST_STATES => {
                return Ok(Some(wire::to_value(&self.cc.host_states())?))
            }
            actions::GET_HOST_STATS => return Ok(Some(wire::to_value(&self.cc.host_stats())?)),
            actions::RELOAD_CONFIG => {
                if let Err(err) = self.cc.reload_config().await {
                    error!("{}", err);
                }
            }
            actions::RECONNECT_WITH_HOST => {
                let host: String = wire::arg(args, 0)?;

                if let Err(err) = self.cc.reconnect_with_host(&host).await {
                    error!("{}", err);
                }
            }
            actions::START_CLONE_SESSION => {
                let comp_id: String = wire::arg(args, 0)?;
                self.start_clone_session(&comp_id).await;
            }
            actions::QUIT => {
                info!("Shutdown requested over the wire");
                self.shutdown.cancel();
            }
            other => error!("Ignoring unrecognized action '{}'", other),
        }

        Ok(None)
    }

    /// Clone the component's terminal session, locally or on its slave.
    async fn start_clone_session(&self, comp_id: &str) {
        let on_master = match self.cc.runs_on_master(comp_id) {
            Ok(on_master) => on_master,
            Err(err) => {
                error!("{}", err);
                return;
            }
        };

        if on_master {
            if let Err(err) = self.cc.start_local_clone_session(comp_id).await {
                error!("{}", err);
            }
            return;
        }

        let host = match self.cc.component_host(comp_id) {
            Ok(host) => host,
            Err(err) => {
                error!("{}", err);
                return;
            }
        };
        if let Err(err) = self.slaves.start_clone_session(comp_id, &host) {
            error!("{}", err);
        }
    }
}

#[async_trait]
impl<C, W> Service for UiService<C, W>
where
    C: ControlCenter + 'static,
    W: Wake + 'static,
{
    fn connected(&mut self, id: ConnId) {
        self.inboxes.insert(id, Decoder::new(1024));
    }

    async fn message_received(&mut self, id: &ConnId, bytes: Cow<'_, [u8]>) {
        let Some(inbox) = self.inboxes.get_mut(id) else {
            debug!("Received message from unknown connection {}", id);
            return;
        };

        inbox.input(&bytes);

        let mut envelopes = Vec::new();
        let mut broken = None;

        loop {
            match inbox.decode_next() {
                Ok(Some(envelope)) => envelopes.push(envelope),
                Ok(None) => break,
                Err(err) if err.is_framing() => {
                    broken = Some(err);
                    break;
                }
                Err(err) => error!("Invalid payload from client {}: {}", id, err),
            }
        }

        for envelope in envelopes {
            self.dispatch(*id, envelope);
        }
        if let Some(err) = broken {
            error!("Broken stream from client {}: {}", id, err);
            self.outbox.push_back(Io::Disconnect(
                *id,
                DisconnectReason::ConnectionError(Arc::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    err,
                ))),
            ));
        }
    }

    async fn disconnected(
        &mut self,
        id: &ConnId,
        _identity: Option<String>,
        reason: DisconnectReason,
    ) {
        self.inboxes.remove(id);

        match reason {
            DisconnectReason::Unsubscribed => {}
            reason => debug!("Connection to client {} was lost: {}", id, reason),
        }
    }

    /// Drain the slave notify queue, then the master's own event queue, and
    /// fan every event out to all subscribers.
    async fn tick(&mut self) {
        while let Ok(event) = self.notify.try_recv() {
            self.fan_out(event);
        }
        while let Ok(event) = self.local.try_recv() {
            self.fan_out(event);
        }
    }
}

impl<C, W> Iterator for UiService<C, W>
where
    C: ControlCenter + 'static,
    W: Wake + 'static,
{
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        self.outbox.pop_front()
    }
}
