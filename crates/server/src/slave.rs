//! The slave-facing server: authenticates slave agents, forwards their
//! events, issues per-slave commands and brokers slave bootstrap.
use std::borrow::Cow;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flume as chan;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, trace};

use hyperion_net::{ConnId, DisconnectReason, Io, Registry, Service, Wake};
use hyperion_types::{CheckState, ClusterEvent};
use hyperion_wire::{self as wire, actions, Decoder, Value};

use crate::launch::{LogSink, RemoteLauncher};
use crate::Error;

/// How long a freshly launched slave gets to connect back.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Registry poll granularity while waiting for a slave to connect.
const CONNECT_POLL: Duration = Duration::from_millis(500);
/// Extra time granted to a check on top of the caller's budget.
const CHECK_GRACE: Duration = Duration::from_secs(1);

/// Bookkeeping for bounded-wait health checks.
#[derive(Default)]
struct CheckLedger {
    /// Latest state reported per component.
    latest: HashMap<String, Option<CheckState>>,
    /// Single-shot fulfillment channels of in-flight waits.
    pending: HashMap<String, chan::Sender<CheckState>>,
}

/// State shared between the service on the reactor, the handle on the
/// master side, and worker tasks.
struct Shared {
    registry: Arc<Registry>,
    notify: chan::Sender<ClusterEvent>,
    checks: Mutex<CheckLedger>,
    sinks: Mutex<HashMap<String, Box<dyn LogSink>>>,
}

impl Shared {
    /// Forward an event towards the UI server. Check outcomes settle the
    /// ledger first, so a bounded wait is fulfilled no later than the
    /// moment the event becomes observable downstream.
    fn forward(&self, event: ClusterEvent) {
        if let ClusterEvent::Check {
            comp_id,
            check_state,
        } = &event
        {
            self.settle_check(comp_id, *check_state);
        }

        self.notify.send(event).ok();
    }

    fn settle_check(&self, comp_id: &str, state: CheckState) {
        let mut checks = self.checks.lock().expect("check ledger lock");

        checks.latest.insert(comp_id.to_string(), Some(state));
        if let Some(tx) = checks.pending.remove(comp_id) {
            tx.try_send(state).ok();
        }
    }
}

/// The slave management service, driven by a reactor.
pub struct SlaveService {
    shared: Arc<Shared>,
    inboxes: HashMap<ConnId, Decoder>,
    outbox: VecDeque<Io>,
}

impl SlaveService {
    /// Create the service. Events it forwards come out of the receiving end
    /// of `notify`, which the UI server drains.
    pub fn new(registry: Arc<Registry>, notify: chan::Sender<ClusterEvent>) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                notify,
                checks: Mutex::new(CheckLedger::default()),
                sinks: Mutex::new(HashMap::new()),
            }),
            inboxes: HashMap::new(),
            outbox: VecDeque::new(),
        }
    }

    /// Create a handle for master-side slave operations.
    ///
    /// `listening` is the channel on which the reactor publishes the
    /// OS-chosen listen address; `master_host` is the name slaves are told
    /// to connect back to.
    pub fn handle<W: Wake>(
        &self,
        waker: W,
        listening: chan::Receiver<SocketAddr>,
        master_host: impl Into<String>,
    ) -> SlaveHandle<W> {
        SlaveHandle {
            shared: self.shared.clone(),
            waker,
            listening,
            port: Arc::new(OnceCell::new()),
            master_host: master_host.into(),
        }
    }

    /// Interpret one decoded envelope.
    ///
    /// All slave actions are quick channel or map operations, so they run
    /// inline: settling the check ledger on the reactor keeps it ordered
    /// before the notify queue is drained downstream.
    fn dispatch(&mut self, addr: ConnId, mut envelope: wire::Envelope) {
        let Some(action) = envelope.action.take() else {
            self.deliver_log(addr, &envelope);
            return;
        };

        trace!("Action: {}, {} arg(s)", action, envelope.args.len());

        match action.as_str() {
            actions::UNSUBSCRIBE => {
                info!("Slave client {} unsubscribed", addr);
                self.outbox
                    .push_back(Io::Disconnect(addr, DisconnectReason::Unsubscribed));
            }
            actions::AUTH => match wire::arg::<String>(&envelope.args, 0) {
                Ok(hostname) => {
                    debug!("Slave on '{}' authenticated from {}", hostname, addr);

                    self.shared.registry.set_identity(addr, hostname.as_str());
                    self.shared.forward(ClusterEvent::SlaveReconnect {
                        host_name: hostname,
                        port: addr.port(),
                    });
                }
                Err(err) => error!("Ignoring auth without a hostname: {}", err),
            },
            actions::QUEUE_EVENT => match wire::arg::<ClusterEvent>(&envelope.args, 0) {
                Ok(event) => self.shared.forward(event),
                Err(err) => error!("Ignoring undecodable slave event: {}", err),
            },
            other => error!("Ignoring unrecognized slave action '{}'", other),
        }
    }

    /// Hand an actionless frame to the log sink of the slave it came from.
    fn deliver_log(&self, addr: ConnId, envelope: &wire::Envelope) {
        let record = match envelope.log_record() {
            Ok(record) => record,
            Err(err) => {
                error!("Undecodable log record from {}: {}", addr, err);
                return;
            }
        };

        let Some(hostname) = self.shared.registry.identity_of(&addr) else {
            debug!("Got log record from a not yet authenticated slave socket");
            return;
        };

        let sinks = self.shared.sinks.lock().expect("log sink lock");
        match sinks.get(&hostname) {
            Some(sink) => sink.handle(record),
            None => debug!("Got log record from yet unhandled slave '{}'", hostname),
        }
    }
}

#[async_trait]
impl Service for SlaveService {
    fn connected(&mut self, id: ConnId) {
        // Pending until the first auth establishes an identity.
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
                Err(err) => error!("Invalid payload from slave {}: {}", id, err),
            }
        }

        for envelope in envelopes {
            self.dispatch(*id, envelope);
        }
        if let Some(err) = broken {
            error!("Broken stream from slave {}: {}", id, err);
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
        identity: Option<String>,
        reason: DisconnectReason,
    ) {
        self.inboxes.remove(id);

        match identity {
            // An orderly unsubscribe is not a lost host.
            Some(hostname) if !matches!(reason, DisconnectReason::Unsubscribed) => {
                error!("Connection to slave '{}' was lost!", hostname);

                self.shared.forward(ClusterEvent::SlaveDisconnect {
                    host_name: hostname,
                    port: id.port(),
                });
            }
            Some(hostname) => debug!("Slave '{}' closed its connection", hostname),
            None => debug!("Unauthenticated slave connection {} closed: {}", id, reason),
        }
    }

    async fn tick(&mut self) {}
}

impl Iterator for SlaveService {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        self.outbox.pop_front()
    }
}

/// Master-side operations on connected slaves.
///
/// Cheap to clone; all clones share the service's state.
pub struct SlaveHandle<W: Wake> {
    shared: Arc<Shared>,
    waker: W,
    listening: chan::Receiver<SocketAddr>,
    port: Arc<OnceCell<u16>>,
    master_host: String,
}

impl<W: Wake> Clone for SlaveHandle<W> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            waker: self.waker.clone(),
            listening: self.listening.clone(),
            port: self.port.clone(),
            master_host: self.master_host.clone(),
        }
    }
}

impl<W: Wake> SlaveHandle<W> {
    /// The slave server's listen port, awaiting the reactor's bind when
    /// called before startup finished.
    pub async fn port(&self) -> Result<u16, Error> {
        self.port
            .get_or_try_init(|| async {
                let addr = self
                    .listening
                    .recv_async()
                    .await
                    .map_err(|_| Error::NotRunning)?;
                Ok(addr.port())
            })
            .await
            .copied()
    }

    /// Frame an action and enqueue it for the slave identified by `host`.
    fn send_to(&self, host: &str, action: &str, args: Vec<Value>) -> Result<(), Error> {
        let conn = self
            .shared
            .registry
            .find_by_identity(host)
            .ok_or_else(|| Error::SlaveNotReachable(host.to_string()))?;

        let message = wire::encode_request(action, args)?;
        self.shared.registry.enqueue(&conn, message);
        self.waker.wake().ok();

        Ok(())
    }

    pub fn start_component(&self, comp_id: &str, host: &str) -> Result<(), Error> {
        debug!("Sending '{}' start request to '{}'", comp_id, host);
        self.send_to(host, actions::START, vec![Value::from(comp_id)])
    }

    pub fn stop_component(&self, comp_id: &str, host: &str) -> Result<(), Error> {
        debug!("Sending '{}' stop request to '{}'", comp_id, host);
        self.send_to(host, actions::STOP, vec![Value::from(comp_id)])
    }

    pub fn start_clone_session(&self, comp_id: &str, host: &str) -> Result<(), Error> {
        self.send_to(host, actions::START_CLONE_SESSION, vec![Value::from(comp_id)])
    }

    /// Ask the slave on `host` to check `comp_id` and wait for the answer,
    /// bounded by `wait` plus a fixed grace period.
    ///
    /// Expiry yields [`CheckState::Unreachable`] without cancelling the
    /// remote request; a late answer still settles the ledger.
    pub async fn check_component(
        &self,
        comp_id: &str,
        host: &str,
        wait: Duration,
    ) -> Result<CheckState, Error> {
        debug!("Sending '{}' check request to '{}'", comp_id, host);

        let (tx, rx) = chan::bounded(1);
        {
            let mut checks = self.shared.checks.lock().expect("check ledger lock");
            checks.latest.insert(comp_id.to_string(), None);
            checks.pending.insert(comp_id.to_string(), tx);
        }

        if let Err(err) = self.send_to(host, actions::CHECK, vec![Value::from(comp_id)]) {
            let mut checks = self.shared.checks.lock().expect("check ledger lock");
            checks.pending.remove(comp_id);
            return Err(err);
        }

        debug!("Waiting on '{}' response for {:?}", host, wait);

        match tokio::time::timeout(wait + CHECK_GRACE, rx.recv_async()).await {
            Ok(Ok(state)) => {
                debug!("Slave answered check request with {}", state);
                Ok(state)
            }
            _ => {
                error!("No answer from slave - returning unreachable");

                let mut checks = self.shared.checks.lock().expect("check ledger lock");
                checks.pending.remove(comp_id);
                Ok(CheckState::Unreachable)
            }
        }
    }

    /// Send a shutdown command to every connected slave. `full` also kills
    /// the remote terminal sessions; otherwise the slaves merely suspend.
    pub fn kill_slaves(&self, full: bool) -> Result<(), Error> {
        let action = if full { actions::QUIT } else { actions::SUSPEND };
        let message = wire::encode_request(action, vec![])?;

        self.shared.registry.broadcast(&message);
        self.waker.wake().ok();

        Ok(())
    }

    /// Send a shutdown command to one slave. A missing slave is tolerated.
    pub fn kill_slave_on_host(&self, host: &str) {
        match self.send_to(host, actions::QUIT, vec![]) {
            Ok(()) => debug!("Socket to '{}' still exists - sending shutdown", host),
            Err(err) => error!("Could not send quit command to '{}': {}", host, err),
        }
    }

    /// Register the sink receiving log records shipped by the slave on
    /// `host`.
    pub fn register_log_sink(&self, host: &str, sink: Box<dyn LogSink>) {
        let mut sinks = self.shared.sinks.lock().expect("log sink lock");
        sinks.insert(host.to_string(), sink);
    }

    /// Bring up the slave on `host`.
    ///
    /// If a live connection already exists this reduces to replaying
    /// `custom_messages`; otherwise the remote launcher starts the slave
    /// process and we wait for it to authenticate, bounded by
    /// [`CONNECT_TIMEOUT`]. On timeout only the registered log sink
    /// persists.
    pub async fn start_slave<L: RemoteLauncher>(
        &self,
        launcher: &L,
        host: &str,
        sink: Box<dyn LogSink>,
        custom_messages: Vec<Vec<u8>>,
    ) -> Result<(), Error> {
        if let Some(conn) = self.shared.registry.find_by_identity(host) {
            debug!("Socket to {} already exists - reusing the connection", host);

            self.shared.forward(ClusterEvent::SlaveReconnect {
                host_name: host.to_string(),
                port: conn.port(),
            });
            self.replay(&conn, custom_messages);

            return Ok(());
        }

        self.register_log_sink(host, sink);

        let port = self.port().await?;
        launcher
            .launch_slave(host, &self.master_host, port)
            .await
            .map_err(Error::Launcher)?;

        info!("Waiting for slave on '{}' to connect...", host);

        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        while tokio::time::Instant::now() < deadline {
            if let Some(conn) = self.shared.registry.find_by_identity(host) {
                info!("Connection successfully established");
                self.replay(&conn, custom_messages);

                return Ok(());
            }
            tokio::time::sleep(CONNECT_POLL).await;
        }

        error!("Connection to slave on '{}' failed!", host);
        Err(Error::ConnectTimeout(host.to_string()))
    }

    /// Run the configuration pre-flight on `host`.
    pub async fn validate_on_slave<L: RemoteLauncher>(
        &self,
        launcher: &L,
        host: &str,
        config_path: &str,
    ) -> Result<hyperion_types::ExitStatus, Error> {
        let status = launcher
            .validate(host, config_path)
            .await
            .map_err(Error::Launcher)?;

        if status.is_fine() {
            debug!("Validation on '{}' returned {}", host, status);
        } else {
            error!("Validation on '{}' returned with error {}", host, status);
        }

        Ok(status)
    }

    fn replay(&self, conn: &ConnId, messages: Vec<Vec<u8>>) {
        for message in messages {
            self.shared.registry.enqueue(conn, message);
        }
        self.waker.wake().ok();
    }
}
