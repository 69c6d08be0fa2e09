//! End-to-end flow through both reactors over real loopback sockets: UI
//! queries, slave handshake, event fan-out, bounded-wait checks and
//! disconnect detection.
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use flume as chan;
use tokio_util::sync::CancellationToken;

use hyperion_net::{Reactor, Registry, Waker};
use hyperion_server::{ControlCenter, ControlError, SlaveHandle, SlaveService, UiService};
use hyperion_types::{
    CheckState, ClusterEvent, ConfigSnapshot, HostConnectionState, HostStats, HostStatus,
    StartState,
};
use hyperion_wire::{self as wire, actions, Decoder, Envelope, Value};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Control center stub backed by a plain host map.
struct TestControlCenter {
    host_states: Mutex<HashMap<String, HostStatus>>,
}

impl TestControlCenter {
    fn new() -> Self {
        Self {
            host_states: Mutex::new(HashMap::from([(
                "h1".to_string(),
                HostStatus::connected(1234),
            )])),
        }
    }
}

#[async_trait]
impl ControlCenter for TestControlCenter {
    async fn start_all(&self) {}
    async fn stop_all(&self) {}

    async fn start_component(&self, _: &str, _: bool) -> Result<StartState, ControlError> {
        Ok(StartState::Started)
    }

    async fn stop_component(&self, _: &str) -> Result<(), ControlError> {
        Ok(())
    }

    async fn check_component(&self, _: &str) -> Result<CheckState, ControlError> {
        Ok(CheckState::Running)
    }

    fn config(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            name: "e2e".into(),
            components: vec![],
        }
    }

    fn host_states(&self) -> HashMap<String, HostStatus> {
        self.host_states.lock().unwrap().clone()
    }

    fn host_stats(&self) -> HashMap<String, HostStats> {
        HashMap::from([(
            "h1".to_string(),
            HostStats {
                load_avg: 0.5,
                cpu: 10.0,
                mem: 20.0,
            },
        )])
    }

    fn mark_host_disconnected(&self, host: &str) {
        self.host_states
            .lock()
            .unwrap()
            .insert(host.to_string(), HostStatus::disconnected());
    }

    async fn reload_config(&self) -> Result<(), ControlError> {
        Ok(())
    }

    async fn reconnect_with_host(&self, _: &str) -> Result<(), ControlError> {
        Ok(())
    }

    fn runs_on_master(&self, _: &str) -> Result<bool, ControlError> {
        Ok(true)
    }

    fn component_host(&self, _: &str) -> Result<String, ControlError> {
        Ok("h1".into())
    }

    async fn start_local_clone_session(&self, _: &str) -> Result<(), ControlError> {
        Ok(())
    }

    async fn cleanup(&self, _: bool) {}
}

/// Blocking test peer speaking the frame protocol.
struct TestClient {
    stream: TcpStream,
    decoder: Decoder,
}

impl TestClient {
    fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        Self {
            stream,
            decoder: Decoder::new(1024),
        }
    }

    fn send(&mut self, action: &str, args: Vec<Value>) {
        let frame = wire::encode_request(action, args).unwrap();
        self.stream.write_all(&frame).unwrap();
    }

    fn recv(&mut self) -> Envelope {
        let deadline = Instant::now() + RECV_TIMEOUT;
        let mut buf = [0u8; 4096];

        loop {
            if let Some(envelope) = self.decoder.decode_next().unwrap() {
                return envelope;
            }
            match self.stream.read(&mut buf) {
                Ok(0) => panic!("server closed the connection"),
                Ok(n) => self.decoder.input(&buf[..n]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    assert!(Instant::now() < deadline, "timed out waiting for a frame");
                }
                Err(err) => panic!("read error: {err}"),
            }
        }
    }

    /// Read frames until one carries `queue_event`, returning the event.
    fn recv_event(&mut self) -> ClusterEvent {
        loop {
            let envelope = self.recv();
            if envelope.action.as_deref() == Some(actions::QUEUE_EVENT) {
                return wire::arg(&envelope.args, 0).unwrap();
            }
        }
    }

    /// True when the server has closed this connection.
    fn eof(&mut self) -> bool {
        let deadline = Instant::now() + RECV_TIMEOUT;
        let mut buf = [0u8; 256];

        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => return true,
                Ok(n) => self.decoder.input(&buf[..n]),
                Err(err)
                    if err.kind() == std::io::ErrorKind::WouldBlock
                        || err.kind() == std::io::ErrorKind::TimedOut =>
                {
                    if Instant::now() >= deadline {
                        return false;
                    }
                }
                Err(_) => return true,
            }
        }
    }
}

struct Master {
    cc: Arc<TestControlCenter>,
    handle: SlaveHandle<Waker>,
    local_tx: chan::Sender<ClusterEvent>,
    ui_addr: std::net::SocketAddr,
    slave_addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

/// Wire up both servers the way the master binary does, on OS-chosen ports.
async fn start_master() -> Master {
    let cc = Arc::new(TestControlCenter::new());
    let shutdown = CancellationToken::new();

    let (notify_tx, notify_rx) = chan::unbounded();
    let (local_tx, local_rx) = chan::unbounded();

    // Slave-facing server.
    let slave_registry = Arc::new(Registry::new());
    let (slave_listen_tx, slave_listen_rx) = chan::bounded(1);
    let mut slave_reactor = Reactor::new(slave_registry.clone(), slave_listen_tx).unwrap();
    let slave_service = SlaveService::new(slave_registry, notify_tx);
    let handle = slave_service.handle(slave_reactor.waker(), slave_listen_rx, "master");

    // UI-facing server.
    let ui_registry = Arc::new(Registry::new());
    let (ui_listen_tx, ui_listen_rx) = chan::bounded(1);
    let mut ui_reactor = Reactor::new(ui_registry.clone(), ui_listen_tx).unwrap();
    let ui_service = UiService::new(
        ui_registry,
        cc.clone(),
        handle.clone(),
        ui_reactor.waker(),
        notify_rx,
        local_rx,
        shutdown.clone(),
    );

    let slave_cancel = shutdown.clone();
    let ui_cancel = shutdown.clone();

    let tasks = vec![
        tokio::spawn(async move {
            slave_reactor
                .run(&"127.0.0.1:0".parse().unwrap(), slave_service, slave_cancel)
                .await
                .unwrap();
        }),
        tokio::spawn(async move {
            ui_reactor
                .run(&"127.0.0.1:0".parse().unwrap(), ui_service, ui_cancel)
                .await
                .unwrap();
        }),
    ];

    let slave_port = handle.port().await.unwrap();
    let slave_addr = ([127, 0, 0, 1], slave_port).into();
    let ui_addr = ui_listen_rx.recv_async().await.unwrap();

    Master {
        cc,
        handle,
        local_tx,
        ui_addr,
        slave_addr,
        shutdown,
        tasks,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn master_serves_ui_clients_and_slaves() {
    let master = start_master().await;

    // A UI client queries the host map and gets exactly one response.
    let mut ui_a = TestClient::connect(master.ui_addr);
    ui_a.send(actions::GET_HOST_STATES, vec![]);

    let envelope = ui_a.recv();
    assert_eq!(envelope.action.as_deref(), Some("get_host_states_response"));
    let states: HashMap<String, HostStatus> = wire::arg(&envelope.args, 0).unwrap();
    assert_eq!(states["h1"].connection, HostConnectionState::Connected);

    ui_a.send(actions::GET_CONF, vec![]);
    let envelope = ui_a.recv();
    assert_eq!(envelope.action.as_deref(), Some("get_conf_response"));
    let snapshot: ConfigSnapshot = wire::arg(&envelope.args, 0).unwrap();
    assert_eq!(snapshot.name, "e2e");

    // A second client; the round-trip guarantees it is registered before
    // any of the events below are fanned out.
    let mut ui_b = TestClient::connect(master.ui_addr);
    ui_b.send(actions::GET_CONF, vec![]);
    ui_b.recv();

    // A slave authenticates; every UI subscriber learns about it.
    let mut slave = TestClient::connect(master.slave_addr);
    slave.send(actions::AUTH, vec![Value::from("h1")]);

    assert!(matches!(
        ui_a.recv_event(),
        ClusterEvent::SlaveReconnect { host_name, .. } if host_name == "h1"
    ));
    assert!(matches!(
        ui_b.recv_event(),
        ClusterEvent::SlaveReconnect { host_name, .. } if host_name == "h1"
    ));

    // A host-lost event reaches both subscribers and flips the host map
    // before any of them can re-query it.
    let event = ClusterEvent::Disconnect {
        host_name: "h1".into(),
    };
    slave.send(
        actions::QUEUE_EVENT,
        vec![wire::to_value(&event).unwrap()],
    );

    assert_eq!(ui_a.recv_event(), event);
    assert_eq!(ui_b.recv_event(), event);
    assert_eq!(
        master.cc.host_states()["h1"].connection,
        HostConnectionState::Disconnected
    );

    // Bounded-wait check, answered by the slave.
    let check = {
        let handle = master.handle.clone();
        tokio::spawn(async move {
            handle
                .check_component("c1", "h1", Duration::from_secs(5))
                .await
        })
    };

    let envelope = slave.recv();
    assert_eq!(envelope.action.as_deref(), Some(actions::CHECK));
    assert_eq!(wire::arg::<String>(&envelope.args, 0).unwrap(), "c1");

    let answer = ClusterEvent::Check {
        comp_id: "c1".into(),
        check_state: CheckState::Running,
    };
    slave.send(
        actions::QUEUE_EVENT,
        vec![wire::to_value(&answer).unwrap()],
    );

    assert_eq!(check.await.unwrap().unwrap(), CheckState::Running);
    // The answer also reaches the subscribers as a plain event.
    assert_eq!(ui_a.recv_event(), answer);
    assert_eq!(ui_b.recv_event(), answer);

    // Bounded-wait check against a silent slave runs out and reports the
    // component unreachable; exactly one check frame was sent.
    let started = Instant::now();
    let state = master
        .handle
        .check_component("c2", "h1", Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(state, CheckState::Unreachable);
    assert!(started.elapsed() >= Duration::from_secs(1));

    let envelope = slave.recv();
    assert_eq!(envelope.action.as_deref(), Some(actions::CHECK));
    assert_eq!(wire::arg::<String>(&envelope.args, 0).unwrap(), "c2");

    // A dying slave socket becomes a disconnect event for the UI.
    drop(slave);
    assert!(matches!(
        ui_a.recv_event(),
        ClusterEvent::SlaveDisconnect { host_name, .. } if host_name == "h1"
    ));
    assert!(matches!(
        ui_b.recv_event(),
        ClusterEvent::SlaveDisconnect { .. }
    ));

    // An unsubscribing client is dropped from the fan-out set.
    ui_a.send(actions::UNSUBSCRIBE, vec![]);
    assert!(ui_a.eof());

    master
        .local_tx
        .send(ClusterEvent::ConfigReload)
        .unwrap();
    assert_eq!(ui_b.recv_event(), ClusterEvent::ConfigReload);

    // Graceful shutdown: both reactors drain and exit.
    master.shutdown.cancel();
    for task in master.tasks {
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("reactor exits after cancellation")
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn operations_on_unknown_hosts_fail_fast() {
    let master = start_master().await;

    let err = master.handle.start_component("c1", "ghost").unwrap_err();
    assert!(matches!(
        err,
        hyperion_server::Error::SlaveNotReachable(host) if host == "ghost"
    ));

    master.shutdown.cancel();
    for task in master.tasks {
        tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("reactor exits after cancellation")
            .unwrap();
    }
}
