//! Poll-based reactor. This is a single-threaded reactor using a `poll` loop.
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::net;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time;

use flume as chan;
use popol::Event;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::Error;
use crate::registry::Registry;
use crate::socket::Socket;
use crate::{ConnId, DisconnectReason, Io, Service, Source, Wake};

/// Maximum amount of time to wait for i/o.
const WAIT_TIMEOUT: time::Duration = time::Duration::from_secs(1);
/// Socket read buffer size.
const READ_BUFFER_SIZE: usize = 1024 * 192;
/// Upper bound on flushing pending outbound queues after cancellation.
const DRAIN_TIMEOUT: time::Duration = time::Duration::from_secs(5);
/// Poll granularity of the drain phase.
const DRAIN_TICK: time::Duration = time::Duration::from_millis(100);

#[derive(Clone)]
pub struct Waker(Arc<popol::Waker>);

impl Waker {
    fn new(sources: &mut popol::Sources<Source>) -> io::Result<Self> {
        let waker = Arc::new(popol::Waker::new(sources, Source::Waker)?);

        Ok(Self(waker))
    }
}

impl Wake for Waker {
    fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}

/// A single-threaded non-blocking reactor serving one listening socket and
/// its accepted peers.
pub struct Reactor {
    peers: HashMap<ConnId, Socket<net::TcpStream>>,
    sources: popol::Sources<Source>,
    waker: Waker,
    registry: Arc<Registry>,
    listening: chan::Sender<net::SocketAddr>,
}

impl Reactor {
    /// Construct a new reactor around a shared connection registry. The
    /// address the listener ends up bound to is published on `listening` —
    /// for a port-zero bind this is the only way to learn the chosen port.
    pub fn new(
        registry: Arc<Registry>,
        listening: chan::Sender<net::SocketAddr>,
    ) -> Result<Self, io::Error> {
        let mut sources = popol::Sources::new();
        let waker = Waker::new(&mut sources)?;

        Ok(Self {
            peers: HashMap::new(),
            sources,
            waker,
            registry,
            listening,
        })
    }

    /// Return a new waker.
    ///
    /// Used to wake up the main event loop.
    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    /// Run the given service with the reactor.
    ///
    /// Returns after `cancellation` fires and the outbound queues have been
    /// drained, or on a fatal error.
    pub async fn run<S>(
        &mut self,
        listen_addr: &SocketAddr,
        mut service: S,
        cancellation: CancellationToken,
    ) -> Result<(), Error>
    where
        S: Service + Send,
    {
        let listener = listen(listen_addr)?;
        let local_addr = listener.local_addr()?;

        self.sources
            .register(Source::Listener, &listener, popol::interest::READ);
        self.listening.send_async(local_addr).await.ok();

        debug!(target: "net", "Listening for incoming connections on {}", local_addr);

        // I/O readiness events populated by `popol::Sources::wait_timeout`.
        let mut events = Vec::with_capacity(32);

        loop {
            select! {
                _ = cancellation.cancelled() => {
                    trace!("Reactor cancelled");
                    break;
                }
                result = self.iteration(&mut events, &mut service, &listener) => {
                    if let Err(e) = result {
                        return Err(e);
                    }
                }
            }
        }
        self.drain();

        Ok(())
    }

    async fn iteration<S>(
        &mut self,
        events: &mut Vec<Event<Source>>,
        service: &mut S,
        listener: &net::TcpListener,
    ) -> Result<(), Error>
    where
        S: Service + Send,
    {
        tokio::task::yield_now().await;

        trace!(
            "Polling {} source(s), waking up in {:?}..",
            self.sources.len(),
            WAIT_TIMEOUT,
        );

        let result = self.sources.wait_timeout(events, WAIT_TIMEOUT); // Blocking.

        match result {
            Ok(n) => {
                trace!("Woke up with {n} source(s) ready");

                for event in events.drain(..) {
                    match &event.key {
                        Source::Peer(addr) => {
                            let addr = *addr;

                            if event.is_invalid() {
                                // File descriptor was closed and is invalid.
                                // Nb. This shouldn't happen. It means the source wasn't
                                // properly unregistered, or there is a duplicate source.
                                error!(target: "net", "{}: Socket is invalid, removing", addr);

                                self.sources.unregister(&event.key);
                                self.peers.remove(&addr);
                                self.registry.unregister(&addr);
                                continue;
                            }
                            if event.is_error() || event.is_hangup() {
                                // Let the subsequent read fail.
                                trace!("{}: Socket error triggered: {:?}", addr, event);
                            }

                            if event.is_writable() {
                                self.handle_writable(addr, service).await;
                            }
                            if event.is_readable() {
                                self.handle_readable(addr, service).await;
                            }
                        }
                        Source::Listener => self.handle_listener(listener, service)?,
                        Source::Waker => {
                            trace!("Woken up by waker");
                            popol::Waker::reset(event.source).ok();
                        }
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {}
            Err(err) => return Err(err.into()),
        }

        service.tick().await;
        self.process(service).await;
        self.arm_writes();

        Ok(())
    }

    /// Process service instructions emitted during this iteration.
    async fn process<S>(&mut self, service: &mut S)
    where
        S: Service + Send,
    {
        while let Some(io) = service.next() {
            match io {
                Io::Disconnect(addr, reason) => {
                    // Shutdown the connection, ignoring any potential errors.
                    // If the socket was already disconnected, this will yield
                    // an error that is safe to ignore (`ENOTCONN`).
                    self.peers.get(&addr).and_then(|peer| peer.disconnect().ok());
                    self.unregister_peer(addr, reason, service).await;
                }
            }
        }
    }

    /// Re-arm write interest for every connection with outbound traffic
    /// waiting. Interest is dropped again once the socket has flushed, so
    /// an idle reactor blocks in the readiness wait instead of spinning.
    fn arm_writes(&mut self) {
        for (addr, outbox) in self.registry.queues() {
            let buffered = self.peers.get(&addr).map_or(false, Socket::has_pending);

            if buffered || !outbox.is_empty() {
                if let Some(source) = self.sources.get_mut(&Source::Peer(addr)) {
                    source.set(popol::interest::WRITE);
                }
            }
        }
    }

    fn handle_listener<S>(
        &mut self,
        listener: &net::TcpListener,
        service: &mut S,
    ) -> Result<(), Error>
    where
        S: Service + Send,
    {
        loop {
            let (conn, addr) = match listener.accept() {
                Ok((conn, addr)) => (conn, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!(target: "net", "Accept error: {}", e.to_string());
                    break;
                }
            };
            trace!("{}: Accepting peer connection", addr);

            conn.set_nonblocking(true)?;

            self.sources
                .register(Source::Peer(addr), &conn, popol::interest::ALL);
            self.peers.insert(addr, Socket::from(conn, addr));
            self.registry.register(addr);

            service.connected(addr);
        }

        Ok(())
    }

    async fn handle_readable<S>(&mut self, addr: ConnId, service: &mut S)
    where
        S: Service + Send,
    {
        // Nb. If the socket was readable and writable at the same time, and it was
        // disconnected during an attempt to write, it will no longer be registered
        // and hence available for reads.
        let Some(socket) = self.peers.get_mut(&addr) else {
            return;
        };

        trace!("{}: Socket is readable", addr);

        // Nb. Since `poll`, which this reactor is based on, is *level-triggered*,
        // we will be notified again if there is still data to be read on the socket.
        // Hence, there is no use in putting this socket read in a loop, as the second
        // invocation would likely block.
        let mut buffer = [0; READ_BUFFER_SIZE];

        match socket.read(&mut buffer) {
            Ok(count) => {
                if count > 0 {
                    service
                        .message_received(&addr, Cow::Borrowed(&buffer[..count]))
                        .await;
                } else {
                    // If we get zero bytes read as a return value, it means the peer
                    // has performed an orderly shutdown.
                    socket.disconnect().ok();

                    self.unregister_peer(addr, DisconnectReason::PeerGone, service)
                        .await;
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                // This shouldn't normally happen, since this function is only called
                // when there's data on the socket.
                trace!("{}: Spurious read readiness", addr);
            }
            Err(err) => {
                trace!("{}: Read error: {}", addr, err.to_string());

                socket.disconnect().ok();
                self.unregister_peer(
                    addr,
                    DisconnectReason::ConnectionError(Arc::new(err)),
                    service,
                )
                .await;
            }
        }
    }

    async fn handle_writable<S>(&mut self, addr: ConnId, service: &mut S)
    where
        S: Service + Send,
    {
        let Some(socket) = self.peers.get_mut(&addr) else {
            return;
        };

        trace!("{}: Socket is writable", addr);

        // Top up the socket from the connection's queue, one message at a
        // time; a partially written message keeps priority over the queue.
        if !socket.has_pending() {
            if let Some(msg) = self.registry.outbox(&addr).and_then(|o| o.try_recv()) {
                socket.push(&msg);
            }
        }

        match socket.flush() {
            // In this case, we've written all the data, we are no longer
            // interested in writing to this socket.
            Ok(()) => {
                if let Some(source) = self.sources.get_mut(&Source::Peer(addr)) {
                    source.unset(popol::interest::WRITE);
                }
            }
            // In this case, the write couldn't complete. Leave the `WRITE`
            // interest armed to be notified when the socket is ready again.
            Err(err)
                if [io::ErrorKind::WouldBlock, io::ErrorKind::WriteZero].contains(&err.kind()) =>
            {
                if let Some(source) = self.sources.get_mut(&Source::Peer(addr)) {
                    source.set(popol::interest::WRITE);
                }
            }
            Err(err) => {
                error!(target: "net", "{}: Write error: {}", addr, err.to_string());

                socket.disconnect().ok();
                self.unregister_peer(
                    addr,
                    DisconnectReason::ConnectionError(Arc::new(err)),
                    service,
                )
                .await;
            }
        }
    }

    /// Unregister a peer: registry entry, readiness source and socket go
    /// together, so no message can be enqueued for a closed connection.
    async fn unregister_peer<S>(&mut self, addr: ConnId, reason: DisconnectReason, service: &mut S)
    where
        S: Service + Send,
    {
        let identity = self.registry.unregister(&addr);
        self.sources.unregister(&Source::Peer(addr));
        self.peers.remove(&addr);

        service.disconnected(&addr, identity, reason).await;
    }

    /// Flush whatever the outbound queues still hold, bounded by
    /// [`DRAIN_TIMEOUT`], then close all sockets.
    fn drain(&mut self) {
        debug!(
            target: "net",
            "Draining {} pending message(s) before closing..",
            self.registry.pending()
        );
        let deadline = time::Instant::now() + DRAIN_TIMEOUT;

        loop {
            let mut dead = Vec::new();

            for (addr, socket) in self.peers.iter_mut() {
                let outbox = self.registry.outbox(addr);

                loop {
                    if !socket.has_pending() {
                        match outbox.as_ref().and_then(|o| o.try_recv()) {
                            Some(msg) => socket.push(&msg),
                            None => break,
                        }
                    }
                    match socket.flush() {
                        Ok(()) => {}
                        Err(err)
                            if [io::ErrorKind::WouldBlock, io::ErrorKind::WriteZero]
                                .contains(&err.kind()) =>
                        {
                            break;
                        }
                        Err(err) => {
                            trace!("{}: Write error during drain: {}", addr, err.to_string());

                            socket.disconnect().ok();
                            dead.push(*addr);
                            break;
                        }
                    }
                }
            }

            for addr in &dead {
                self.sources.unregister(&Source::Peer(*addr));
                self.peers.remove(addr);
                self.registry.unregister(addr);
            }

            let unsent = self.registry.pending()
                + self.peers.values().filter(|s| s.has_pending()).count();

            if unsent == 0 {
                debug!(target: "net", "..all pending messages sent");
                break;
            }
            if time::Instant::now() >= deadline {
                debug!(target: "net", "..dropping {} undelivered message(s)", unsent);
                break;
            }
            std::thread::sleep(DRAIN_TICK);
        }

        for (_, socket) in self.peers.drain() {
            socket.disconnect().ok();
        }
    }
}

/// Listen for connections on the given address, with address reuse.
fn listen(addr: &SocketAddr) -> Result<net::TcpListener, Error> {
    use socket2::{Domain, Socket, Type};

    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let sock = Socket::new(domain, Type::STREAM, None)?;

    sock.set_reuse_address(true)?;

    match sock.bind(&(*addr).into()) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AddrInUse => return Err(Error::BindInUse(*addr)),
        Err(e) => {
            return Err(Error::Bind {
                addr: *addr,
                source: e,
            })
        }
    }
    sock.listen(128)?;

    let listener: net::TcpListener = sock.into();
    listener.set_nonblocking(true)?;

    Ok(listener)
}
