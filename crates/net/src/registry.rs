//! Connection registry: per-connection outbound queues and, on the slave
//! server, the identities established by `auth`.
use std::collections::HashMap;
use std::sync::Mutex;

use flume as chan;

use crate::ConnId;

/// One connection's outbound queue. Any number of tasks enqueue framed
/// messages; only the owning reactor dequeues.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: chan::Sender<Vec<u8>>,
    rx: chan::Receiver<Vec<u8>>,
}

impl Outbox {
    fn new() -> Self {
        let (tx, rx) = chan::unbounded();
        Self { tx, rx }
    }

    pub fn send(&self, msg: Vec<u8>) {
        // Both halves live as long as the registry entry.
        self.tx.send(msg).ok();
    }

    pub fn try_recv(&self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }
}

/// Registry of the live connections of one server.
///
/// Shared between the reactor and the worker tasks handling requests; every
/// operation takes one short-lived lock. The reactor is the only caller of
/// [`Registry::register`] and [`Registry::unregister`], so a connection's
/// queue exists exactly as long as its socket is registered.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    queues: HashMap<ConnId, Outbox>,
    identities: HashMap<ConnId, String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the outbound queue for a freshly accepted connection.
    pub fn register(&self, id: ConnId) {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.queues.insert(id, Outbox::new());
    }

    /// Drop the connection's queue and identity. Pending messages are
    /// discarded. Returns the identity the connection had, if any.
    pub fn unregister(&self, id: &ConnId) -> Option<String> {
        let mut inner = self.inner.lock().expect("registry lock");
        inner.queues.remove(id);
        inner.identities.remove(id)
    }

    /// Enqueue a message for one connection. Returns `false` when the
    /// connection is gone.
    pub fn enqueue(&self, id: &ConnId, msg: Vec<u8>) -> bool {
        let inner = self.inner.lock().expect("registry lock");
        match inner.queues.get(id) {
            Some(outbox) => {
                outbox.send(msg);
                true
            }
            None => false,
        }
    }

    /// Enqueue a copy of the message on every connection.
    pub fn broadcast(&self, msg: &[u8]) {
        let inner = self.inner.lock().expect("registry lock");
        for outbox in inner.queues.values() {
            outbox.send(msg.to_vec());
        }
    }

    /// Snapshot of every connection's queue.
    pub fn queues(&self) -> Vec<(ConnId, Outbox)> {
        let inner = self.inner.lock().expect("registry lock");
        inner
            .queues
            .iter()
            .map(|(id, outbox)| (*id, outbox.clone()))
            .collect()
    }

    /// The outbound queue of one connection.
    pub fn outbox(&self, id: &ConnId) -> Option<Outbox> {
        let inner = self.inner.lock().expect("registry lock");
        inner.queues.get(id).cloned()
    }

    /// Record the identity a connection authenticated under. The mapping
    /// stays one-to-one: any other connection holding the same identity
    /// loses it, and a repeated `auth` on the same connection overwrites.
    pub fn set_identity(&self, id: ConnId, identity: impl Into<String>) {
        let identity = identity.into();
        let mut inner = self.inner.lock().expect("registry lock");
        inner.identities.retain(|_, existing| *existing != identity);
        inner.identities.insert(id, identity);
    }

    /// The identity of a connection, if it has authenticated.
    pub fn identity_of(&self, id: &ConnId) -> Option<String> {
        let inner = self.inner.lock().expect("registry lock");
        inner.identities.get(id).cloned()
    }

    /// Find the connection authenticated under `identity`.
    pub fn find_by_identity(&self, identity: &str) -> Option<ConnId> {
        let inner = self.inner.lock().expect("registry lock");
        inner
            .identities
            .iter()
            .find(|(_, existing)| existing.as_str() == identity)
            .map(|(id, _)| *id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock");
        inner.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of queued outbound messages, across all connections.
    /// Zero means a shutdown drain has nothing left to do.
    pub fn pending(&self) -> usize {
        let inner = self.inner.lock().expect("registry lock");
        inner.queues.values().map(Outbox::len).sum()
    }
}
