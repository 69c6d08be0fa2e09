//! Serving core of the Hyperion master.
//!
//! Each server runs one single-threaded poll reactor that owns its
//! listening socket and every accepted peer socket. What the bytes mean is
//! decided by a [`Service`]; outbound traffic flows through the shared
//! [`Registry`] of per-connection queues, drained exclusively by the
//! reactor.
use std::borrow::Cow;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

pub use reactor::{Reactor, Waker};
pub use registry::{Outbox, Registry};

pub mod error;
pub mod reactor;
pub mod registry;
mod socket;

/// Identifier of one accepted connection: its remote address.
pub type ConnId = SocketAddr;

/// The kinds of I/O sources a reactor waits on.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Source {
    /// An accepted peer socket.
    Peer(ConnId),
    /// The listening socket.
    Listener,
    /// The cross-task wakeup pipe.
    Waker,
}

/// Why a connection was closed.
#[derive(Debug, Clone)]
pub enum DisconnectReason {
    /// The peer performed an orderly shutdown or vanished.
    PeerGone,
    /// An I/O or framing error broke the stream.
    ConnectionError(Arc<io::Error>),
    /// The peer asked to unsubscribe.
    Unsubscribed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerGone => write!(f, "connection lost"),
            Self::ConnectionError(err) => write!(f, "{}", err),
            Self::Unsubscribed => write!(f, "unsubscribed"),
        }
    }
}

/// Instruction from a service back to its reactor, drained after every
/// batch of service calls.
#[derive(Debug)]
pub enum Io {
    /// Close the connection and forget its queue.
    Disconnect(ConnId, DisconnectReason),
}

/// Interrupts a reactor's readiness wait from another task.
///
/// Wake after enqueuing outbound messages so they are flushed before the
/// current wait runs out.
pub trait Wake: Send + Sync + Clone {
    fn wake(&self) -> io::Result<()>;
}

/// A server protocol drivable by the reactor.
///
/// The reactor owns the sockets and calls into the service with
/// connection-lifecycle changes and received bytes. Instructions in the
/// other direction are emitted through the [`Iterator`] implementation and
/// processed once per reactor iteration.
#[async_trait]
pub trait Service: Iterator<Item = Io> {
    /// A new inbound connection was accepted and registered.
    fn connected(&mut self, id: ConnId);

    /// Bytes arrived on a connection. Chunking is arbitrary; the service
    /// accumulates until frames are complete.
    async fn message_received(&mut self, id: &ConnId, bytes: Cow<'_, [u8]>);

    /// A connection was closed and unregistered. `identity` is the name the
    /// connection had authenticated under, if any.
    async fn disconnected(&mut self, id: &ConnId, identity: Option<String>, reason: DisconnectReason);

    /// Called once per reactor iteration, after I/O was processed.
    async fn tick(&mut self);
}
