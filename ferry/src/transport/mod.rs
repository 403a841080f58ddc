//! Transport contract.
//!
//! A transport moves opaque frame bytes. Outbound frames go through
//! [`Transport::send`]; inbound bytes and lifecycle changes arrive as
//! [`TransportEvent`]s on an [`Inbound`] queue owned by the connection.
//! Deliveries may split or merge frames arbitrarily.

use std::fmt;
use std::io;

use bytes::Bytes;
use tokio::sync::mpsc;

pub mod channel;
pub mod stream;

/// Outbound half of a transport.
pub trait Transport: Send + Sync + fmt::Debug + 'static {
    /// Queues one encoded frame for delivery.
    fn send(&self, frame: Bytes) -> io::Result<()>;

    /// Stops the transport. Further sends fail.
    fn close(&self) {}
}

/// Notification from the inbound half of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportEvent {
    /// The peer is reachable.
    Ready,
    /// Raw bytes; not necessarily a whole frame.
    Message(Bytes),
    /// The peer went away.
    Close,
    /// The transport failed.
    Error(String),
}

/// Inbound event queue of one transport.
pub type Inbound = mpsc::UnboundedReceiver<TransportEvent>;

/// Sender side of an [`Inbound`] queue.
pub(crate) type InboundTx = mpsc::UnboundedSender<TransportEvent>;

/// Error returned by sends on a closed transport.
pub(crate) fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")
}
