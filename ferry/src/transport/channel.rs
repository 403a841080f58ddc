//! In-process transport: two endpoints joined by unbounded channels.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Inbound, InboundTx, Transport, TransportEvent, closed};

/// One end of an in-process pair.
#[derive(Debug)]
pub struct ChannelTransport {
    /// The peer's inbound queue.
    peer: InboundTx,
    /// Our own inbound queue, told when we close.
    own: InboundTx,
    /// Set once closed.
    closed: AtomicBool,
}

impl Transport for ChannelTransport {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed());
        }
        self.peer
            .send(TransportEvent::Message(frame))
            .map_err(|_| closed())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.peer.send(TransportEvent::Close);
        let _ = self.own.send(TransportEvent::Close);
    }
}

/// Creates two connected endpoints. Both inbound queues start with
/// [`TransportEvent::Ready`].
pub fn pair() -> ((ChannelTransport, Inbound), (ChannelTransport, Inbound)) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    let _ = a_tx.send(TransportEvent::Ready);
    let _ = b_tx.send(TransportEvent::Ready);

    let a = ChannelTransport {
        peer: b_tx.clone(),
        own: a_tx.clone(),
        closed: AtomicBool::new(false),
    };
    let b = ChannelTransport {
        peer: a_tx,
        own: b_tx,
        closed: AtomicBool::new(false),
    };
    ((a, a_rx), (b, b_rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_and_close_propagates() {
        let ((a, mut a_in), (b, mut b_in)) = pair();
        assert_eq!(a_in.recv().await, Some(TransportEvent::Ready));
        assert_eq!(b_in.recv().await, Some(TransportEvent::Ready));

        a.send(Bytes::from_static(b"hi")).unwrap();
        assert_eq!(
            b_in.recv().await,
            Some(TransportEvent::Message(Bytes::from_static(b"hi")))
        );

        a.close();
        assert_eq!(b_in.recv().await, Some(TransportEvent::Close));
        assert_eq!(a_in.recv().await, Some(TransportEvent::Close));
        assert!(a.send(Bytes::new()).is_err());
        drop(b);
    }
}
