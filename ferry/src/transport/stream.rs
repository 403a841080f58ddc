//! Transport over any byte stream (TCP, Unix sockets, pipes).

use std::io;
use std::sync::{Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Inbound, InboundTx, Transport, TransportEvent, closed};

/// Read buffer size per delivery.
const READ_CHUNK: usize = 8 * 1024;

/// Outbound half of a stream transport.
#[derive(Debug)]
pub struct StreamTransport {
    /// Frames for the writer task; `None` once closed.
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl Transport for StreamTransport {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        let guard = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .ok_or_else(closed)?
            .send(frame)
            .map_err(|_| closed())
    }

    fn close(&self) {
        // Dropping the sender lets the writer flush and shut down.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

/// Splits `io` into a transport and its inbound queue.
///
/// Spawns one reader and one writer task; must be called inside a Tokio
/// runtime. The queue starts with [`TransportEvent::Ready`] and ends with
/// [`TransportEvent::Close`] when the peer hangs up or the stream fails.
pub fn split<S>(io: S) -> (StreamTransport, Inbound)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (r, w) = tokio::io::split(io);
    let (events, inbound) = mpsc::unbounded_channel();
    let (tx, rx) = mpsc::unbounded_channel();

    let _ = events.send(TransportEvent::Ready);
    tokio::spawn(read_loop(r, events.clone()));
    tokio::spawn(write_loop(w, rx, events));

    let transport = StreamTransport {
        tx: Mutex::new(Some(tx)),
    };
    (transport, inbound)
}

/// Forwards raw reads until EOF or error.
async fn read_loop(mut r: impl AsyncRead + Unpin, events: InboundTx) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        buf.reserve(READ_CHUNK);
        match r.read_buf(&mut buf).await {
            Ok(0) => {
                debug!("stream: peer closed");
                break;
            }
            Ok(_) => {
                if events.send(TransportEvent::Message(buf.split().freeze())).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "stream: read failed");
                let _ = events.send(TransportEvent::Error(e.to_string()));
                break;
            }
        }
    }
    let _ = events.send(TransportEvent::Close);
}

/// Writes queued frames until the transport is closed.
async fn write_loop(
    mut w: impl AsyncWrite + Unpin,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    events: InboundTx,
) {
    while let Some(frame) = rx.recv().await {
        let res = async {
            w.write_all(&frame).await?;
            w.flush().await
        }
        .await;
        if let Err(e) = res {
            warn!(error = %e, "stream: write failed");
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Close);
            return;
        }
    }
    let _ = w.shutdown().await;
}
