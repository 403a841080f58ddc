//! A live bridge connection: one transport, one Reference Table, one set of
//! pending requests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use ferry_proto::{ActionRequest, Codec, Json, JsonMap, Message, Verb};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::bridge::{Notification, ProxyKind};
use crate::error::{Error, Result};
use crate::pending::Pending;
use crate::proxy::{ChainHandle, Proxy};
use crate::table::ReferenceTable;
use crate::transport::Transport;
use crate::value::{Local, Map, Value};

/// Capacity of the notification channel.
const NOTIFY_CAPACITY: usize = 64;

/// Source of connection ids.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a bridge connection. Cheap to clone.
///
/// Proxy handles keep their connection alive. Closing it fails every
/// pending request and drops the Reference Table.
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

/// State shared by all handles to one connection.
pub(crate) struct Shared {
    /// Process-unique id, for logs.
    id: u64,
    /// Values this side has sent by reference.
    table: ReferenceTable,
    /// Requests awaiting a reply.
    pending: Pending,
    /// Outbound frames.
    transport: Arc<dyn Transport>,
    /// Payload codec.
    codec: Arc<dyn Codec>,
    /// Handle flavour minted for inbound descriptors.
    proxy: ProxyKind,
    /// Root namespace visible to the peer.
    context: Local,
    /// Set once closed.
    closed: AtomicBool,
    /// Lifecycle and traffic notifications.
    notify: broadcast::Sender<Notification>,
    /// Log every frame payload.
    debug: bool,
}

impl Connection {
    /// Creates a connection over `transport`. The caller drives its
    /// inbound queue.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        codec: Arc<dyn Codec>,
        proxy: ProxyKind,
        context: Local,
        debug: bool,
    ) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self(Arc::new(Shared {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            table: ReferenceTable::new(),
            pending: Pending::default(),
            transport,
            codec,
            proxy,
            context,
            closed: AtomicBool::new(false),
            notify,
            debug,
        }))
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Values this side has sent by reference.
    pub fn table(&self) -> &ReferenceTable {
        &self.0.table
    }

    /// Root namespace visible to the peer.
    pub fn context(&self) -> &Local {
        &self.0.context
    }

    /// Handle flavour minted for inbound descriptors.
    pub fn proxy_kind(&self) -> ProxyKind {
        self.0.proxy
    }

    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::Acquire)
    }

    /// Number of requests awaiting a reply.
    pub fn pending(&self) -> usize {
        self.0.pending.len()
    }

    /// Subscribes to lifecycle and traffic notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.0.notify.subscribe()
    }

    /// Whether both handles refer to one connection.
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Issues one action and waits for its reply.
    ///
    /// Fails with [`Error::ConnectionClosed`] if the connection is closed
    /// before or while waiting, and with [`Error::Remote`] if the peer
    /// reports an error.
    pub async fn request(&self, verb: Verb, req: ActionRequest) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let reply = self.0.pending.insert(id.clone());
        // Close may have drained the table between the check and insert.
        if self.is_closed() {
            self.0.pending.cancel(&id);
            return Err(Error::ConnectionClosed);
        }

        let sent = Message::action(id.as_str(), verb, &req)
            .map_err(Error::from)
            .and_then(|msg| self.send(&msg));
        if let Err(e) = sent {
            self.0.pending.cancel(&id);
            return Err(e);
        }
        trace!(conn = self.0.id, %id, %verb, "request sent");

        let json = reply.await.map_err(|_| Error::ConnectionClosed)??;
        self.decode(json)
    }

    /// Looks `name` up in the peer's Context with one round trip.
    pub async fn evaluate(&self, name: &str) -> Result<Value> {
        let req = ActionRequest::default().with_value(Json::String(name.to_owned()));
        self.request(Verb::Evaluate, req).await
    }

    /// Lazy handle to the peer's Context; nothing is sent until it is used.
    pub fn root(&self) -> ChainHandle {
        ChainHandle::root(self.clone())
    }

    /// Lazy handle to `name` in the peer's Context.
    pub fn global(&self, name: &str) -> ChainHandle {
        self.root().attr(name)
    }

    /// Reaches `name` in the peer's Context the way this connection is
    /// configured: a round trip for direct handles, a lazy chain otherwise.
    pub async fn lookup(&self, name: &str) -> Result<Value> {
        match self.0.proxy {
            ProxyKind::Direct => self.evaluate(name).await,
            ProxyKind::Chain => Ok(Value::Remote(Proxy::Chain(self.global(name)))),
        }
    }

    /// Sends a fire-and-forget event.
    pub fn emit(&self, name: &str, payload: &Map) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let fields: JsonMap = payload
            .iter()
            .map(|(k, v)| (k.clone(), self.encode(v)))
            .collect();
        self.send(&Message::event(name, fields))
    }

    /// Closes the connection: fails pending requests, clears the Reference
    /// Table and stops the transport. Idempotent.
    pub fn close(&self) {
        if self.0.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let failed = self.0.pending.fail_all(&Error::ConnectionClosed);
        self.0.table.clear();
        self.0.transport.close();
        info!(conn = self.0.id, failed, "connection closed");
        self.notify(Notification::Closed);
    }

    /// Frames and sends one message.
    pub(crate) fn send(&self, msg: &Message) -> Result<()> {
        let frame = ferry_proto::frame(self.0.codec.as_ref(), msg)?;
        if self.0.debug {
            debug!(
                conn = self.0.id,
                frame = %String::from_utf8_lossy(&frame),
                "frame out"
            );
        }
        self.0.transport.send(Bytes::from(frame))?;
        Ok(())
    }

    /// Completes a pending request. Returns `false` for unknown ids.
    pub(crate) fn resolve(&self, id: &str, outcome: std::result::Result<Json, Error>) -> bool {
        self.0.pending.resolve(id, outcome)
    }

    /// Fails every pending request without closing.
    pub(crate) fn fail_pending(&self, err: &Error) -> usize {
        self.0.pending.fail_all(err)
    }

    /// Publishes a notification; nobody listening is fine.
    pub(crate) fn notify(&self, n: Notification) {
        let _ = self.0.notify.send(n);
    }

    /// Payload codec.
    pub(crate) fn codec(&self) -> Arc<dyn Codec> {
        Arc::clone(&self.0.codec)
    }

    /// Whether frame payloads are logged.
    pub(crate) fn debug(&self) -> bool {
        self.0.debug
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.0.id)
            .field("proxy", &self.0.proxy)
            .field("closed", &self.is_closed())
            .field("pending", &self.0.pending.len())
            .field("references", &self.0.table.len())
            .finish_non_exhaustive()
    }
}
