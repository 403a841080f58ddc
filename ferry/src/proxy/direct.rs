//! Direct handle: one request per operation.

use async_trait::async_trait;
use ferry_proto::{ActionRequest, Json, ObjType, ProxyDescriptor, StackKey, Verb};

use super::{NameFlags, RemoteObject};
use crate::connection::Connection;
use crate::error::Result;
use crate::host::Args;
use crate::value::Value;

/// Handle to one entry of the peer's Reference Table.
#[derive(Debug, Clone)]
pub struct DirectHandle {
    /// Owning connection.
    conn: Connection,
    /// Peer's Reference Table key.
    location: String,
    /// Category reported by the peer.
    obj_type: ObjType,
}

impl DirectHandle {
    /// Handle to `location` on the peer.
    pub(crate) fn new(conn: Connection, location: String, obj_type: ObjType) -> Self {
        Self {
            conn,
            location,
            obj_type,
        }
    }

    /// Owning connection.
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Peer's Reference Table key.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Category reported by the peer.
    pub const fn obj_type(&self) -> &ObjType {
        &self.obj_type
    }

    /// Reverse descriptor pointing at this handle's own location.
    pub fn descriptor(&self) -> ProxyDescriptor {
        ProxyDescriptor::reverse(Some(self.location.clone()), Vec::new())
    }

    /// Reads element `i` (`get_proxy_index`).
    pub async fn index(&self, i: u64) -> Result<Value> {
        let req = self.base().with_target(StackKey::Index(i));
        self.conn.request(Verb::GetProxyIndex, req).await
    }

    /// Writes element `i` (`set_proxy_index`).
    pub async fn set_index(&self, i: u64, value: Value) -> Result<()> {
        let req = self
            .base()
            .with_target(StackKey::Index(i))
            .with_value(self.conn.encode(&value));
        self.conn.request(Verb::SetProxyIndex, req).await.map(drop)
    }

    /// Inspect form computed by the owner.
    pub async fn repr(&self) -> Result<String> {
        self.repr_with(false).await
    }

    /// Display (`String()`) form computed by the owner.
    pub async fn to_display(&self) -> Result<String> {
        self.repr_with(true).await
    }

    /// The value itself; plain data arrives by copy.
    pub async fn primitive(&self) -> Result<Value> {
        self.conn.request(Verb::GetPrimitive, self.base()).await
    }

    /// Settles the remote value as an asynchronous result.
    pub async fn settle(&self) -> Result<Value> {
        self.conn.request(Verb::AwaitProxy, self.base()).await
    }

    /// Request addressed at this handle.
    fn base(&self) -> ActionRequest {
        ActionRequest::at(Some(self.location.clone()))
    }

    /// `get_proxy_repr` with the given form.
    async fn repr_with(&self, string: bool) -> Result<String> {
        let mut req = self.base();
        req.string = string;
        let v = self.conn.request(Verb::GetProxyRepr, req).await?;
        Ok(v.as_str().map_or_else(|| v.display(), str::to_owned))
    }

    /// Encodes call arguments.
    fn encode_args(&self, args: &Args) -> (Vec<Json>, ferry_proto::JsonMap) {
        let positional = self.conn.encode_all(&args.positional);
        let keyword = args
            .keyword
            .iter()
            .map(|(k, v)| (k.clone(), self.conn.encode(v)))
            .collect();
        (positional, keyword)
    }
}

#[async_trait]
impl RemoteObject for DirectHandle {
    async fn get(&self, name: &str) -> Result<Value> {
        let flags = NameFlags::parse(name);
        if flags.reserved {
            return Ok(Value::Null);
        }
        let mut req = self.base().with_target(StackKey::parse(&flags.name));
        req.isolate = flags.isolate;
        req.use_kwargs = flags.use_kwargs;
        self.conn.request(Verb::GetProxyAttribute, req).await
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        let req = self
            .base()
            .with_target(StackKey::parse(name))
            .with_value(self.conn.encode(&value));
        self.conn.request(Verb::SetProxyAttribute, req).await.map(drop)
    }

    async fn call(&self, args: Args) -> Result<Value> {
        let (positional, keyword) = self.encode_args(&args);
        let mut req = self.base().with_args(positional, keyword);
        req.use_kwargs = !req.kwargs.is_empty();
        self.conn.request(Verb::CallProxy, req).await
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        let (positional, keyword) = self.encode_args(&args);
        let mut req = self.base().with_args(positional, keyword);
        req.use_kwargs = !req.kwargs.is_empty();
        self.conn.request(Verb::CallProxyConstructor, req).await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let req = self.base().with_target(StackKey::parse(name));
        let v = self.conn.request(Verb::HasProxyAttribute, req).await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let v = self.conn.request(Verb::GetProxyAttributes, self.base()).await?;
        Ok(names(&v))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let req = self.base().with_target(StackKey::parse(name));
        let v = self.conn.request(Verb::DeleteProxyAttribute, req).await?;
        Ok(v.as_bool().unwrap_or(false))
    }
}

impl PartialEq for DirectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn.same(&other.conn) && self.location == other.location
    }
}

/// Member names from a `get_proxy_attributes` reply.
pub(crate) fn names(v: &Value) -> Vec<String> {
    v.as_array()
        .map(|items| items.iter().map(Value::display).collect())
        .unwrap_or_default()
}
