//! Chain handle: an immutable target plus member path.

use std::fmt;
use std::future::IntoFuture;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ferry_proto::{ActionRequest, JsonMap, ObjType, ProxyDescriptor, StackKey, Verb};
use futures::future::{BoxFuture, FutureExt};
use tracing::debug;

use super::direct::names;
use super::{NameFlags, RemoteObject};
use crate::connection::Connection;
use crate::error::Result;
use crate::host::Args;
use crate::value::{Map, Value};

/// Lazy handle: navigation builds a longer path without any traffic; the
/// whole path travels in one request when the handle is awaited, called or
/// constructed.
#[derive(Clone)]
pub struct ChainHandle {
    /// Owning connection.
    conn: Connection,
    /// Peer's Reference Table key; `None` roots the path in the Context.
    location: Option<String>,
    /// Category reported by the peer, for handles decoded from descriptors.
    obj_type: ObjType,
    /// Accumulated member path.
    stack: Arc<[StackKey]>,
    /// Member names seen by the last enumeration of this path, shared with
    /// clones but not with derived handles.
    keys: Arc<Mutex<Vec<String>>>,
}

impl ChainHandle {
    /// Empty path rooted in the peer's Context.
    pub(crate) fn root(conn: Connection) -> Self {
        Self {
            conn,
            location: None,
            obj_type: ObjType::object(),
            stack: Arc::from(Vec::new()),
            keys: Arc::default(),
        }
    }

    /// Empty path rooted at `location` on the peer.
    pub(crate) fn at(conn: Connection, location: String, obj_type: ObjType) -> Self {
        Self {
            location: Some(location),
            obj_type,
            ..Self::root(conn)
        }
    }

    /// Derives a handle one member further. Numeric names become indices.
    #[must_use]
    pub fn attr(&self, name: &str) -> Self {
        self.push(StackKey::parse(name))
    }

    /// Derives a handle one element further.
    #[must_use]
    pub fn index(&self, i: u64) -> Self {
        self.push(StackKey::Index(i))
    }

    /// Owning connection.
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Peer's Reference Table key, if any.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }

    /// Category reported by the peer.
    pub const fn obj_type(&self) -> &ObjType {
        &self.obj_type
    }

    /// Accumulated member path.
    pub fn stack(&self) -> &[StackKey] {
        &self.stack
    }

    /// Reverse descriptor carrying the target and path.
    pub fn descriptor(&self) -> ProxyDescriptor {
        ProxyDescriptor::reverse(self.location.clone(), self.stack.to_vec())
    }

    /// Fetches the value at the end of the path.
    ///
    /// Sends `get_proxy_attribute` with the full path, or `get_primitive`
    /// for an empty one. A final segment ending in `$$` is reserved and
    /// resolves to `Null` without traffic.
    pub async fn resolve(&self) -> Result<Value> {
        if self
            .stack
            .last()
            .and_then(StackKey::as_name)
            .is_some_and(|n| n.ends_with("$$"))
        {
            return Ok(Value::Null);
        }
        let verb = if self.stack.is_empty() {
            Verb::GetPrimitive
        } else {
            Verb::GetProxyAttribute
        };
        self.conn.request(verb, self.base()).await
    }

    /// Settles the value at the end of the path (`await_proxy`).
    pub async fn settle(&self) -> Result<Value> {
        self.conn.request(Verb::AwaitProxy, self.base()).await
    }

    /// Inspect form computed by the owner.
    pub async fn repr(&self) -> Result<String> {
        let v = self.conn.request(Verb::GetProxyRepr, self.base()).await?;
        Ok(v.as_str().map_or_else(|| v.display(), str::to_owned))
    }

    /// Display (`String()`) form computed by the owner.
    pub async fn to_display(&self) -> Result<String> {
        let mut req = self.base();
        req.string = true;
        let v = self.conn.request(Verb::GetProxyRepr, req).await?;
        Ok(v.as_str().map_or_else(|| v.display(), str::to_owned))
    }

    /// Member names from the last enumeration, without traffic.
    pub fn cached_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns the cached names at once and refreshes them in the
    /// background. Outside a Tokio runtime only the cache is returned.
    pub fn keys_eager(&self) -> Vec<String> {
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let this = self.clone();
            rt.spawn(async move {
                if let Err(e) = RemoteObject::keys(&this).await {
                    debug!(error = %e, "background key refresh failed");
                }
            });
        }
        self.cached_keys()
    }

    /// Request with target and path.
    fn base(&self) -> ActionRequest {
        ActionRequest::at(self.location.clone()).with_stack(self.stack.to_vec())
    }

    /// Request with target and path extended by `name`.
    fn member(&self, name: &str) -> ActionRequest {
        let mut stack = self.stack.to_vec();
        stack.push(StackKey::parse(name));
        ActionRequest::at(self.location.clone()).with_stack(stack)
    }

    /// Handle with `key` appended.
    fn push(&self, key: StackKey) -> Self {
        let mut stack = self.stack.to_vec();
        stack.push(key);
        Self {
            stack: stack.into(),
            keys: Arc::default(),
            ..self.clone()
        }
    }

    /// Builds the request of a call or construction.
    fn invocation(&self, args: Args) -> ActionRequest {
        let plan = CallPlan::rewrite(&self.stack, args);
        let positional = self.conn.encode_all(&plan.args);
        let keyword: JsonMap = plan
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), self.conn.encode(v)))
            .collect();
        let mut req = ActionRequest::at(self.location.clone())
            .with_stack(plan.stack)
            .with_args(positional, keyword);
        req.isolate = plan.isolate;
        req.use_kwargs = !req.kwargs.is_empty();
        req
    }
}

#[async_trait]
impl RemoteObject for ChainHandle {
    async fn get(&self, name: &str) -> Result<Value> {
        self.attr(name).resolve().await
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        let req = self.member(name).with_value(self.conn.encode(&value));
        self.conn.request(Verb::SetProxyAttribute, req).await.map(drop)
    }

    async fn call(&self, args: Args) -> Result<Value> {
        self.conn.request(Verb::CallProxy, self.invocation(args)).await
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        self.conn
            .request(Verb::CallProxyConstructor, self.invocation(args))
            .await
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let v = self
            .conn
            .request(Verb::HasProxyAttribute, self.member(name))
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let v = self.conn.request(Verb::GetProxyAttributes, self.base()).await?;
        let fresh = names(&v);
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone_from(&fresh);
        Ok(fresh)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let v = self
            .conn
            .request(Verb::DeleteProxyAttribute, self.member(name))
            .await?;
        Ok(v.as_bool().unwrap_or(false))
    }
}

impl IntoFuture for ChainHandle {
    type Output = Result<Value>;
    type IntoFuture = BoxFuture<'static, Result<Value>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.resolve().await }.boxed()
    }
}

impl PartialEq for ChainHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn.same(&other.conn) && self.location == other.location && self.stack == other.stack
    }
}

impl fmt::Debug for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHandle")
            .field("conn", &self.conn.id())
            .field("location", &self.location)
            .field("stack", &self.stack)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ChainHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.location.as_deref().unwrap_or("<context>"))?;
        for key in self.stack.iter() {
            match key {
                StackKey::Index(i) => write!(f, "[{i}]")?,
                StackKey::Name(n) => write!(f, ".{n}")?,
            }
        }
        Ok(())
    }
}

/// Path and arguments of a call after call-time rewriting.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct CallPlan {
    /// Path sent with the request.
    pub stack: Vec<StackKey>,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Map,
    /// Isolation requested by a `$name` segment.
    pub isolate: bool,
}

impl CallPlan {
    /// Rewrites a call on `stack` by its final segment:
    ///
    /// - `apply`: dropped; arguments become `[args[0], ...args[1]]`.
    /// - `call`: dropped.
    /// - a name containing `$`: a trailing object argument becomes the
    ///   keyword bag; a bare `$` segment is dropped, otherwise a leading
    ///   `$` (isolate) and a trailing `$` are stripped.
    pub fn rewrite(stack: &[StackKey], args: Args) -> Self {
        let Args {
            positional: mut args,
            keyword: mut kwargs,
            ..
        } = args;
        let mut stack = stack.to_vec();
        let mut isolate = false;

        match stack.last().and_then(StackKey::as_name).map(str::to_owned) {
            Some(last) if last == "apply" => {
                stack.pop();
                let mut it = args.into_iter();
                let first = it.next().unwrap_or_default();
                let rest = match it.next() {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                args = std::iter::once(first).chain(rest).collect();
            }
            Some(last) if last == "call" => {
                stack.pop();
            }
            Some(last) if last.contains('$') => {
                if matches!(args.last(), Some(Value::Object(_))) {
                    if let Some(Value::Object(bag)) = args.pop() {
                        kwargs.extend(bag);
                    }
                }
                if last == "$" {
                    stack.pop();
                } else {
                    let flags = NameFlags::parse(&last);
                    isolate = flags.isolate;
                    if let Some(slot) = stack.last_mut() {
                        *slot = StackKey::Name(flags.name);
                    }
                }
            }
            _ => {}
        }

        Self {
            stack,
            args,
            kwargs,
            isolate,
        }
    }
}
