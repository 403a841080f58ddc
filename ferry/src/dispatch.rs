//! Action Dispatcher: executes inbound requests against the Reference Table
//! and the Context.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use ferry_proto::{ActionRequest, StackKey, Verb};
use tracing::trace;

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::host::Args;
use crate::proxy::RemoteObject;
use crate::table::ReferenceTable;
use crate::value::{Local, Value, bind};

/// Result of dispatching one action.
#[derive(Debug)]
#[non_exhaustive]
pub enum Outcome {
    /// The verb ran; its result or error goes back to the caller.
    Handled(Result<Value>),
    /// No handler for the verb.
    NotHandled,
}

/// An action request with its operands decoded.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct Request {
    /// Reference Table key of the operand.
    pub location: Option<String>,
    /// Member path walked from the operand.
    pub stack: Option<Vec<StackKey>>,
    /// Call arguments.
    pub args: Args,
    /// Value to assign, or the name to evaluate.
    pub value: Value,
    /// Member name used when no stack is supplied.
    pub target: Option<StackKey>,
    /// Isolation requested by the caller.
    pub isolate: bool,
    /// Keyword arguments requested by the caller.
    pub use_kwargs: bool,
    /// Display form for `get_proxy_repr`.
    pub string: bool,
}

impl Request {
    /// Decodes the operands of `req` on `conn`.
    pub fn decode(conn: &Connection, req: ActionRequest) -> Result<Self> {
        let positional = req
            .args
            .into_iter()
            .map(|a| conn.decode(a))
            .collect::<Result<Vec<_>>>()?;
        let keyword = conn.decode_map(req.kwargs)?;
        let value = req.value.map(|v| conn.decode(v)).transpose()?;
        Ok(Self {
            location: req.location,
            stack: req.stack,
            args: Args::new(positional).with_keywords(keyword),
            value: value.unwrap_or_default(),
            target: req.target,
            isolate: req.isolate,
            use_kwargs: req.use_kwargs,
            string: req.string,
        })
    }
}

/// What a dispatcher can reach on the receiving side.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Connection the request arrived on.
    conn: Connection,
}

impl Scope {
    /// Scope of `conn`.
    pub const fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Connection the request arrived on.
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// This side's Reference Table.
    pub fn table(&self) -> &ReferenceTable {
        self.conn.table()
    }

    /// Root namespace.
    pub fn context(&self) -> &Local {
        self.conn.context()
    }
}

/// Executes actions. Replaceable through the bridge configuration.
#[async_trait]
pub trait Dispatcher: Send + Sync + fmt::Debug {
    /// Runs `action`. Unknown verbs yield [`Outcome::NotHandled`].
    async fn execute(&self, action: &str, req: Request, scope: &Scope) -> Outcome;
}

/// The standard verb set.
#[derive(Debug, Default, Clone, Copy)]
pub struct Actions;

#[async_trait]
impl Dispatcher for Actions {
    async fn execute(&self, action: &str, req: Request, scope: &Scope) -> Outcome {
        let Ok(verb) = Verb::from_str(action) else {
            return Outcome::NotHandled;
        };
        if req.isolate {
            trace!(%verb, "isolated evaluation requested");
        }
        Outcome::Handled(run(verb, req, scope).await)
    }
}

/// Executes one known verb.
async fn run(verb: Verb, req: Request, scope: &Scope) -> Result<Value> {
    match verb {
        Verb::Evaluate => {
            let name = req.value.as_str().map_or_else(|| req.value.display(), str::to_owned);
            scope.context().object().get(&StackKey::Name(name))
        }
        Verb::AwaitProxy => match full(&req, scope)? {
            Value::Local(l) => match l.object().settle().await {
                Some(res) => res,
                None => Ok(Value::Local(l)),
            },
            Value::Remote(p) => p.settle().await,
            other => Ok(other),
        },
        Verb::CallProxy | Verb::CallProxyConstructor => {
            let Some((callee, this)) = callee(&req, scope)? else {
                return Ok(Value::Null);
            };
            let construct = verb == Verb::CallProxyConstructor;
            invoke(callee, this, req.args, construct).await
        }
        Verb::GetProxyRepr => {
            let v = full(&req, scope)?;
            if let Value::Remote(p) = &v {
                return p.repr().await.map(Value::from);
            }
            Ok(Value::from(if req.string { v.display() } else { v.repr() }))
        }
        Verb::GetProxyIndex | Verb::GetProxyAttribute => Ok(match member(&req, scope)? {
            Some((parent, key)) => bind(parent.member(&key)?, &parent),
            None => Value::Null,
        }),
        Verb::GetProxyAttributes => {
            let keys = full(&req, scope)?.keys();
            Ok(Value::Array(keys.into_iter().map(Value::from).collect()))
        }
        Verb::SetProxyIndex | Verb::SetProxyAttribute => {
            let value = req.value.clone();
            edit(&req, scope, Edit::Set(value))?;
            Ok(Value::Bool(true))
        }
        Verb::HasProxyAttribute => Ok(Value::Bool(match member(&req, scope)? {
            Some((parent, key)) => has(&parent, &key),
            None => false,
        })),
        Verb::DeleteProxyAttribute => edit(&req, scope, Edit::Delete),
        Verb::GetPrimitive => full(&req, scope),
        _ => Err(Error::Protocol(format!("no handler for action `{verb}`"))),
    }
}

/// The operand root and the path to walk from it.
///
/// A known `location` roots the path at that table entry. Otherwise a
/// supplied stack is walked from the Context, so its first element is a
/// Context lookup. With neither, there is no operand.
fn operand(req: &Request, scope: &Scope) -> Option<(Value, Vec<StackKey>)> {
    let stack = req.stack.clone();
    if let Some(loc) = &req.location {
        if let Some(local) = scope.table().get(loc) {
            return Some((Value::Local(local), stack.unwrap_or_default()));
        }
        trace!(%loc, "location not in reference table");
    }
    stack.map(|s| (Value::Local(scope.context().clone()), s))
}

/// Walks the whole path.
fn full(req: &Request, scope: &Scope) -> Result<Value> {
    let Some((root, path)) = operand(req, scope) else {
        return Ok(Value::Null);
    };
    path.iter().try_fold(root, |v, key| v.member(key))
}

/// Walks all but the last segment; returns the parent and member key.
///
/// Without a path the key is `target`. A `Null` parent yields `None`.
fn member(req: &Request, scope: &Scope) -> Result<Option<(Value, StackKey)>> {
    let Some((root, path)) = operand(req, scope) else {
        return Ok(None);
    };
    let (key, init) = match path.split_last() {
        Some((last, init)) => (Some(last.clone()), init),
        None => (req.target.clone(), &path[..]),
    };
    let parent = init.iter().try_fold(root, |v, k| v.member(k))?;
    Ok(key.filter(|_| !parent.is_null()).map(|k| (parent, k)))
}

/// Callee and receiver of a call. Calls through a path are bound to the
/// penultimate value.
fn callee(req: &Request, scope: &Scope) -> Result<Option<(Value, Option<Value>)>> {
    let Some((root, path)) = operand(req, scope) else {
        return Ok(None);
    };
    let Some((last, init)) = path.split_last() else {
        return Ok(Some((root, None)));
    };
    let parent = init.iter().try_fold(root, |v, k| v.member(k))?;
    let f = parent.member(last)?;
    Ok(Some((f, Some(parent))))
}

/// Calls or constructs `callee`.
async fn invoke(callee: Value, this: Option<Value>, args: Args, construct: bool) -> Result<Value> {
    match callee {
        Value::Null => Ok(Value::Null),
        Value::Local(l) if construct => l.object().construct(args).await,
        Value::Local(l) => l.object().call(this, args).await,
        Value::Remote(p) if construct => p.construct(args).await,
        Value::Remote(p) => p.call(args).await,
        other => Err(Error::type_error(format!(
            "{} is not {}",
            other.repr(),
            if construct { "a constructor" } else { "a function" }
        ))),
    }
}

/// Whether `v` has member `key`.
fn has(v: &Value, key: &StackKey) -> bool {
    match v {
        Value::Local(l) => l.object().has(key),
        Value::Object(map) => map.contains_key(&key.to_string()),
        Value::Array(items) => match key {
            StackKey::Index(i) => usize::try_from(*i).is_ok_and(|i| i < items.len()),
            StackKey::Name(n) => n == "length",
        },
        _ => false,
    }
}

/// A write through a member path.
enum Edit {
    /// Assign the value.
    Set(Value),
    /// Remove the member.
    Delete,
}

/// Applies `op` at the end of the request path.
///
/// Plain values along the path are copies, so each modified copy is
/// written back into its parent up to the nearest host object.
fn edit(req: &Request, scope: &Scope, op: Edit) -> Result<Value> {
    let Some((mut root, path)) = operand(req, scope) else {
        return Ok(Value::Bool(false));
    };
    let (key, init) = match path.split_last() {
        Some((last, init)) => (last.clone(), init),
        None => match &req.target {
            Some(t) => (t.clone(), &path[..]),
            None => return Ok(Value::Bool(false)),
        },
    };
    write_back(&mut root, init, &key, op)
}

/// Recursive step of [`edit`].
fn write_back(target: &mut Value, path: &[StackKey], key: &StackKey, op: Edit) -> Result<Value> {
    let Some((head, rest)) = path.split_first() else {
        return match op {
            Edit::Set(v) => target.put(key, v).map(|()| Value::Bool(true)),
            Edit::Delete => target.remove(key).map(Value::Bool),
        };
    };
    let mut child = target.member(head)?;
    let out = write_back(&mut child, rest, key, op)?;
    if matches!(child, Value::Object(_) | Value::Array(_)) {
        target.put(head, child)?;
    }
    Ok(out)
}
