//! Handles to values owned by the peer.
//!
//! A [`DirectHandle`] performs one round trip per operation. A
//! [`ChainHandle`] accumulates a member path and sends it in a single
//! request when it is awaited, called or constructed. Both implement
//! [`RemoteObject`].

use std::fmt;

use async_trait::async_trait;
use ferry_proto::{ObjType, ProxyDescriptor};

use crate::connection::Connection;
use crate::error::Result;
use crate::host::Args;
use crate::value::Value;

mod chain;
mod direct;
mod forward;

pub use chain::{CallPlan, ChainHandle};
pub use direct::DirectHandle;
pub(crate) use forward::Forward;

/// Operations on a remote value, one action each.
#[async_trait]
pub trait RemoteObject {
    /// Reads member `name`.
    async fn get(&self, name: &str) -> Result<Value>;

    /// Writes member `name`.
    async fn set(&self, name: &str, value: Value) -> Result<()>;

    /// Invokes the value.
    async fn call(&self, args: Args) -> Result<Value>;

    /// Constructs a new instance from the value.
    async fn construct(&self, args: Args) -> Result<Value>;

    /// Whether member `name` exists.
    async fn has(&self, name: &str) -> Result<bool>;

    /// Own member names.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Deletes member `name`.
    async fn delete(&self, name: &str) -> Result<bool>;
}

/// A remote value handle of either flavour.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Proxy {
    /// One round trip per operation.
    Direct(DirectHandle),
    /// Lazy member path.
    Chain(ChainHandle),
}

impl Proxy {
    /// Connection the handle belongs to.
    pub fn connection(&self) -> &Connection {
        match self {
            Self::Direct(h) => h.connection(),
            Self::Chain(h) => h.connection(),
        }
    }

    /// Peer's Reference Table key, if any.
    pub fn location(&self) -> Option<&str> {
        match self {
            Self::Direct(h) => Some(h.location()),
            Self::Chain(h) => h.location(),
        }
    }

    /// Category reported by the peer.
    pub fn obj_type(&self) -> ObjType {
        match self {
            Self::Direct(h) => h.obj_type().clone(),
            Self::Chain(h) => h.obj_type().clone(),
        }
    }

    /// Whether this is a lazy chain.
    pub const fn is_chain(&self) -> bool {
        matches!(self, Self::Chain(_))
    }

    /// Reverse descriptor returning the value to its owner.
    pub fn descriptor(&self) -> ProxyDescriptor {
        match self {
            Self::Direct(h) => h.descriptor(),
            Self::Chain(h) => h.descriptor(),
        }
    }

    /// Settles the remote value (`await_proxy`).
    pub async fn settle(&self) -> Result<Value> {
        match self {
            Self::Direct(h) => h.settle().await,
            Self::Chain(h) => h.settle().await,
        }
    }

    /// Inspect form computed by the owner.
    pub async fn repr(&self) -> Result<String> {
        match self {
            Self::Direct(h) => h.repr().await,
            Self::Chain(h) => h.repr().await,
        }
    }
}

#[async_trait]
impl RemoteObject for Proxy {
    async fn get(&self, name: &str) -> Result<Value> {
        match self {
            Self::Direct(h) => h.get(name).await,
            Self::Chain(h) => RemoteObject::get(h, name).await,
        }
    }

    async fn set(&self, name: &str, value: Value) -> Result<()> {
        match self {
            Self::Direct(h) => h.set(name, value).await,
            Self::Chain(h) => h.set(name, value).await,
        }
    }

    async fn call(&self, args: Args) -> Result<Value> {
        match self {
            Self::Direct(h) => h.call(args).await,
            Self::Chain(h) => h.call(args).await,
        }
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        match self {
            Self::Direct(h) => h.construct(args).await,
            Self::Chain(h) => h.construct(args).await,
        }
    }

    async fn has(&self, name: &str) -> Result<bool> {
        match self {
            Self::Direct(h) => h.has(name).await,
            Self::Chain(h) => h.has(name).await,
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        match self {
            Self::Direct(h) => h.keys().await,
            Self::Chain(h) => h.keys().await,
        }
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        match self {
            Self::Direct(h) => h.delete(name).await,
            Self::Chain(h) => h.delete(name).await,
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct(h) => write!(f, "[remote {} {}]", h.obj_type(), h.location()),
            Self::Chain(h) => write!(f, "[remote chain {h}]"),
        }
    }
}

/// Member-name conventions understood by both handle kinds.
///
/// `$name` asks for isolation, `name$` for keyword arguments; names ending
/// in `$$` are reserved and short-circuit to `Null`. A bare `$` is an
/// ordinary name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NameFlags {
    /// Name with markers stripped.
    pub(crate) name: String,
    /// Leading `$`.
    pub(crate) isolate: bool,
    /// Trailing `$`.
    pub(crate) use_kwargs: bool,
    /// Trailing `$$`.
    pub(crate) reserved: bool,
}

impl NameFlags {
    /// Parses markers out of `raw`.
    pub(crate) fn parse(raw: &str) -> Self {
        let mut flags = Self {
            name: raw.to_owned(),
            isolate: false,
            use_kwargs: false,
            reserved: false,
        };
        if raw.ends_with("$$") {
            flags.reserved = true;
            return flags;
        }
        if raw == "$" || !raw.contains('$') {
            return flags;
        }
        let mut name = raw;
        if let Some(rest) = name.strip_prefix('$') {
            flags.isolate = true;
            name = rest;
        }
        if let Some(rest) = name.strip_suffix('$') {
            flags.use_kwargs = true;
            name = rest;
        }
        flags.name = name.to_owned();
        flags
    }
}
