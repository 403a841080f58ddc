//! Host objects: values that stay on their owner's side and are reached
//! through descriptors.
//!
//! [`HostObject`] is the explicit member-interception interface: everything
//! a peer can do to a referenced value goes through one of its methods. The
//! built-in types cover the categories that never travel by copy.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use ferry_proto::{ObjType, StackKey};
use futures::future::{BoxFuture, FutureExt, Shared};

use crate::error::{Error, Result};
use crate::proxy::Proxy;
use crate::value::{Local, Map, Value};

/// Interface of a value owned by this side of the bridge.
///
/// Synchronous members mirror plain property access; invocation and
/// settlement are asynchronous because host functions may call back into
/// the peer.
#[async_trait]
pub trait HostObject: Send + Sync + fmt::Debug {
    /// Category reported in descriptors.
    fn obj_type(&self) -> ObjType {
        ObjType::object()
    }

    /// Reads a member; missing members read as `Null`.
    fn get(&self, key: &StackKey) -> Result<Value> {
        let _ = key;
        Ok(Value::Null)
    }

    /// Writes a member.
    fn set(&self, key: &StackKey, value: Value) -> Result<()> {
        let _ = value;
        Err(Error::type_error(format!(
            "cannot set property '{key}' of {}",
            self.repr()
        )))
    }

    /// Whether the member exists.
    fn has(&self, key: &StackKey) -> bool {
        let name = key.to_string();
        self.keys().iter().any(|k| *k == name)
    }

    /// Deletes a member, returning whether it existed.
    fn delete(&self, key: &StackKey) -> Result<bool> {
        let _ = key;
        Ok(false)
    }

    /// Own member names.
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Inspect form.
    fn repr(&self) -> String {
        format!("[{}]", self.obj_type())
    }

    /// Display form.
    fn display(&self) -> String {
        self.repr()
    }

    /// Whether [`HostObject::call`] can succeed.
    fn is_callable(&self) -> bool {
        false
    }

    /// Handle on another connection that this object relays to, if any.
    fn forwarded(&self) -> Option<Proxy> {
        None
    }

    /// Invokes the object; `this` is the receiver it was read from, if any.
    async fn call(&self, this: Option<Value>, args: Args) -> Result<Value> {
        let _ = (this, args);
        Err(Error::type_error(format!("{} is not a function", self.repr())))
    }

    /// Constructs a new instance.
    async fn construct(&self, args: Args) -> Result<Value> {
        let _ = args;
        Err(Error::type_error(format!("{} is not a constructor", self.repr())))
    }

    /// Settles an asynchronous value; `None` if the object is not one.
    async fn settle(&self) -> Option<Result<Value>> {
        None
    }
}

/// Call arguments.
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct Args {
    /// Positional arguments.
    pub positional: Vec<Value>,
    /// Keyword arguments (`name$` calls).
    pub keyword: Map,
}

impl Args {
    /// Positional arguments only.
    pub const fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: Map::new(),
        }
    }

    /// Sets the keyword arguments.
    #[must_use]
    pub fn with_keywords(mut self, keyword: Map) -> Self {
        self.keyword = keyword;
        self
    }

    /// Positional argument `i`, or `Null` when absent.
    pub fn get(&self, i: usize) -> Value {
        self.positional.get(i).cloned().unwrap_or_default()
    }

    /// Keyword argument `name`, or `Null` when absent.
    pub fn keyword(&self, name: &str) -> Value {
        self.keyword.get(name).cloned().unwrap_or_default()
    }

    /// Number of positional arguments.
    pub fn len(&self) -> usize {
        self.positional.len()
    }

    /// Whether there are no positional arguments.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self::new(positional)
    }
}

/// Boxed host function body.
type Body = Arc<dyn Fn(Option<Value>, Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A callable host function.
#[derive(Clone)]
pub struct Function {
    /// Reported name.
    name: String,
    /// Function body.
    body: Body,
}

impl Function {
    /// Asynchronous function ignoring its receiver.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |_: Option<Value>, args: Args| f(args).boxed()),
        }
    }

    /// Asynchronous function receiving its receiver (`this`).
    pub fn method<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<Value>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |this: Option<Value>, args: Args| f(this, args).boxed()),
        }
    }

    /// Synchronous function.
    pub fn sync<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            body: Arc::new(move |_: Option<Value>, args: Args| {
                futures::future::ready(f(args)).boxed()
            }),
        }
    }

    /// Reported name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl HostObject for Function {
    fn obj_type(&self) -> ObjType {
        ObjType::Function
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(match key.as_name() {
            Some("name") => Value::from(self.name.as_str()),
            _ => Value::Null,
        })
    }

    fn keys(&self) -> Vec<String> {
        vec!["name".to_owned()]
    }

    fn repr(&self) -> String {
        if self.name.is_empty() {
            "[Function (anonymous)]".to_owned()
        } else {
            format!("[Function: {}]", self.name)
        }
    }

    fn display(&self) -> String {
        format!("function {}() {{ [native code] }}", self.name)
    }

    fn is_callable(&self) -> bool {
        true
    }

    async fn call(&self, this: Option<Value>, args: Args) -> Result<Value> {
        (self.body)(this, args).await
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        (self.body)(None, args).await
    }
}

/// Boxed constructor body.
type Ctor = Arc<dyn Fn(Args) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A constructible host type. Plain invocation is refused.
pub struct Class {
    /// Reported name.
    name: String,
    /// Constructor body.
    ctor: Ctor,
    /// Static members.
    statics: Record,
}

impl Class {
    /// Class whose instances are built by `ctor`.
    pub fn new<F, Fut>(name: impl Into<String>, ctor: F) -> Self
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            ctor: Arc::new(move |args: Args| ctor(args).boxed()),
            statics: Record::new(),
        }
    }

    /// Adds a static member.
    #[must_use]
    pub fn with_static(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.statics.insert(name, value);
        self
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class").field("name", &self.name).finish_non_exhaustive()
    }
}

#[async_trait]
impl HostObject for Class {
    fn obj_type(&self) -> ObjType {
        ObjType::Function
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        match key.as_name() {
            Some("name") => Ok(Value::from(self.name.as_str())),
            _ => self.statics.get(key),
        }
    }

    fn keys(&self) -> Vec<String> {
        self.statics.keys()
    }

    fn repr(&self) -> String {
        format!("[class {}]", self.name)
    }

    fn display(&self) -> String {
        format!("class {} {{ [native code] }}", self.name)
    }

    fn is_callable(&self) -> bool {
        true
    }

    async fn call(&self, _this: Option<Value>, _args: Args) -> Result<Value> {
        Err(Error::type_error(format!(
            "class constructor {} cannot be invoked without 'new'",
            self.name
        )))
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        (self.ctor)(args).await
    }
}

/// A callable bound to the receiver it was read from.
#[derive(Debug, Clone)]
pub struct BoundFunction {
    /// Receiver passed as `this`.
    this: Value,
    /// Target callable.
    func: Local,
}

impl BoundFunction {
    /// Binds `func` to `this`.
    pub const fn new(this: Value, func: Local) -> Self {
        Self { this, func }
    }

    /// The unbound target.
    pub const fn target(&self) -> &Local {
        &self.func
    }
}

#[async_trait]
impl HostObject for BoundFunction {
    fn obj_type(&self) -> ObjType {
        self.func.kind()
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        self.func.object().get(key)
    }

    fn keys(&self) -> Vec<String> {
        self.func.object().keys()
    }

    fn repr(&self) -> String {
        self.func.object().repr()
    }

    fn display(&self) -> String {
        self.func.object().display()
    }

    fn is_callable(&self) -> bool {
        true
    }

    async fn call(&self, _this: Option<Value>, args: Args) -> Result<Value> {
        self.func.object().call(Some(self.this.clone()), args).await
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        self.func.object().construct(args).await
    }
}

/// A shared mutable object; also the type of the Context namespace.
#[derive(Debug, Default)]
pub struct Record {
    /// Members by name.
    members: RwLock<Map>,
}

impl Record {
    /// Empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a member (builder form).
    #[must_use]
    pub fn with(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets a member, returning the previous value.
    pub fn insert(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.write().insert(name.into(), value.into())
    }

    /// Reads a member.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.read().get(name).cloned()
    }

    /// Removes a member.
    pub fn remove(&self, name: &str) -> Option<Value> {
        self.write().remove(name)
    }

    /// Copy of all members.
    pub fn snapshot(&self) -> Map {
        self.read().clone()
    }

    /// Read guard; a poisoned lock still holds consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Map> {
        self.members.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write guard.
    fn write(&self) -> RwLockWriteGuard<'_, Map> {
        self.members.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Map> for Record {
    fn from(members: Map) -> Self {
        Self {
            members: RwLock::new(members),
        }
    }
}

#[async_trait]
impl HostObject for Record {
    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(self.lookup(&key.to_string()).unwrap_or_default())
    }

    fn set(&self, key: &StackKey, value: Value) -> Result<()> {
        self.insert(key.to_string(), value);
        Ok(())
    }

    fn has(&self, key: &StackKey) -> bool {
        self.read().contains_key(&key.to_string())
    }

    fn delete(&self, key: &StackKey) -> Result<bool> {
        Ok(self.remove(&key.to_string()).is_some())
    }

    fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn repr(&self) -> String {
        Value::Object(self.snapshot()).repr()
    }

    fn display(&self) -> String {
        "[object Object]".to_owned()
    }
}

/// Immutable byte buffer.
#[derive(Debug, Clone, Default)]
pub struct Buffer(Bytes);

impl Buffer {
    /// Wraps bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The bytes.
    pub const fn bytes(&self) -> &Bytes {
        &self.0
    }
}

#[async_trait]
impl HostObject for Buffer {
    fn obj_type(&self) -> ObjType {
        ObjType::Bytes
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(match key {
            StackKey::Index(i) => usize::try_from(*i)
                .ok()
                .and_then(|i| self.0.get(i))
                .map(|b| Value::from(u64::from(*b)))
                .unwrap_or_default(),
            StackKey::Name(n) if n == "length" || n == "byteLength" => Value::from(self.0.len()),
            StackKey::Name(_) => Value::Null,
        })
    }

    fn keys(&self) -> Vec<String> {
        (0..self.0.len()).map(|i| i.to_string()).collect()
    }

    fn repr(&self) -> String {
        let hex: Vec<String> = self.0.iter().map(|b| format!("{b:02x}")).collect();
        if hex.is_empty() {
            "<Buffer >".to_owned()
        } else {
            format!("<Buffer {}>", hex.join(" "))
        }
    }

    fn display(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

/// Insertion-ordered set of values.
#[derive(Debug, Clone, Default)]
pub struct Set {
    /// Members in insertion order.
    items: Arc<RwLock<Vec<Value>>>,
}

impl Set {
    /// Set of the given values, duplicates dropped.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        let set = Self::default();
        for v in values {
            set.add(v);
        }
        set
    }

    /// Adds a value; returns `false` if it was already present.
    pub fn add(&self, value: Value) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        if items.contains(&value) {
            return false;
        }
        items.push(value);
        true
    }

    /// Whether the value is present.
    pub fn contains(&self, value: &Value) -> bool {
        self.values().contains(value)
    }

    /// Removes a value; returns whether it was present.
    pub fn remove(&self, value: &Value) -> bool {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        let before = items.len();
        items.retain(|v| v != value);
        items.len() != before
    }

    /// Members in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.items.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Member method `name`, sharing this set's storage.
    fn method(&self, name: &str) -> Option<Function> {
        let set = self.clone();
        Some(match name {
            "has" => Function::sync("has", move |args| Ok(set.contains(&args.get(0)).into())),
            "add" => Function::method("add", move |this, args| {
                set.add(args.get(0));
                futures::future::ready(Ok(this.unwrap_or_default()))
            }),
            "delete" => Function::sync("delete", move |args| Ok(set.remove(&args.get(0)).into())),
            "values" => Function::sync("values", move |_| Ok(Value::Array(set.values()))),
            _ => return None,
        })
    }
}

#[async_trait]
impl HostObject for Set {
    fn obj_type(&self) -> ObjType {
        ObjType::Set
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(match key.as_name() {
            Some("size") => Value::from(self.values().len()),
            Some(name) => self.method(name).map(Value::local).unwrap_or_default(),
            None => Value::Null,
        })
    }

    fn keys(&self) -> Vec<String> {
        vec!["size".to_owned()]
    }

    fn repr(&self) -> String {
        let items = self.values();
        let inner: Vec<String> = items.iter().map(Value::repr).collect();
        if inner.is_empty() {
            "Set(0) {}".to_owned()
        } else {
            format!("Set({}) {{ {} }}", items.len(), inner.join(", "))
        }
    }
}

/// A point in time, millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date(DateTime<Utc>);

impl Date {
    /// Wraps a timestamp.
    pub const fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    /// The current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Milliseconds since the Unix epoch; `None` if out of range.
    pub fn from_millis(ms: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(ms).single().map(Self)
    }

    /// Milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// ISO-8601 form with millisecond precision.
    pub fn iso(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[async_trait]
impl HostObject for Date {
    fn obj_type(&self) -> ObjType {
        ObjType::Date
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        let at = *self;
        Ok(match key.as_name() {
            Some("getTime" | "valueOf") => {
                Value::local(Function::sync("getTime", move |_| Ok(at.millis().into())))
            }
            Some("toISOString" | "toJSON") => {
                Value::local(Function::sync("toISOString", move |_| Ok(at.iso().into())))
            }
            _ => Value::Null,
        })
    }

    fn repr(&self) -> String {
        self.iso()
    }

    fn display(&self) -> String {
        self.0.format("%a %b %d %Y %H:%M:%S GMT+0000").to_string()
    }
}

/// A unique symbol.
#[derive(Debug, Clone, Default)]
pub struct Symbol {
    /// Optional description.
    description: Option<String>,
}

impl Symbol {
    /// Symbol with a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
        }
    }
}

#[async_trait]
impl HostObject for Symbol {
    fn obj_type(&self) -> ObjType {
        ObjType::Symbol
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(match key.as_name() {
            Some("description") => self.description.as_deref().into(),
            _ => Value::Null,
        })
    }

    fn repr(&self) -> String {
        format!("Symbol({})", self.description.as_deref().unwrap_or_default())
    }
}

/// A platform event: a type name plus detail.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event type.
    kind: String,
    /// Attached detail.
    detail: Value,
}

impl Event {
    /// Event of type `kind`.
    pub fn new(kind: impl Into<String>, detail: impl Into<Value>) -> Self {
        Self {
            kind: kind.into(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl HostObject for Event {
    fn obj_type(&self) -> ObjType {
        ObjType::Event
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        Ok(match key.as_name() {
            Some("type") => Value::from(self.kind.as_str()),
            Some("detail") => self.detail.clone(),
            _ => Value::Null,
        })
    }

    fn keys(&self) -> Vec<String> {
        vec!["type".to_owned(), "detail".to_owned()]
    }

    fn repr(&self) -> String {
        format!("Event {{ type: '{}' }}", self.kind)
    }
}

/// An asynchronous value; `await_proxy` settles it.
#[derive(Clone)]
pub struct Promise(Shared<BoxFuture<'static, Result<Value>>>);

impl Promise {
    /// Promise settled by `fut`.
    pub fn new(fut: impl Future<Output = Result<Value>> + Send + 'static) -> Self {
        Self(fut.boxed().shared())
    }

    /// Already-fulfilled promise.
    pub fn resolved(value: impl Into<Value>) -> Self {
        Self::new(futures::future::ready(Ok(value.into())))
    }

    /// Already-rejected promise.
    pub fn rejected(err: Error) -> Self {
        Self::new(futures::future::ready(Err(err)))
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

#[async_trait]
impl HostObject for Promise {
    fn obj_type(&self) -> ObjType {
        ObjType::Other("promise".to_owned())
    }

    fn repr(&self) -> String {
        match self.0.peek() {
            None => "Promise { <pending> }".to_owned(),
            Some(Ok(v)) => format!("Promise {{ {} }}", v.repr()),
            Some(Err(e)) => format!("Promise {{ <rejected> {e} }}"),
        }
    }

    async fn settle(&self) -> Option<Result<Value>> {
        Some(self.0.clone().await)
    }
}
