//! The bridge value model.
//!
//! Plain data (`Null` through `Object`) is copied across the wire. A
//! [`Local`] is a shared host object owned by this side and always sent by
//! reference; a [`Proxy`] stands for a value owned by the peer.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ferry_proto::{Json, ObjType, StackKey};
use serde_json::Number;

use crate::error::{Error, Result};
use crate::host::{BoundFunction, HostObject};
use crate::proxy::Proxy;

/// Longest array a remote write may grow a plain array to.
pub const MAX_ARRAY_LEN: usize = 1 << 20;

thread_local! {
    /// Host objects whose inspect form is being built on this thread.
    static IN_REPR: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks one host object as being inspected until dropped.
struct ReprGuard;

impl ReprGuard {
    /// Returns `None` if the object at `addr` is already being inspected.
    fn enter(addr: usize) -> Option<Self> {
        IN_REPR.with_borrow_mut(|seen| {
            if seen.contains(&addr) {
                return None;
            }
            seen.push(addr);
            Some(Self)
        })
    }
}

impl Drop for ReprGuard {
    fn drop(&mut self) {
        IN_REPR.with_borrow_mut(|seen| {
            seen.pop();
        });
    }
}

/// Plain object members, ordered by name.
pub type Map = BTreeMap<String, Value>;

/// A value that can cross the bridge.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent / null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// UTF-8 string.
    String(String),
    /// Plain array; copied.
    Array(Vec<Value>),
    /// Plain object; copied.
    Object(Map),
    /// Host object owned by this side; sent by reference.
    Local(Local),
    /// Handle to a value owned by the peer.
    Remote(Proxy),
}

impl Value {
    /// Converts plain JSON without interpreting descriptors.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Json::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Wraps a host object.
    pub fn local(obj: impl HostObject + 'static) -> Self {
        Self::Local(Local::new(obj))
    }

    /// Returns `true` for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Boolean content, if any.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content, if representable as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Integer content, if representable as `u64`.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }

    /// Numeric content as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// String content, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Array content, if any.
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Object content, if any.
    pub const fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Host object, if this is a [`Value::Local`].
    pub const fn as_local(&self) -> Option<&Local> {
        match self {
            Self::Local(l) => Some(l),
            _ => None,
        }
    }

    /// Remote handle, if this is a [`Value::Remote`].
    pub const fn as_remote(&self) -> Option<&Proxy> {
        match self {
            Self::Remote(p) => Some(p),
            _ => None,
        }
    }

    /// Short category name used in error messages.
    pub fn type_name(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(_) => "boolean".to_owned(),
            Self::Number(_) => "number".to_owned(),
            Self::String(_) => "string".to_owned(),
            Self::Array(_) => "array".to_owned(),
            Self::Object(_) => "object".to_owned(),
            Self::Local(l) => l.kind().to_string(),
            Self::Remote(p) => format!("remote {}", p.obj_type()),
        }
    }

    /// Whether invoking this value can succeed.
    pub fn is_callable(&self) -> bool {
        match self {
            Self::Local(l) => l.object().is_callable(),
            Self::Remote(p) => p.obj_type() == ObjType::Function || p.is_chain(),
            _ => false,
        }
    }

    /// Inspect form, as used for debugging output.
    pub fn repr(&self) -> String {
        match self {
            Self::String(s) => format!("'{}'", s.replace('\'', "\\'")),
            Self::Array(items) => {
                let inner: Vec<String> = items.iter().map(Self::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Object(map) if map.is_empty() => "{}".to_owned(),
            Self::Object(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.repr()))
                    .collect();
                format!("{{ {} }}", inner.join(", "))
            }
            Self::Local(l) => {
                let Some(_guard) = ReprGuard::enter(l.addr()) else {
                    return "[Circular]".to_owned();
                };
                l.object().repr()
            }
            other => other.display(),
        }
    }

    /// Display form, the string a value converts to.
    pub fn display(&self) -> String {
        match self {
            Self::Null => "null".to_owned(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => n.to_string(),
            Self::String(s) => s.clone(),
            Self::Array(items) => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|v| if v.is_null() { String::new() } else { v.display() })
                    .collect();
                parts.join(",")
            }
            Self::Object(_) => "[object Object]".to_owned(),
            Self::Local(l) => l.object().display(),
            Self::Remote(p) => p.to_string(),
        }
    }

    /// Reads one member.
    ///
    /// Missing members read as `Null`; reading through `Null` is a type
    /// error.
    pub fn member(&self, key: &StackKey) -> Result<Self> {
        match self {
            Self::Null => Err(Error::type_error(format!(
                "cannot read properties of null (reading '{key}')"
            ))),
            Self::Object(map) => Ok(map.get(&key.to_string()).cloned().unwrap_or_default()),
            Self::Array(items) => Ok(match key {
                StackKey::Index(i) => index(items, *i).cloned().unwrap_or_default(),
                StackKey::Name(n) if n == "length" => Self::from(items.len()),
                StackKey::Name(_) => Self::Null,
            }),
            Self::String(s) => Ok(match key {
                StackKey::Index(i) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(|c| Self::String(c.to_string()))
                    .unwrap_or_default(),
                StackKey::Name(n) if n == "length" => Self::from(s.chars().count()),
                StackKey::Name(_) => Self::Null,
            }),
            Self::Local(l) => l.object().get(key),
            Self::Remote(p) => Err(Error::type_error(format!(
                "cannot read '{key}' of {p} without a round trip"
            ))),
            Self::Bool(_) | Self::Number(_) => Ok(Self::Null),
        }
    }

    /// Own member names.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Object(map) => map.keys().cloned().collect(),
            Self::Array(items) => (0..items.len())
                .map(|i| i.to_string())
                .chain(std::iter::once("length".to_owned()))
                .collect(),
            Self::String(s) => (0..s.chars().count())
                .map(|i| i.to_string())
                .chain(std::iter::once("length".to_owned()))
                .collect(),
            Self::Local(l) => l.object().keys(),
            _ => Vec::new(),
        }
    }

    /// Writes one member. Plain values are modified in place; host objects
    /// receive the write.
    pub(crate) fn put(&mut self, key: &StackKey, value: Self) -> Result<()> {
        match self {
            Self::Object(map) => {
                map.insert(key.to_string(), value);
                Ok(())
            }
            Self::Array(items) => match key {
                StackKey::Index(i) => {
                    let len = usize::try_from(*i)
                        .ok()
                        .and_then(|i| i.checked_add(1))
                        .filter(|len| *len <= MAX_ARRAY_LEN)
                        .ok_or_else(|| Error::type_error(format!("invalid array index {i}")))?;
                    if len > items.len() {
                        items.resize(len, Self::Null);
                    }
                    items[len - 1] = value;
                    Ok(())
                }
                StackKey::Name(n) if n == "length" => {
                    let len = value
                        .as_u64()
                        .and_then(|l| usize::try_from(l).ok())
                        .filter(|len| *len <= MAX_ARRAY_LEN)
                        .ok_or_else(|| Error::type_error("invalid array length"))?;
                    items.resize(len, Self::Null);
                    Ok(())
                }
                StackKey::Name(n) => Err(Error::type_error(format!(
                    "cannot set property '{n}' on a plain array"
                ))),
            },
            Self::Local(l) => l.object().set(key, value),
            other => Err(Error::type_error(format!(
                "cannot set properties of {} (setting '{key}')",
                other.type_name()
            ))),
        }
    }

    /// Deletes one member, returning whether it existed.
    pub(crate) fn remove(&mut self, key: &StackKey) -> Result<bool> {
        match self {
            Self::Object(map) => Ok(map.remove(&key.to_string()).is_some()),
            Self::Array(items) => Ok(match key {
                StackKey::Index(i) => usize::try_from(*i)
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .map(|slot| *slot = Self::Null)
                    .is_some(),
                StackKey::Name(_) => false,
            }),
            Self::Local(l) => l.object().delete(key),
            other => Err(Error::type_error(format!(
                "cannot delete properties of {} (deleting '{key}')",
                other.type_name()
            ))),
        }
    }
}

/// Walks `path` from `root` by member reads.
///
/// A callable reached through a host object is bound to that object, so
/// methods keep their receiver.
pub(crate) fn walk(root: Value, path: &[StackKey]) -> Result<Value> {
    let Some((last, init)) = path.split_last() else {
        return Ok(root);
    };
    let mut parent = root;
    for key in init {
        parent = parent.member(key)?;
    }
    let found = parent.member(last)?;
    Ok(bind(found, &parent))
}

/// Binds a callable host object to `receiver`; other values pass through.
pub(crate) fn bind(value: Value, receiver: &Value) -> Value {
    match &value {
        Value::Local(f) if f.object().is_callable() && !receiver.is_null() => {
            Value::local(BoundFunction::new(receiver.clone(), f.clone()))
        }
        _ => value,
    }
}

/// Element `i` of `items`, if in range.
fn index(items: &[Value], i: u64) -> Option<&Value> {
    usize::try_from(i).ok().and_then(|i| items.get(i))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Local(a), Self::Local(b)) => a.ptr_eq(b),
            (Self::Remote(a), Self::Remote(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite numbers have no JSON form and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Self>> for Value {
    fn from(items: Vec<Self>) -> Self {
        Self::Array(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Object(map)
    }
}

impl From<Local> for Value {
    fn from(l: Local) -> Self {
        Self::Local(l)
    }
}

impl From<Proxy> for Value {
    fn from(p: Proxy) -> Self {
        Self::Remote(p)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A shared host object.
///
/// Cloning shares the object; identity (not structure) decides equality and
/// Reference Table de-duplication.
#[derive(Clone)]
pub struct Local(Arc<dyn HostObject>);

impl Local {
    /// Wraps a host object.
    pub fn new(obj: impl HostObject + 'static) -> Self {
        Self(Arc::new(obj))
    }

    /// Shares an already reference-counted host object.
    pub fn shared<T: HostObject + 'static>(obj: Arc<T>) -> Self {
        Self(obj)
    }

    /// The host object.
    pub fn object(&self) -> &Arc<dyn HostObject> {
        &self.0
    }

    /// Category reported on the wire.
    pub fn kind(&self) -> ObjType {
        self.0.obj_type()
    }

    /// Whether both handles share one object.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }

    /// Identity of the shared object.
    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0).cast::<()>() as usize
    }
}

impl fmt::Debug for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Record;

    fn nested() -> Value {
        Value::from_json(serde_json::json!({"x": {"y": 7}, "list": [1, 2, 3], "s": "héllo"}))
    }

    #[test]
    fn member_reads() {
        let v = nested();
        assert_eq!(
            v.member(&"x".into()).unwrap().member(&"y".into()).unwrap(),
            Value::from(7)
        );
        assert_eq!(
            v.member(&"list".into()).unwrap().member(&1.into()).unwrap(),
            Value::from(2)
        );
        assert_eq!(
            v.member(&"list".into()).unwrap().member(&"length".into()).unwrap(),
            Value::from(3_usize)
        );
        assert_eq!(
            v.member(&"s".into()).unwrap().member(&1.into()).unwrap(),
            Value::from("é")
        );
        assert!(v.member(&"missing".into()).unwrap().is_null());
    }

    #[test]
    fn reading_through_null_is_a_type_error() {
        let err = Value::Null.member(&"y".into()).unwrap_err();
        assert!(matches!(err, Error::Type(_)));
        assert!(err.to_string().contains("reading 'y'"));
    }

    #[test]
    fn plain_writes() {
        let mut v = nested();
        v.put(&"z".into(), Value::from(true)).unwrap();
        assert_eq!(v.member(&"z".into()).unwrap(), Value::from(true));

        let mut list = Value::from(vec![Value::from(1)]);
        list.put(&3.into(), Value::from("d")).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 4);
        assert!(list.remove(&0.into()).unwrap());
        assert!(list.as_array().unwrap()[0].is_null());

        assert!(Value::from(1).put(&"a".into(), Value::Null).is_err());
    }

    #[test]
    fn array_growth_is_bounded() {
        let mut list = Value::from(vec![Value::from(1)]);
        for i in [u64::MAX, 1 << 40, MAX_ARRAY_LEN as u64] {
            let err = list.put(&i.into(), Value::from(2)).unwrap_err();
            assert!(matches!(err, Error::Type(_)), "{err:?}");
        }
        assert!(list.put(&"length".into(), Value::from(u64::MAX)).is_err());
        assert!(list.put(&"length".into(), Value::from(MAX_ARRAY_LEN as u64 + 1)).is_err());
        assert_eq!(list.as_array().unwrap().len(), 1);

        list.put(&"length".into(), Value::from(3_u64)).unwrap();
        assert_eq!(list.as_array().unwrap().len(), 3);
    }

    #[test]
    fn self_containing_record_repr() {
        let outer = Local::new(Record::new());
        outer.object().set(&"me".into(), Value::from(outer.clone())).unwrap();
        outer.object().set(&"n".into(), Value::from(1)).unwrap();
        assert_eq!(Value::from(outer.clone()).repr(), "{ me: [Circular], n: 1 }");

        let pair = Value::from(vec![Value::from(outer.clone()), Value::from(outer)]);
        assert_eq!(
            pair.repr(),
            "[{ me: [Circular], n: 1 }, { me: [Circular], n: 1 }]"
        );
    }

    #[test]
    fn locals_compare_by_identity() {
        let a = Local::new(Record::new());
        let b = Local::new(Record::new());
        assert_eq!(Value::from(a.clone()), Value::from(a.clone()));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn repr_and_display() {
        let v = Value::from(vec![Value::from("a"), Value::from(1), Value::Null]);
        assert_eq!(v.repr(), "['a', 1, null]");
        assert_eq!(v.display(), "a,1,");
        assert_eq!(Value::from(f64::NAN), Value::Null);
    }
}
