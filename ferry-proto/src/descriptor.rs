//! Wire form of values that are sent by reference.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{Json, StackKey};

/// Value of the `type` field that marks a JSON object as a descriptor.
pub const PROXY_TAG: &str = "bridge_proxy";

/// Category of a referenced value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[non_exhaustive]
pub enum ObjType {
    /// Callable.
    Function,
    /// Array-like container.
    Array,
    /// Unique symbol.
    Symbol,
    /// Byte buffer.
    Bytes,
    /// Set collection.
    Set,
    /// Platform event.
    Event,
    /// Point in time.
    Date,
    /// Value already owned by the message's recipient.
    ReverseProxy,
    /// Any other category, carried by name (e.g. `"object"`).
    Other(String),
}

impl ObjType {
    /// Generic object category.
    pub fn object() -> Self {
        Self::Other("object".to_owned())
    }

    /// Wire name of the category.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Function => "function",
            Self::Array => "array",
            Self::Symbol => "symbol",
            Self::Bytes => "bytes",
            Self::Set => "set",
            Self::Event => "event",
            Self::Date => "date",
            Self::ReverseProxy => "reverse_proxy",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for ObjType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ObjType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "function" => Self::Function,
            "array" => Self::Array,
            "symbol" => Self::Symbol,
            "bytes" => Self::Bytes,
            "set" => Self::Set,
            "event" => Self::Event,
            "date" => Self::Date,
            "reverse_proxy" => Self::ReverseProxy,
            _ => Self::Other(name),
        }
    }
}

impl From<ObjType> for String {
    fn from(t: ObjType) -> Self {
        match t {
            ObjType::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

/// Stand-in for a non-serializable value: a type tag plus a Reference
/// Table key. Never embeds the value itself.
///
/// A `reverse` descriptor points back into the *recipient's* own table
/// (optionally followed by `proxy_path`), so a value that crossed the wire
/// once comes home as itself instead of as a proxy to a proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyDescriptor {
    /// Always [`PROXY_TAG`].
    #[serde(rename = "type")]
    tag: String,
    /// Category of the referenced value.
    pub obj_type: ObjType,
    /// Reference Table key; absent only for reverse chains rooted in the
    /// Context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// The referenced value is owned by the recipient.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reverse: bool,
    /// Member path to walk from `location` on the owner.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxy_path: Vec<StackKey>,
}

impl ProxyDescriptor {
    /// Descriptor for a value stored under `location` on the sender.
    pub fn new(obj_type: ObjType, location: impl Into<String>) -> Self {
        Self {
            tag: PROXY_TAG.to_owned(),
            obj_type,
            location: Some(location.into()),
            reverse: false,
            proxy_path: Vec::new(),
        }
    }

    /// Descriptor handing a value back to the side that owns it.
    pub fn reverse(location: Option<String>, proxy_path: Vec<StackKey>) -> Self {
        Self {
            tag: PROXY_TAG.to_owned(),
            obj_type: ObjType::ReverseProxy,
            location,
            reverse: true,
            proxy_path,
        }
    }

    /// Recognizes a descriptor inside a decoded JSON object.
    ///
    /// Requires the tag plus either a location, or a reverse path to walk
    /// from the owner's Context.
    pub fn from_json(value: &Json) -> Option<Self> {
        let obj = value.as_object()?;
        if obj.get("type").and_then(Json::as_str) != Some(PROXY_TAG) {
            return None;
        }
        let desc: Self = serde_json::from_value(value.clone()).ok()?;
        let addressable = desc.location.as_deref().is_some_and(|l| !l.is_empty())
            || (desc.reverse && !desc.proxy_path.is_empty());
        addressable.then_some(desc)
    }

    /// Encodes the descriptor as a JSON object.
    pub fn to_json(&self) -> Json {
        serde_json::to_value(self).unwrap_or(Json::Null)
    }
}
