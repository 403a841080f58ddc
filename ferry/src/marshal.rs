//! Marshaller: values to wire JSON and back.
//!
//! Plain data is copied. Host objects are stored in the Reference Table and
//! sent as descriptors; remote handles go home as reverse descriptors.
//! Handles of another connection are relayed through a stored stand-in.

use ferry_proto::{Json, JsonMap, PROXY_TAG, ProxyDescriptor};
use tracing::{trace, warn};

use crate::bridge::ProxyKind;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::proxy::{ChainHandle, DirectHandle, Forward, Proxy};
use crate::value::{Local, Value, walk};

impl Connection {
    /// Encodes a value for the wire, minting references as needed.
    pub fn encode(&self, value: &Value) -> Json {
        match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => Json::Number(n.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(|v| self.encode(v)).collect()),
            Value::Object(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.encode(v)))
                    .collect(),
            ),
            Value::Remote(p) if p.connection().same(self) => p.descriptor().to_json(),
            Value::Remote(p) => {
                trace!(conn = self.id(), handle = %p, "forwarding handle of another connection");
                let relay = Local::new(Forward(p.clone()));
                let key = self.table().store(&relay);
                ProxyDescriptor::new(p.obj_type(), key).to_json()
            }
            Value::Local(l) => {
                let key = self.table().store(l);
                ProxyDescriptor::new(l.kind(), key).to_json()
            }
        }
    }

    /// Encodes call arguments.
    pub(crate) fn encode_all(&self, values: &[Value]) -> Vec<Json> {
        values.iter().map(|v| self.encode(v)).collect()
    }

    /// Decodes wire JSON, turning descriptors into handles.
    ///
    /// Reverse descriptors resolve to the values this side owns; an
    /// unknown key is [`Error::UnknownReference`].
    pub fn decode(&self, json: Json) -> Result<Value> {
        match json {
            Json::Array(items) => Ok(Value::Array(
                items
                    .into_iter()
                    .map(|v| self.decode(v))
                    .collect::<Result<_>>()?,
            )),
            Json::Object(map) => {
                if map.get("type").and_then(Json::as_str) == Some(PROXY_TAG) {
                    if let Some(desc) = ProxyDescriptor::from_json(&Json::Object(map.clone())) {
                        return self.materialize(desc);
                    }
                }
                self.decode_map(map).map(Value::Object)
            }
            plain => Ok(Value::from_json(plain)),
        }
    }

    /// Decodes every member of a JSON object.
    pub(crate) fn decode_map(&self, map: JsonMap) -> Result<crate::value::Map> {
        map.into_iter()
            .map(|(k, v)| Ok((k, self.decode(v)?)))
            .collect()
    }

    /// Turns a descriptor into a local value or a remote handle.
    fn materialize(&self, desc: ProxyDescriptor) -> Result<Value> {
        if desc.reverse {
            let root = match desc.location.as_deref() {
                Some(key) => self.table().get(key).map(Value::Local).ok_or_else(|| {
                    warn!(conn = self.id(), %key, "reverse descriptor names an unknown reference");
                    Error::UnknownReference(key.to_owned())
                })?,
                None => Value::Local(self.context().clone()),
            };
            return walk(root, &desc.proxy_path).map(|v| match v {
                Value::Local(l) => l.object().forwarded().map_or(Value::Local(l), Value::Remote),
                other => other,
            });
        }

        let Some(location) = desc.location else {
            return Err(Error::Protocol("descriptor without location".into()));
        };
        Ok(Value::Remote(match self.proxy_kind() {
            ProxyKind::Direct => Proxy::Direct(DirectHandle::new(self.clone(), location, desc.obj_type)),
            ProxyKind::Chain => {
                Proxy::Chain(ChainHandle::at(self.clone(), location, desc.obj_type))
            }
        }))
    }
}
