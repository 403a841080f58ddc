//! Remote handles re-exported through a second connection.

use async_trait::async_trait;
use ferry_proto::{ObjType, StackKey};

use super::{Proxy, RemoteObject};
use crate::error::{Error, Result};
use crate::host::{Args, HostObject};
use crate::value::Value;

/// Host object standing in for a handle owned by another connection.
///
/// Invocation, construction and settlement travel to the handle's owner.
/// Member reads need a chain handle, which can extend its path without a
/// round trip.
#[derive(Debug, Clone)]
pub(crate) struct Forward(pub(crate) Proxy);

#[async_trait]
impl HostObject for Forward {
    fn obj_type(&self) -> ObjType {
        self.0.obj_type()
    }

    fn get(&self, key: &StackKey) -> Result<Value> {
        match &self.0 {
            Proxy::Chain(h) => Ok(Value::Remote(Proxy::Chain(match key {
                StackKey::Index(i) => h.index(*i),
                StackKey::Name(n) => h.attr(n),
            }))),
            Proxy::Direct(_) => Err(Error::type_error(format!(
                "cannot read '{key}' of forwarded {}",
                self.0
            ))),
        }
    }

    fn keys(&self) -> Vec<String> {
        match &self.0 {
            Proxy::Chain(h) => h.keys_eager(),
            Proxy::Direct(_) => Vec::new(),
        }
    }

    fn repr(&self) -> String {
        self.0.to_string()
    }

    fn is_callable(&self) -> bool {
        Value::Remote(self.0.clone()).is_callable()
    }

    fn forwarded(&self) -> Option<Proxy> {
        Some(self.0.clone())
    }

    async fn call(&self, _this: Option<Value>, args: Args) -> Result<Value> {
        self.0.call(args).await
    }

    async fn construct(&self, args: Args) -> Result<Value> {
        self.0.construct(args).await
    }

    async fn settle(&self) -> Option<Result<Value>> {
        Some(self.0.settle().await)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ferry_proto::JsonCodec;

    use super::*;
    use crate::bridge::ProxyKind;
    use crate::connection::Connection;
    use crate::host::Record;
    use crate::testing::Recorder;
    use crate::value::Local;

    fn conn(kind: ProxyKind) -> Connection {
        let ctx = Local::new(Record::new());
        Connection::new(Arc::new(Recorder::default()), Arc::new(JsonCodec), kind, ctx, false)
    }

    #[test]
    fn member_reads_extend_chain_paths() {
        let owner = conn(ProxyKind::Chain);
        let Value::Remote(p) = owner
            .decode(serde_json::json!({"type": "bridge_proxy", "objType": "object", "location": "k1"}))
            .unwrap()
        else {
            panic!("expected a handle");
        };
        let fwd = Forward(p);
        let Value::Remote(Proxy::Chain(child)) = fwd.get(&"port".into()).unwrap() else {
            panic!("expected a chain handle");
        };
        assert_eq!(child.location(), Some("k1"));
        assert_eq!(child.to_string(), "k1.port");
    }

    #[test]
    fn direct_member_reads_are_type_errors() {
        let owner = conn(ProxyKind::Direct);
        let Value::Remote(p) = owner
            .decode(serde_json::json!({"type": "bridge_proxy", "objType": "object", "location": "k1"}))
            .unwrap()
        else {
            panic!("expected a handle");
        };
        assert!(matches!(Forward(p).get(&"x".into()), Err(Error::Type(_))));
    }
}
