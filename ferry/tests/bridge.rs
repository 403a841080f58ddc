//! End-to-end tests: two bridges joined by an in-process or stream transport.

use std::collections::HashSet;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use ferry::transport::{channel, stream};
use ferry::{
    Args, Bridge, Connection, Error, Function, Map, Notification, Proxy, ProxyKind, Record,
    RemoteObject, Transport, Value,
};
use ferry_proto::{Framer, JsonCodec, Message, MessageKind, StackKey};

/// Forwards frames to the inner transport and keeps a copy.
#[derive(Debug)]
struct Tap<T> {
    /// Real transport.
    inner: Arc<T>,
    /// Frames sent so far.
    frames: Arc<Mutex<Vec<Bytes>>>,
}

impl<T> Clone for Tap<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            frames: Arc::clone(&self.frames),
        }
    }
}

impl<T: Transport> Tap<T> {
    fn new(inner: T) -> Self {
        Self {
            inner: Arc::new(inner),
            frames: Arc::default(),
        }
    }

    fn actions(&self) -> Vec<(String, Option<String>, Message)> {
        let frames = self.frames.lock().unwrap_or_else(PoisonError::into_inner);
        let mut framer = Framer::new(JsonCodec);
        frames
            .iter()
            .flat_map(|f| framer.push(f))
            .filter_map(|m| match m.kind() {
                MessageKind::Action {
                    correlation_id,
                    verb,
                } => Some((verb.to_owned(), correlation_id.map(str::to_owned), m.clone())),
                _ => None,
            })
            .collect()
    }
}

impl<T: Transport> Transport for Tap<T> {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.clone());
        self.inner.send(frame)
    }

    fn close(&self) {
        self.inner.close();
    }
}

fn add() -> Function {
    Function::sync("add", |args| {
        let a = args.get(0).as_i64().unwrap_or(0);
        let b = args.get(1).as_i64().unwrap_or(0);
        Ok(Value::from(a + b))
    })
}

fn host_context() -> Record {
    let c = Record::new().with("c", Value::local(add()));
    let b = Record::new().with("b", Value::local(c));
    Record::new()
        .with("add", Value::local(add()))
        .with("a", Value::local(b))
        .with("cfg", Value::from_json(serde_json::json!({"port": 8080})))
        .with(
            "boom",
            Value::local(Function::sync("boom", |_| Err(Error::host("boom")))),
        )
        .with(
            "apply",
            Value::local(Function::new("apply", |args: Args| async move {
                let Value::Remote(f) = args.get(0) else {
                    return Err(Error::type_error("not a remote function"));
                };
                f.call(Args::from(vec![args.get(1)])).await
            })),
        )
        .with(
            "echo",
            Value::local(Function::sync("echo", |args| Ok(args.get(0)))),
        )
        .with(
            "bad",
            Value::local(Function::sync("bad", |_| panic!("oops"))),
        )
        .with(
            "hang",
            Value::local(Function::new("hang", |_| futures::future::pending::<ferry::Result<Value>>())),
        )
}

/// Host and client over an in-process pair.
fn pair(kind: ProxyKind) -> (Connection, Connection) {
    let ((a, a_in), (b, b_in)) = channel::pair();
    let host = Bridge::builder().context(host_context()).build().attach(a, a_in);
    let client = Bridge::builder().proxy(kind).build().attach(b, b_in);
    (host, client)
}

fn remote(v: Value) -> Proxy {
    match v {
        Value::Remote(p) => p,
        other => panic!("expected a remote handle, got {other:?}"),
    }
}

#[tokio::test]
async fn direct_get_set_call() {
    let (_host, client) = pair(ProxyKind::Direct);

    let cfg = client.evaluate("cfg").await.unwrap();
    assert_eq!(cfg.member(&"port".into()).unwrap(), Value::from(8080));

    let f = remote(client.evaluate("add").await.unwrap());
    assert_eq!(f.obj_type(), ferry::ObjType::Function);
    let sum = f.call(Args::from(vec![Value::from(2), Value::from(3)])).await.unwrap();
    assert_eq!(sum, Value::from(5));

    let a = remote(client.evaluate("a").await.unwrap());
    a.set("x", Value::from("hi")).await.unwrap();
    assert_eq!(a.get("x").await.unwrap(), Value::from("hi"));
    assert!(a.has("b").await.unwrap());
    let mut keys = a.keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, ["b", "x"]);
    assert!(a.delete("x").await.unwrap());
    assert!(!a.has("x").await.unwrap());
}

#[tokio::test]
async fn chain_call_is_one_request() {
    let ((a, a_in), (b, b_in)) = channel::pair();
    let _host = Bridge::builder().context(host_context()).build().attach(a, a_in);
    let tap = Tap::new(b);
    let client = Bridge::builder()
        .proxy(ProxyKind::Chain)
        .build()
        .attach(tap.clone(), b_in);

    let c = client.global("a").attr("b").attr("c");
    let out = c.call(Args::from(vec![Value::from(1), Value::from(2)])).await.unwrap();
    assert_eq!(out, Value::from(3));

    let sent = tap.actions();
    assert_eq!(sent.len(), 1);
    let (verb, id, msg) = &sent[0];
    assert_eq!(verb, "call_proxy");
    assert!(id.is_some());
    let req = msg.request().unwrap();
    assert_eq!(req.location, None);
    assert_eq!(
        req.stack.unwrap(),
        vec![StackKey::parse("a"), StackKey::parse("b"), StackKey::parse("c")]
    );
    assert_eq!(req.args, vec![serde_json::json!(1), serde_json::json!(2)]);
}

#[tokio::test]
async fn chain_handles_resolve_when_awaited() {
    let (_host, client) = pair(ProxyKind::Chain);
    assert_eq!(client.global("cfg").attr("port").await.unwrap(), Value::from(8080));

    let Value::Remote(Proxy::Chain(a)) = client.lookup("a").await.unwrap() else {
        panic!("chain lookup should be lazy");
    };
    assert!(a.keys().await.unwrap().contains(&"b".to_owned()));
    assert!(a.cached_keys().contains(&"b".to_owned()));
}

#[tokio::test]
async fn concurrent_requests_get_distinct_ids() {
    let ((a, a_in), (b, b_in)) = channel::pair();
    let _host = Bridge::builder().context(host_context()).build().attach(a, a_in);
    let tap = Tap::new(b);
    let client = Bridge::builder().build().attach(tap.clone(), b_in);

    let f = remote(client.evaluate("add").await.unwrap());
    let calls = (0..16).map(|i| {
        let f = f.clone();
        async move { f.call(Args::from(vec![Value::from(i), Value::from(i)])).await }
    });
    let results = futures::future::join_all(calls).await;
    for (i, r) in results.into_iter().enumerate() {
        assert_eq!(r.unwrap(), Value::from(2 * i as i64));
    }

    let ids: HashSet<_> = tap.actions().into_iter().filter_map(|(_, id, _)| id).collect();
    assert_eq!(ids.len(), 17);
}

#[tokio::test]
async fn remote_failure_is_reported_verbatim() {
    let (_host, client) = pair(ProxyKind::Direct);
    let f = remote(client.evaluate("boom").await.unwrap());
    let err = f.call(Args::default()).await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text == "boom"));
}

#[tokio::test]
async fn panicking_host_function_fails_the_call() {
    let (_host, client) = pair(ProxyKind::Direct);
    let bad = remote(client.evaluate("bad").await.unwrap());
    let err = tokio::time::timeout(Duration::from_secs(5), bad.call(Args::default()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text.contains("oops")), "{err:?}");

    let add = remote(client.evaluate("add").await.unwrap());
    let sum = add.call(Args::from(vec![Value::from(1), Value::from(1)])).await.unwrap();
    assert_eq!(sum, Value::from(2));
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn handles_cross_to_a_third_party() {
    let (_host1, client1) = pair(ProxyKind::Direct);
    let (_host2, client2) = pair(ProxyKind::Direct);
    let add = remote(client1.evaluate("add").await.unwrap());

    let echo = remote(client2.evaluate("echo").await.unwrap());
    let back = echo
        .call(Args::from(vec![Value::Remote(add.clone())]))
        .await
        .unwrap();
    assert_eq!(back, Value::Remote(add.clone()));

    let apply = remote(client2.evaluate("apply").await.unwrap());
    let out = apply
        .call(Args::from(vec![Value::Remote(add), Value::from(5)]))
        .await
        .unwrap();
    assert_eq!(out, Value::from(5));
}

#[tokio::test]
async fn eager_keys_fill_the_cache() {
    let (_host, client) = pair(ProxyKind::Chain);
    let a = client.global("a");
    assert!(a.keys_eager().is_empty());
    tokio::time::timeout(Duration::from_secs(5), async {
        while a.cached_keys().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(a.cached_keys(), ["b"]);

    let b = a.attr("b");
    assert!(b.cached_keys().is_empty());
    assert_eq!(b.keys().await.unwrap(), ["c"]);
    assert_eq!(a.cached_keys(), ["b"]);
}

#[tokio::test]
async fn calling_a_plain_value_is_a_type_error() {
    let (_host, client) = pair(ProxyKind::Chain);
    let err = client.global("cfg").call(Args::default()).await.unwrap_err();
    assert!(matches!(&err, Error::Remote(text) if text.starts_with("TypeError")));
}

#[tokio::test]
async fn callbacks_round_trip() {
    let (_host, client) = pair(ProxyKind::Direct);
    let double = Value::local(Function::sync("double", |args| {
        Ok(Value::from(args.get(0).as_i64().unwrap_or(0) * 2))
    }));

    let apply = remote(client.evaluate("apply").await.unwrap());
    let out = apply
        .call(Args::from(vec![double, Value::from(21)]))
        .await
        .unwrap();
    assert_eq!(out, Value::from(42));
}

#[tokio::test]
async fn local_values_come_back_as_themselves() {
    let (_host, client) = pair(ProxyKind::Direct);
    let mine = ferry::Local::new(Record::new().with("tag", 1));

    let echo = remote(client.evaluate("echo").await.unwrap());
    let back = echo
        .call(Args::from(vec![Value::Local(mine.clone())]))
        .await
        .unwrap();
    assert!(back.as_local().is_some_and(|l| l.ptr_eq(&mine)));
    assert_eq!(client.table().len(), 1);
}

#[tokio::test]
async fn close_fails_pending_requests() {
    let (_host, client) = pair(ProxyKind::Direct);
    let hang = remote(client.evaluate("hang").await.unwrap());

    let call = tokio::spawn(async move { hang.call(Args::default()).await });
    while client.pending() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    client.close();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ConnectionClosed));
    assert!(client.is_closed());
    assert!(matches!(
        client.evaluate("add").await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn missing_transport_is_a_config_error() {
    let err = Bridge::builder().proxy(ProxyKind::Chain).start().unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn events_reach_subscribers() {
    let ((a, a_in), (b, b_in)) = channel::pair();
    let host = Bridge::builder().build().attach(a, a_in);
    let mut notes = host.subscribe();
    let client = Bridge::builder().transport(b, b_in).start().unwrap();

    let mut payload = Map::new();
    payload.insert("n".into(), Value::from(7));
    client.emit("tick", &payload).unwrap();

    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), notes.recv())
            .await
            .unwrap()
            .unwrap();
        if let Notification::Event { name, payload } = n {
            assert_eq!(name, "tick");
            assert_eq!(payload.get("n"), Some(&Value::from(7)));
            break;
        }
    }
}

#[tokio::test]
async fn peer_close_closes_the_connection() {
    let (host, client) = pair(ProxyKind::Direct);
    let mut notes = client.subscribe();
    host.close();

    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), notes.recv())
            .await
            .unwrap()
            .unwrap();
        if matches!(n, Notification::Closed) {
            break;
        }
    }
    assert!(client.is_closed());
}

#[tokio::test]
async fn stream_transport_carries_requests() {
    let (left, right) = tokio::io::duplex(64);
    let (a, a_in) = stream::split(left);
    let (b, b_in) = stream::split(right);

    let _host = Bridge::builder().context(host_context()).build().attach(a, a_in);
    let client = Bridge::builder().build().attach(b, b_in);

    let f = remote(client.evaluate("add").await.unwrap());
    let sum = f.call(Args::from(vec![Value::from(40), Value::from(2)])).await.unwrap();
    assert_eq!(sum, Value::from(42));
}
