//! Message Router and the per-connection driver loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ferry_proto::{Framer, Json, Message, MessageKind};
use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::bridge::Notification;
use crate::connection::Connection;
use crate::dispatch::{Dispatcher, Outcome, Request, Scope};
use crate::error::{Error, Result};
use crate::transport::{Inbound, TransportEvent};

/// Classifies inbound messages and hands them to the right party.
#[derive(Debug, Clone)]
pub(crate) struct Router {
    /// Executes inbound actions.
    dispatcher: Arc<dyn Dispatcher>,
}

impl Router {
    /// Router running actions on `dispatcher`.
    pub(crate) fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Routes one decoded message.
    ///
    /// Actions run on their own task so a slow host function never holds
    /// up replies behind it. A top-level error without correlation id is
    /// returned as [`Error::Protocol`] and nothing else is done with the
    /// message.
    pub(crate) fn route(&self, conn: &Connection, msg: Message) -> Result<()> {
        match msg.kind() {
            MessageKind::Fault => {
                let text = msg.error_text().unwrap_or_default();
                Err(Error::Protocol(text))
            }
            MessageKind::Action {
                correlation_id,
                verb,
            } => {
                let id = correlation_id.map(str::to_owned);
                let verb = verb.to_owned();
                conn.notify(Notification::Action {
                    verb: verb.clone(),
                    correlation_id: id.clone(),
                });
                let dispatcher = Arc::clone(&self.dispatcher);
                let conn = conn.clone();
                tokio::spawn(async move {
                    let outcome = AssertUnwindSafe(execute(dispatcher.as_ref(), &conn, &verb, &msg))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| {
                            let text = panic_text(&*payload);
                            error!(conn = conn.id(), %verb, panic = %text, "action panicked");
                            Outcome::Handled(Err(Error::host(format!("action panicked: {text}"))))
                        });
                    reply(&conn, id, &verb, outcome);
                });
                Ok(())
            }
            MessageKind::Event { name } => {
                let payload = conn.decode_map(msg.fields.clone())?;
                conn.notify(Notification::Event {
                    name: name.to_owned(),
                    payload,
                });
                Ok(())
            }
            MessageKind::Reply { correlation_id } => {
                let outcome = match msg.error_text() {
                    Some(text) => Err(Error::Remote(text)),
                    None => Ok(msg.response.clone().unwrap_or(Json::Null)),
                };
                if !conn.resolve(correlation_id, outcome) {
                    debug!(conn = conn.id(), %correlation_id, "reply for unknown request");
                }
                Ok(())
            }
            _ => {
                debug!(conn = conn.id(), "unroutable message dropped");
                Ok(())
            }
        }
    }
}

/// Decodes and runs one action.
async fn execute(
    dispatcher: &dyn Dispatcher,
    conn: &Connection,
    verb: &str,
    msg: &Message,
) -> Outcome {
    let req = match msg.request().map_err(Error::from).and_then(|r| Request::decode(conn, r)) {
        Ok(req) => req,
        Err(e) => return Outcome::Handled(Err(e)),
    };
    dispatcher.execute(verb, req, &Scope::new(conn.clone())).await
}

/// Message carried by a panic payload.
fn panic_text(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Sends the reply of an action, if anyone waits for one.
fn reply(conn: &Connection, id: Option<String>, verb: &str, outcome: Outcome) {
    let Some(id) = id else {
        return;
    };
    let msg = match outcome {
        Outcome::Handled(Ok(value)) => Message::reply(id, conn.encode(&value)),
        Outcome::Handled(Err(e)) => {
            debug!(conn = conn.id(), %verb, error = %e, "action failed");
            Message::failure(id, e.to_string())
        }
        Outcome::NotHandled => {
            warn!(conn = conn.id(), %verb, "no handler for action");
            Message::failure(id, format!("no handler for action `{verb}`"))
        }
    };
    if let Err(e) = conn.send(&msg) {
        warn!(conn = conn.id(), error = %e, "reply not sent");
    }
}

/// Runs a connection until its transport closes.
pub(crate) async fn drive(conn: Connection, router: Router, mut inbound: Inbound) {
    let mut framer = Framer::new(conn.codec()).with_debug(conn.debug());
    while let Some(event) = inbound.recv().await {
        match event {
            TransportEvent::Ready => {
                info!(conn = conn.id(), "transport ready");
                conn.notify(Notification::Ready);
            }
            TransportEvent::Message(bytes) => {
                for msg in framer.push(&bytes) {
                    if let Err(e) = router.route(&conn, msg) {
                        warn!(conn = conn.id(), error = %e, "message rejected");
                    }
                }
            }
            TransportEvent::Error(e) => {
                warn!(conn = conn.id(), error = %e, "transport error");
                let failed = conn.fail_pending(&Error::Transport(e.clone()));
                debug!(conn = conn.id(), failed, "pending requests failed");
                conn.notify(Notification::TransportError(e));
            }
            TransportEvent::Close => break,
        }
        if conn.is_closed() {
            break;
        }
    }
    conn.close();
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use ferry_proto::{ActionRequest, JsonCodec, Verb};
    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::bridge::ProxyKind;
    use crate::dispatch::Actions;
    use crate::host::Record;
    use crate::testing::Recorder;
    use crate::value::Local;

    /// Dispatcher whose every action panics.
    #[derive(Debug)]
    struct Panicky;

    #[async_trait]
    impl Dispatcher for Panicky {
        async fn execute(&self, _action: &str, _req: Request, _scope: &Scope) -> Outcome {
            panic!("dispatcher exploded")
        }
    }

    fn setup(dispatcher: Arc<dyn Dispatcher>) -> (Arc<Recorder>, Connection, Router) {
        let rec = Arc::new(Recorder::default());
        let ctx = Local::new(Record::new().with("n", 7));
        let conn = Connection::new(Arc::clone(&rec) as Arc<dyn crate::transport::Transport>, Arc::new(JsonCodec), ProxyKind::Direct, ctx, false);
        (rec, conn, Router::new(dispatcher))
    }

    fn evaluate(id: &str, name: &str) -> Message {
        Message::action(id, Verb::Evaluate, &ActionRequest::default().with_value(json!(name)))
            .unwrap()
    }

    /// Waits until `n` replies have been sent.
    async fn replies(rec: &Recorder, n: usize) -> Vec<Message> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let sent = rec.messages();
                if sent.len() >= n {
                    return sent;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn action_gets_one_reply() {
        let (rec, conn, router) = setup(Arc::new(Actions));
        router.route(&conn, evaluate("c1", "n")).unwrap();
        assert_eq!(replies(&rec, 1).await, vec![Message::reply("c1", json!(7))]);
    }

    #[tokio::test]
    async fn unknown_verb_is_a_failure_reply() {
        let (rec, conn, router) = setup(Arc::new(Actions));
        let mut msg = evaluate("c1", "n");
        msg.action = Some("x".into());
        router.route(&conn, msg).unwrap();
        assert_eq!(
            replies(&rec, 1).await,
            vec![Message::failure("c1", "no handler for action `x`")]
        );
    }

    #[tokio::test]
    async fn fault_aborts_without_reply() {
        let (rec, conn, router) = setup(Arc::new(Actions));
        let mut msg = Message::fault("peer exploded");
        msg.action = Some(Verb::Evaluate.as_str().into());
        let err = router.route(&conn, msg).unwrap_err();
        assert!(matches!(&err, Error::Protocol(text) if text == "peer exploded"));

        router.route(&conn, evaluate("c2", "n")).unwrap();
        let sent = replies(&rec, 1).await;
        assert_eq!(sent, vec![Message::reply("c2", json!(7))]);
    }

    #[tokio::test]
    async fn action_without_id_is_not_answered() {
        let (rec, conn, router) = setup(Arc::new(Actions));
        let mut silent = evaluate("c1", "n");
        silent.correlation_id = None;
        router.route(&conn, silent).unwrap();
        router.route(&conn, evaluate("c2", "n")).unwrap();

        let sent = replies(&rec, 1).await;
        tokio::task::yield_now().await;
        assert_eq!(sent, vec![Message::reply("c2", json!(7))]);
        assert_eq!(rec.messages().len(), 1);
    }

    #[tokio::test]
    async fn panicking_action_still_replies() {
        let (rec, conn, router) = setup(Arc::new(Panicky));
        router.route(&conn, evaluate("c1", "n")).unwrap();
        let sent = replies(&rec, 1).await;
        assert_eq!(
            sent,
            vec![Message::failure("c1", "action panicked: dispatcher exploded")]
        );
    }

    #[tokio::test]
    async fn transport_error_fails_pending_requests() {
        let (_rec, conn, router) = setup(Arc::new(Actions));
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(conn.clone(), router, rx));

        let waiting = tokio::spawn({
            let conn = conn.clone();
            async move { conn.request(Verb::Evaluate, ActionRequest::default()).await }
        });
        while conn.pending() == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(TransportEvent::Error("link down".into())).unwrap();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(&err, Error::Transport(text) if text == "link down"));
        assert_eq!(conn.pending(), 0);
        assert!(!conn.is_closed());

        tx.send(TransportEvent::Close).unwrap();
        driver.await.unwrap();
        assert!(conn.is_closed());
        assert!(matches!(conn.evaluate("n").await, Err(Error::ConnectionClosed)));
    }
}
