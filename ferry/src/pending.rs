//! Outstanding requests awaiting their single reply.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use ferry_proto::Json;
use tokio::sync::oneshot;

use crate::error::Error;

/// Reply slot of one request.
pub(crate) type Slot = oneshot::Sender<Result<Json, Error>>;

/// Correlation id to reply slot. Each id resolves at most once.
#[derive(Debug, Default)]
pub(crate) struct Pending {
    /// Waiting requests.
    slots: Mutex<HashMap<String, Slot>>,
}

impl Pending {
    /// Registers `id`, returning the receiver of its reply.
    pub(crate) fn insert(&self, id: String) -> oneshot::Receiver<Result<Json, Error>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        rx
    }

    /// Completes `id`. Returns `false` if nobody waits on it.
    pub(crate) fn resolve(&self, id: &str, outcome: Result<Json, Error>) -> bool {
        let Some(tx) = self.lock().remove(id) else {
            return false;
        };
        // The caller may have dropped its future; that is not an error.
        let _ = tx.send(outcome);
        true
    }

    /// Forgets `id` without completing it.
    pub(crate) fn cancel(&self, id: &str) {
        self.lock().remove(id);
    }

    /// Fails every waiting request with `err`.
    pub(crate) fn fail_all(&self, err: &Error) -> usize {
        let slots: Vec<Slot> = self.lock().drain().map(|(_, tx)| tx).collect();
        let n = slots.len();
        for tx in slots {
            let _ = tx.send(Err(err.clone()));
        }
        n
    }

    /// Number of waiting requests.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Slot map guard.
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn replies_are_single_use() {
        let p = Pending::default();
        let rx = p.insert("c1".into());
        assert!(p.resolve("c1", Ok(json!(7))));
        assert!(!p.resolve("c1", Ok(json!(8))));
        assert_eq!(rx.await.unwrap().unwrap(), json!(7));
    }

    #[tokio::test]
    async fn fail_all_drains() {
        let p = Pending::default();
        let a = p.insert("a".into());
        let b = p.insert("b".into());
        assert_eq!(p.fail_all(&Error::ConnectionClosed), 2);
        assert_eq!(p.len(), 0);
        assert!(matches!(a.await.unwrap(), Err(Error::ConnectionClosed)));
        assert!(matches!(b.await.unwrap(), Err(Error::ConnectionClosed)));
    }
}
