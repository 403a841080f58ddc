//! Per-connection Reference Table.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::trace;

use crate::value::Local;

/// Maps opaque location keys to the host objects this side has sent by
/// reference.
///
/// Entries are keyed by identity: storing the same object twice returns the
/// same key. The table holds a strong reference, so an issued key keeps
/// denoting the same object until it is released or the table is cleared.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    /// Both directions of the mapping under one lock.
    inner: RwLock<Entries>,
}

/// Table contents.
#[derive(Debug, Default)]
struct Entries {
    /// Key to object.
    by_key: HashMap<String, Local>,
    /// Object identity to key.
    by_addr: HashMap<usize, String>,
}

impl ReferenceTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key for `value`, minting one on first sight.
    pub fn store(&self, value: &Local) -> String {
        let addr = value.addr();
        if let Some(key) = self.read(|e| e.by_addr.get(&addr).cloned()) {
            return key;
        }

        let mut e = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have stored it between the two locks.
        if let Some(key) = e.by_addr.get(&addr) {
            return key.clone();
        }
        let key = uuid::Uuid::new_v4().simple().to_string();
        trace!(%key, kind = %value.kind(), "reference stored");
        e.by_addr.insert(addr, key.clone());
        e.by_key.insert(key.clone(), value.clone());
        key
    }

    /// Looks up a key.
    pub fn get(&self, key: &str) -> Option<Local> {
        self.read(|e| e.by_key.get(key).cloned())
    }

    /// Drops an entry. The key is never reissued.
    pub fn release(&self, key: &str) -> Option<Local> {
        let mut e = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let value = e.by_key.remove(key)?;
        e.by_addr.remove(&value.addr());
        Some(value)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read(|e| e.by_key.len())
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let mut e = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        e.by_key.clear();
        e.by_addr.clear();
    }

    /// Runs `f` under the read lock.
    fn read<T>(&self, f: impl FnOnce(&Entries) -> T) -> T {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}
