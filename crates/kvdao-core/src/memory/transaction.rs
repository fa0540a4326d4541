//! Transactions, store handles and cursors of the in-memory engine

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::engine::{Cursor, ObjectStore, Source, Transaction, TransactionMode};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange};
use crate::memory::state::{Change, Database, EngineState};

/// State shared by a transaction and every handle obtained from it.
#[derive(Debug)]
struct TxInner {
    state: Arc<Mutex<EngineState>>,
    db_name: String,
    generation: u64,
    scope: Vec<String>,
    mode: TransactionMode,
    finished: AtomicBool,
    /// Record changes made so far, oldest first.
    undo: Mutex<Vec<(String, Change)>>,
}

impl TxInner {
    fn with_db<R>(&self, f: impl FnOnce(&mut Database) -> EngineResult<R>) -> EngineResult<R> {
        if self.finished.load(Ordering::Acquire) {
            return Err(EngineError::InvalidState("transaction has finished".into()));
        }
        let mut state = self.state.lock();
        let db = state.database(&self.db_name, self.generation)?;
        f(db)
    }

    /// Remember `change` for rollback and return the key it wrote.
    fn record(&self, store: &str, change: Change) -> Key {
        let key = change.key.clone();
        self.undo.lock().push((store.to_string(), change));
        key
    }

    /// Revert every recorded change, newest first.
    fn roll_back(&self) {
        let changes = std::mem::take(&mut *self.undo.lock());
        if changes.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        // A deleted database has nothing left to restore
        let Ok(db) = state.database(&self.db_name, self.generation) else {
            return;
        };
        let reverted = changes.len();
        for (store, change) in changes.into_iter().rev() {
            if let Ok(data) = db.store_mut(&store) {
                data.revert(change);
            }
        }
        tracing::debug!(db = %self.db_name, reverted, "transaction rolled back");
    }

    fn ensure_writable(&self) -> EngineResult<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(EngineError::ReadOnly(format!(
                "scope {:?}",
                self.scope
            ))),
        }
    }
}

/// A transaction over a fixed set of in-memory stores.
///
/// Requests are applied to the shared state as they resolve. Dropping the
/// transaction without committing it reverts every write it made.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<TxInner>,
}

impl MemoryTransaction {
    pub(crate) fn new(
        state: Arc<Mutex<EngineState>>,
        db_name: String,
        generation: u64,
        scope: Vec<String>,
        mode: TransactionMode,
    ) -> Self {
        Self {
            inner: Arc::new(TxInner {
                state,
                db_name,
                generation,
                scope,
                mode,
                finished: AtomicBool::new(false),
                undo: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl Transaction for MemoryTransaction {
    type Store = MemoryStore;

    fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    fn object_store(&self, name: &str) -> EngineResult<MemoryStore> {
        if !self.inner.scope.iter().any(|s| s == name) {
            return Err(EngineError::NotFound(format!(
                "object store '{}' is not in the transaction scope",
                name
            )));
        }
        self.inner.with_db(|db| db.store(name).map(|_| ()))?;
        Ok(MemoryStore {
            tx: self.inner.clone(),
            name: name.to_string(),
        })
    }

    async fn commit(self) -> EngineResult<()> {
        tokio::task::yield_now().await;
        if self.inner.finished.swap(true, Ordering::AcqRel) {
            return Err(EngineError::InvalidState("transaction has finished".into()));
        }
        self.inner.undo.lock().clear();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.inner.finished.swap(true, Ordering::AcqRel) {
            self.inner.roll_back();
        }
    }
}

/// An object store handle.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tx: Arc<TxInner>,
    name: String,
}

/// An index handle.
#[derive(Debug, Clone)]
pub struct MemoryIndex {
    tx: Arc<TxInner>,
    store: String,
    name: String,
}

impl Source for MemoryStore {
    type Cursor = MemoryCursor;

    async fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        tokio::task::yield_now().await;
        self.tx
            .with_db(|db| Ok(db.store(&self.name)?.records.get(key).cloned()))
    }

    async fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64> {
        tokio::task::yield_now().await;
        self.tx.with_db(|db| {
            let store = db.store(&self.name)?;
            let count = match range {
                Some(range) => store.records.keys().filter(|k| range.contains(k)).count(),
                None => store.records.len(),
            };
            Ok(count as u64)
        })
    }

    async fn open_cursor(&self, range: Option<KeyRange>) -> EngineResult<Option<MemoryCursor>> {
        tokio::task::yield_now().await;
        let cursor = MemoryCursor {
            tx: self.tx.clone(),
            store: self.name.clone(),
            index: None,
            range,
            key: Key::Int(0),
            primary_key: Key::Int(0),
            value: Value::Null,
        };
        cursor.step(true)
    }
}

impl ObjectStore for MemoryStore {
    type Index = MemoryIndex;

    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self, name: &str) -> EngineResult<MemoryIndex> {
        self.tx
            .with_db(|db| db.store(&self.name)?.index(name).map(|_| ()))?;
        Ok(MemoryIndex {
            tx: self.tx.clone(),
            store: self.name.clone(),
            name: name.to_string(),
        })
    }

    async fn add(&self, value: Value, key: Option<Key>) -> EngineResult<Key> {
        tokio::task::yield_now().await;
        self.tx.ensure_writable()?;
        self.tx.with_db(|db| {
            let change = db.store_mut(&self.name)?.write(value, key, false)?;
            Ok(self.tx.record(&self.name, change))
        })
    }

    async fn put(&self, value: Value, key: Option<Key>) -> EngineResult<Key> {
        tokio::task::yield_now().await;
        self.tx.ensure_writable()?;
        self.tx.with_db(|db| {
            let change = db.store_mut(&self.name)?.write(value, key, true)?;
            Ok(self.tx.record(&self.name, change))
        })
    }

    async fn delete(&self, key: &Key) -> EngineResult<()> {
        tokio::task::yield_now().await;
        self.tx.ensure_writable()?;
        self.tx.with_db(|db| {
            if let Some(change) = db.store_mut(&self.name)?.remove(key) {
                self.tx.record(&self.name, change);
            }
            Ok(())
        })
    }
}

impl Source for MemoryIndex {
    type Cursor = MemoryCursor;

    async fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        tokio::task::yield_now().await;
        self.tx.with_db(|db| {
            let store = db.store(&self.store)?;
            let index = store.index(&self.name)?;
            let range = KeyRange::only(key.clone());
            Ok(store.seek_index(index, Some(&range), None).map(|(_, _, v)| v))
        })
    }

    async fn count(&self, range: Option<&KeyRange>) -> EngineResult<u64> {
        tokio::task::yield_now().await;
        self.tx.with_db(|db| {
            let store = db.store(&self.store)?;
            let index = store.index(&self.name)?;
            let count = index
                .entries
                .iter()
                .filter(|(ik, _)| range.map_or(true, |r| r.contains(ik)))
                .count();
            Ok(count as u64)
        })
    }

    async fn open_cursor(&self, range: Option<KeyRange>) -> EngineResult<Option<MemoryCursor>> {
        tokio::task::yield_now().await;
        let cursor = MemoryCursor {
            tx: self.tx.clone(),
            store: self.store.clone(),
            index: Some(self.name.clone()),
            range,
            key: Key::Int(0),
            primary_key: Key::Int(0),
            value: Value::Null,
        };
        cursor.step(true)
    }
}

/// A forward cursor over a store or an index.
///
/// Every step re-seeks from the current position, so records deleted or
/// inserted behind the cursor are handled the way a B-tree cursor would.
#[derive(Debug)]
pub struct MemoryCursor {
    tx: Arc<TxInner>,
    store: String,
    index: Option<String>,
    range: Option<KeyRange>,
    key: Key,
    primary_key: Key,
    value: Value,
}

impl MemoryCursor {
    /// Move to the next position, or to the first one when `first`.
    fn step(mut self, first: bool) -> EngineResult<Option<Self>> {
        let found = self.tx.with_db(|db| {
            let store = db.store(&self.store)?;
            let range = self.range.as_ref();
            Ok(match &self.index {
                Some(index_name) => {
                    let index = store.index(index_name)?;
                    let after = (!first).then_some((&self.key, &self.primary_key));
                    store.seek_index(index, range, after)
                }
                None => {
                    let after = (!first).then_some(&self.primary_key);
                    store
                        .seek_record(range, after)
                        .map(|(pk, value)| (pk.clone(), pk, value))
                }
            })
        })?;

        Ok(found.map(|(key, primary_key, value)| {
            self.key = key;
            self.primary_key = primary_key;
            self.value = value;
            self
        }))
    }
}

impl Cursor for MemoryCursor {
    fn key(&self) -> &Key {
        &self.key
    }

    fn primary_key(&self) -> &Key {
        &self.primary_key
    }

    fn value(&self) -> &Value {
        &self.value
    }

    async fn next(self) -> EngineResult<Option<Self>> {
        tokio::task::yield_now().await;
        self.step(false)
    }

    async fn advance(self, count: u32) -> EngineResult<Option<Self>> {
        tokio::task::yield_now().await;
        if count == 0 {
            return Err(EngineError::Data("advance count must be at least 1".into()));
        }
        let mut cursor = self;
        for _ in 0..count {
            match cursor.step(false)? {
                Some(next) => cursor = next,
                None => return Ok(None),
            }
        }
        Ok(Some(cursor))
    }

    async fn delete(&self) -> EngineResult<()> {
        tokio::task::yield_now().await;
        self.tx.ensure_writable()?;
        self.tx.with_db(|db| {
            if let Some(change) = db.store_mut(&self.store)?.remove(&self.primary_key) {
                self.tx.record(&self.store, change);
            }
            Ok(())
        })
    }
}
