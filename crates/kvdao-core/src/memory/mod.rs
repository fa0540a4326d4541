//! In-memory storage engine
//!
//! A reference implementation of the full engine contract, used for testing
//! and for short-lived processes that don't need persistence. Both open
//! protocols are supported; pick one with [`MemoryEngine::with_protocol`].
//!
//! # Example
//!
//! ```rust
//! use kvdao_core::engine::{Engine, OpenEvent, UpgradeTransaction};
//! use kvdao_core::{MemoryEngine, StoreParameters};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = MemoryEngine::new();
//! let mut open = engine.open("demo", 1).unwrap();
//! match open.next_event().await {
//!     Some(OpenEvent::UpgradeNeeded { mut upgrade, .. }) => {
//!         upgrade.create_object_store("notes", &StoreParameters::new()).unwrap();
//!         upgrade.commit().unwrap();
//!     }
//!     _ => unreachable!("fresh database always upgrades"),
//! }
//! assert_eq!(engine.database_version("demo"), Some(1));
//! # });
//! ```

mod state;
mod transaction;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::{
    Engine, OpenEvent, OpenEventSender, OpenProtocol, OpenRequest, Session, TransactionMode,
    UpgradeTransaction,
};
use crate::error::{EngineError, EngineResult};
use crate::params::{IndexParameters, StoreParameters};

use state::{EngineState, IndexData, StoreData};

pub use transaction::{MemoryCursor, MemoryIndex, MemoryStore, MemoryTransaction};

/// In-memory engine holding any number of named databases.
///
/// Clones share the same databases.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
    protocol: OpenProtocol,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    /// Create an engine speaking the upgrade-event protocol.
    pub fn new() -> Self {
        Self::with_protocol(OpenProtocol::UpgradeEvent)
    }

    pub fn with_protocol(protocol: OpenProtocol) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::default())),
            protocol,
        }
    }

    /// Names of all existing databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of a database, if it exists.
    pub fn database_version(&self, name: &str) -> Option<u32> {
        self.state.lock().databases.get(name).map(|db| db.version)
    }

    fn connect(&self, name: &str, generation: u64) -> MemorySession {
        MemorySession {
            state: self.state.clone(),
            name: name.to_string(),
            generation,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Engine for MemoryEngine {
    type Session = MemorySession;

    fn protocol(&self) -> OpenProtocol {
        self.protocol
    }

    fn open(&self, name: &str, version: u32) -> EngineResult<OpenRequest<MemorySession>> {
        if version == 0 {
            return Err(EngineError::Data("version must be at least 1".into()));
        }
        let (events, request) = OpenRequest::channel();

        let mut state = self.state.lock();
        let db = state.database_or_create(name);
        let generation = db.generation;
        let stored = db.version;

        if db.upgrading {
            events.emit(OpenEvent::Error(EngineError::InvalidState(format!(
                "database '{}' is being upgraded by another connection",
                name
            ))));
            return Ok(request);
        }

        match self.protocol {
            OpenProtocol::SetVersion => {
                drop(state);
                events.emit(OpenEvent::Success(self.connect(name, generation)));
            }
            OpenProtocol::UpgradeEvent if stored > version => {
                events.emit(OpenEvent::Error(EngineError::Version {
                    requested: version,
                    stored,
                }));
            }
            OpenProtocol::UpgradeEvent if stored < version => {
                let snapshot = begin_upgrade(db, version);
                drop(state);
                let session = self.connect(name, generation);
                tracing::debug!(db = name, from = stored, to = version, "upgrade needed");
                let upgrade = MemoryUpgrade {
                    session: session.clone(),
                    old_version: stored,
                    new_version: version,
                    snapshot,
                    finished: false,
                    on_finish: Some(events.clone()),
                };
                events.emit(OpenEvent::UpgradeNeeded {
                    session,
                    old_version: stored,
                    upgrade,
                });
            }
            OpenProtocol::UpgradeEvent => {
                drop(state);
                events.emit(OpenEvent::Success(self.connect(name, generation)));
            }
        }

        Ok(request)
    }

    async fn delete_database(&self, name: &str) -> EngineResult<()> {
        tokio::task::yield_now().await;
        if self.state.lock().databases.remove(name).is_some() {
            tracing::debug!(db = name, "database deleted");
        }
        Ok(())
    }
}

/// Start a version change on `db`, returning the schema to restore on abort.
fn begin_upgrade(db: &mut state::Database, version: u32) -> BTreeMap<String, StoreData> {
    db.upgrading = true;
    db.version = version;
    db.stores.clone()
}

/// A connection to one in-memory database.
#[derive(Debug, Clone)]
pub struct MemorySession {
    state: Arc<Mutex<EngineState>>,
    name: String,
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl MemorySession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::InvalidState(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }
}

impl Session for MemorySession {
    type Upgrade = MemoryUpgrade;
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        let mut state = self.state.lock();
        state
            .database(&self.name, self.generation)
            .map(|db| db.version)
            .unwrap_or(0)
    }

    fn object_store_names(&self) -> Vec<String> {
        let mut state = self.state.lock();
        state
            .database(&self.name, self.generation)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<MemoryTransaction> {
        self.ensure_open()?;
        if stores.is_empty() {
            return Err(EngineError::InvalidState(
                "a transaction needs at least one object store".into(),
            ));
        }
        let mut state = self.state.lock();
        let db = state.database(&self.name, self.generation)?;
        if db.upgrading {
            return Err(EngineError::InvalidState(
                "a version change transaction is running".into(),
            ));
        }
        for store in stores {
            db.store(store)?;
        }
        Ok(MemoryTransaction::new(
            self.state.clone(),
            self.name.clone(),
            self.generation,
            stores.iter().map(|s| s.to_string()).collect(),
            mode,
        ))
    }

    async fn set_version(&self, version: u32) -> EngineResult<MemoryUpgrade> {
        tokio::task::yield_now().await;
        self.ensure_open()?;
        let mut state = self.state.lock();
        let db = state.database(&self.name, self.generation)?;
        if db.upgrading {
            return Err(EngineError::InvalidState(
                "a version change transaction is running".into(),
            ));
        }
        let old_version = db.version;
        let snapshot = begin_upgrade(db, version);
        Ok(MemoryUpgrade {
            session: self.clone(),
            old_version,
            new_version: version,
            snapshot,
            finished: false,
            on_finish: None,
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// A running version change on an in-memory database.
pub struct MemoryUpgrade {
    session: MemorySession,
    old_version: u32,
    new_version: u32,
    snapshot: BTreeMap<String, StoreData>,
    finished: bool,
    // Set when the upgrade was started by an open request, which reports
    // success once the upgrade finishes.
    on_finish: Option<OpenEventSender<MemorySession>>,
}

impl MemoryUpgrade {
    fn with_db<R>(
        &self,
        f: impl FnOnce(&mut state::Database) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let mut state = self.session.state.lock();
        let db = state.database(&self.session.name, self.session.generation)?;
        f(db)
    }

    fn finish(&mut self, commit: bool) {
        if self.finished {
            return;
        }
        self.finished = true;
        let restore = std::mem::take(&mut self.snapshot);
        let outcome = self.with_db(|db| {
            db.upgrading = false;
            if !commit {
                db.stores = restore;
                db.version = self.old_version;
            }
            Ok(())
        });
        if !commit && self.old_version == 0 {
            // A database that never finished its first upgrade does not exist
            let mut state = self.session.state.lock();
            let fresh = state
                .databases
                .get(&self.session.name)
                .map_or(false, |db| db.generation == self.session.generation);
            if fresh {
                state.databases.remove(&self.session.name);
            }
        }
        if let Some(events) = self.on_finish.take() {
            let event = match (outcome, commit) {
                (Ok(()), true) => OpenEvent::Success(self.session.clone()),
                (Err(e), _) => OpenEvent::Error(e),
                (Ok(()), false) => {
                    OpenEvent::Error(EngineError::Aborted("version change aborted".into()))
                }
            };
            events.emit(event);
        }
        let version = if commit {
            self.new_version
        } else {
            self.old_version
        };
        tracing::debug!(
            db = %self.session.name,
            version,
            committed = commit,
            "version change finished"
        );
    }
}

impl UpgradeTransaction for MemoryUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn create_object_store(&mut self, name: &str, params: &StoreParameters) -> EngineResult<()> {
        if params.auto_increment && params.key_path.as_deref() == Some("") {
            return Err(EngineError::Data(
                "auto-increment stores cannot use an empty key path".into(),
            ));
        }
        self.with_db(|db| {
            if db.stores.contains_key(name) {
                return Err(EngineError::Constraint(format!(
                    "object store '{}' already exists",
                    name
                )));
            }
            db.stores
                .insert(name.to_string(), StoreData::new(params.clone()));
            Ok(())
        })
    }

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &str,
        params: &IndexParameters,
    ) -> EngineResult<()> {
        self.with_db(|db| {
            let data = db.store_mut(store)?;
            if data.indexes.contains_key(name) {
                return Err(EngineError::Constraint(format!(
                    "index '{}' already exists on '{}'",
                    name, store
                )));
            }
            let index = IndexData::build(key_path, params, &data.records);
            if params.unique && index.has_duplicates() {
                return Err(EngineError::Constraint(format!(
                    "existing records violate unique index '{}'",
                    name
                )));
            }
            data.indexes.insert(name.to_string(), index);
            Ok(())
        })
    }

    fn commit(mut self) -> EngineResult<()> {
        self.finish(true);
        Ok(())
    }

    fn abort(mut self) {
        self.finish(false);
    }
}

impl Drop for MemoryUpgrade {
    fn drop(&mut self) {
        self.finish(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Cursor, ObjectStore, Source, Transaction};
    use crate::key::{Key, KeyRange};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn open_with_store(engine: &MemoryEngine, store: &str) -> MemorySession {
        let mut open = engine.open("test", 1).unwrap();
        let Some(OpenEvent::UpgradeNeeded {
            session,
            mut upgrade,
            ..
        }) = open.next_event().await
        else {
            panic!("expected upgrade");
        };
        upgrade
            .create_object_store(store, &StoreParameters::new())
            .unwrap();
        upgrade.create_index(store, "by_tag", "tag", &IndexParameters::new()).unwrap();
        upgrade.commit().unwrap();
        assert!(matches!(open.next_event().await, Some(OpenEvent::Success(_))));
        session
    }

    #[tokio::test]
    async fn test_open_emits_upgrade_then_success() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        assert_eq!(session.version(), 1);
        assert_eq!(session.object_store_names(), vec!["items".to_string()]);
    }

    #[tokio::test]
    async fn test_reopen_same_version_succeeds_without_upgrade() {
        let engine = MemoryEngine::new();
        open_with_store(&engine, "items").await;
        let mut open = engine.open("test", 1).unwrap();
        assert!(matches!(open.next_event().await, Some(OpenEvent::Success(_))));
    }

    #[tokio::test]
    async fn test_open_lower_version_fails() {
        let engine = MemoryEngine::new();
        open_with_store(&engine, "items").await;

        let mut newer = engine.open("test", 3).unwrap();
        assert!(matches!(
            newer.next_event().await,
            Some(OpenEvent::UpgradeNeeded { old_version: 1, .. })
        ));
        assert_eq!(engine.database_version("test"), Some(3));

        let mut stale = engine.open("test", 2).unwrap();
        assert!(matches!(
            stale.next_event().await,
            Some(OpenEvent::Error(EngineError::Version { requested: 2, stored: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_aborted_first_upgrade_removes_database() {
        let engine = MemoryEngine::new();
        let mut open = engine.open("test", 1).unwrap();
        let Some(OpenEvent::UpgradeNeeded { mut upgrade, .. }) = open.next_event().await else {
            panic!("expected upgrade");
        };
        upgrade.create_object_store("items", &StoreParameters::new()).unwrap();
        upgrade.abort();
        assert!(matches!(
            open.next_event().await,
            Some(OpenEvent::Error(EngineError::Aborted(_)))
        ));
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn test_transaction_rejected_during_upgrade() {
        let engine = MemoryEngine::new();
        let mut open = engine.open("test", 1).unwrap();
        let Some(OpenEvent::UpgradeNeeded { session, mut upgrade, .. }) = open.next_event().await
        else {
            panic!("expected upgrade");
        };
        upgrade.create_object_store("items", &StoreParameters::new()).unwrap();
        let err = session
            .transaction(&["items"], TransactionMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        drop(upgrade);
        assert!(session.transaction(&["items"], TransactionMode::ReadWrite).is_ok());
    }

    #[tokio::test]
    async fn test_set_version_protocol() {
        let engine = MemoryEngine::with_protocol(OpenProtocol::SetVersion);
        let mut open = engine.open("legacy", 4).unwrap();
        let Some(OpenEvent::Success(session)) = open.next_event().await else {
            panic!("set-version engines always succeed first");
        };
        assert_eq!(session.version(), 0);
        let mut upgrade = session.set_version(4).await.unwrap();
        upgrade.create_object_store("items", &StoreParameters::new()).unwrap();
        upgrade.commit().unwrap();
        assert_eq!(session.version(), 4);
        assert!(session.contains_store("items"));
    }

    #[tokio::test]
    async fn test_unknown_store_and_index() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let err = session
            .transaction(&["nope"], TransactionMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));

        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        assert!(matches!(store.index("nope"), Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_only_rejects_writes() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let store = tx.object_store("items").unwrap();
        let err = store.put(json!(1), Some(Key::Int(1))).await.unwrap_err();
        assert!(matches!(err, EngineError::ReadOnly(_)));
    }

    #[tokio::test]
    async fn test_cursor_survives_delete_of_current_record() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        for i in 1..=4 {
            store.put(json!({"n": i}), Some(Key::Int(i))).await.unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = store.open_cursor(Some(KeyRange::lower_bound(2, false))).await.unwrap();
        while let Some(c) = cursor {
            seen.push(c.primary_key().clone());
            c.delete().await.unwrap();
            cursor = c.next().await.unwrap();
        }
        assert_eq!(seen, vec![Key::Int(2), Key::Int(3), Key::Int(4)]);
        assert_eq!(store.count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_index_cursor_and_advance() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        store.put(json!({"tag": "b"}), Some(Key::Int(1))).await.unwrap();
        store.put(json!({"tag": "a"}), Some(Key::Int(2))).await.unwrap();
        store.put(json!({"tag": "c"}), Some(Key::Int(3))).await.unwrap();

        let index = store.index("by_tag").unwrap();
        let cursor = index.open_cursor(None).await.unwrap().unwrap();
        assert_eq!(cursor.key(), &Key::from("a"));
        let cursor = cursor.advance(2).await.unwrap().unwrap();
        assert_eq!(cursor.key(), &Key::from("c"));
        assert_eq!(cursor.primary_key(), &Key::Int(3));
        assert!(cursor.next().await.unwrap().is_none());

        assert_eq!(index.get(&Key::from("b")).await.unwrap(), Some(json!({"tag": "b"})));
        assert_eq!(
            index.count(Some(&KeyRange::lower_bound("b", false))).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_committed_transaction_rejects_requests() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        tx.commit().await.unwrap();
        let err = store.get(&Key::Int(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back_writes() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        store.put(json!({"tag": "kept"}), Some(Key::Int(1))).await.unwrap();
        tx.commit().await.unwrap();

        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        store.put(json!({"tag": "changed"}), Some(Key::Int(1))).await.unwrap();
        store.add(json!({"tag": "new"}), Some(Key::Int(2))).await.unwrap();
        // Visible inside the transaction
        assert_eq!(store.count(None).await.unwrap(), 2);
        drop(tx);

        let tx = session.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let store = tx.object_store("items").unwrap();
        assert_eq!(store.get(&Key::Int(1)).await.unwrap(), Some(json!({"tag": "kept"})));
        assert_eq!(store.get(&Key::Int(2)).await.unwrap(), None);
        let index = store.index("by_tag").unwrap();
        assert_eq!(index.count(None).await.unwrap(), 1);
        assert_eq!(index.get(&Key::from("changed")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_transaction_restores_cursor_deletes() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        for i in 1..=3 {
            store.put(json!({"tag": "t"}), Some(Key::Int(i))).await.unwrap();
        }
        tx.commit().await.unwrap();

        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        let mut cursor = store.index("by_tag").unwrap().open_cursor(None).await.unwrap();
        while let Some(c) = cursor {
            c.delete().await.unwrap();
            cursor = c.next().await.unwrap();
        }
        store.delete(&Key::Int(2)).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 0);
        drop(store);
        drop(tx);

        let tx = session.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let store = tx.object_store("items").unwrap();
        assert_eq!(store.count(None).await.unwrap(), 3);
        let index = store.index("by_tag").unwrap();
        assert_eq!(index.count(Some(&KeyRange::only("t"))).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_dropped_transaction_restores_key_generator() {
        let engine = MemoryEngine::new();
        let mut open = engine.open("gen", 1).unwrap();
        let Some(OpenEvent::UpgradeNeeded { session, mut upgrade, .. }) = open.next_event().await
        else {
            panic!("expected upgrade");
        };
        upgrade
            .create_object_store("items", &StoreParameters::new().auto_increment(true))
            .unwrap();
        upgrade.commit().unwrap();

        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        assert_eq!(store.add(json!("a"), None).await.unwrap(), Key::Int(1));
        drop(tx);

        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        assert_eq!(store.add(json!("b"), None).await.unwrap(), Key::Int(1));
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_rollback_after_database_deleted_is_quiet() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        let tx = session.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = tx.object_store("items").unwrap();
        store.put(json!({}), Some(Key::Int(1))).await.unwrap();
        engine.delete_database("test").await.unwrap();
        drop(tx);
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_database_invalidates_sessions() {
        let engine = MemoryEngine::new();
        let session = open_with_store(&engine, "items").await;
        engine.delete_database("test").await.unwrap();
        let err = session
            .transaction(&["items"], TransactionMode::ReadWrite)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert_eq!(session.version(), 0);
    }
}
