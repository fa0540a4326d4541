//! The storage engine contract
//!
//! An engine exposes the standard open / transaction / cursor primitives of an
//! embedded transactional key-value store. Every request is a future that
//! resolves exactly once, with either a value or an [`EngineError`].
//! Constructing transactions, object stores and indexes is synchronous and
//! fails with an ordinary `Err` instead of panicking.
//!
//! Two open protocols exist in the wild:
//!
//! - **Upgrade event**: `open(name, version)` emits `UpgradeNeeded` when the
//!   stored version is lower than the requested one, then `Success` once the
//!   version change transaction finishes.
//! - **Set version**: `open(name, version)` always emits `Success`; the caller
//!   compares versions and issues an explicit [`Session::set_version`].

use std::future::Future;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyRange};
use crate::params::{IndexParameters, StoreParameters};

/// How an engine signals that a schema upgrade is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenProtocol {
    UpgradeEvent,
    SetVersion,
}

/// Transaction access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Entry point: provides sessions for named databases.
pub trait Engine: Send + Sync + 'static {
    type Session: Session;

    /// The open protocol this engine speaks.
    fn protocol(&self) -> OpenProtocol;

    /// Start opening `name` at `version`. Events arrive on the returned request.
    fn open(&self, name: &str, version: u32) -> EngineResult<OpenRequest<Self::Session>>;

    /// Delete the whole database. Deleting an absent database succeeds.
    fn delete_database(&self, name: &str) -> impl Future<Output = EngineResult<()>> + Send;
}

/// An open connection to one database.
pub trait Session: Clone + Send + Sync + 'static {
    type Upgrade: UpgradeTransaction;
    type Transaction: Transaction;

    fn name(&self) -> &str;

    /// Schema version currently recorded for the database.
    fn version(&self) -> u32;

    fn object_store_names(&self) -> Vec<String>;

    fn contains_store(&self, name: &str) -> bool {
        self.object_store_names().iter().any(|s| s == name)
    }

    /// Begin a transaction scoped to `stores`.
    fn transaction(&self, stores: &[&str], mode: TransactionMode)
        -> EngineResult<Self::Transaction>;

    /// Raise the schema version explicitly (set-version protocol).
    ///
    /// Resolves with the version change transaction once it is active.
    fn set_version(&self, version: u32) -> impl Future<Output = EngineResult<Self::Upgrade>> + Send;

    fn close(&self);
}

/// A version change transaction, the only place schema may be altered.
///
/// Dropping an upgrade without calling [`commit`](Self::commit) or
/// [`abort`](Self::abort) commits it.
pub trait UpgradeTransaction: Send + 'static {
    fn old_version(&self) -> u32;

    fn new_version(&self) -> u32;

    fn create_object_store(&mut self, name: &str, params: &StoreParameters) -> EngineResult<()>;

    fn create_index(
        &mut self,
        store: &str,
        name: &str,
        key_path: &str,
        params: &IndexParameters,
    ) -> EngineResult<()>;

    fn commit(self) -> EngineResult<()>;

    /// Roll back every change made by this upgrade.
    fn abort(self);
}

/// A unit of work over a fixed set of stores.
///
/// Dropping a transaction without calling [`commit`](Self::commit) rolls
/// back its writes.
pub trait Transaction: Send + Sync {
    type Store: ObjectStore;

    fn mode(&self) -> TransactionMode;

    /// Look up a store inside the transaction scope.
    fn object_store(&self, name: &str) -> EngineResult<Self::Store>;

    /// Complete the transaction. Stores obtained from it stop accepting requests.
    fn commit(self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// Anything a cursor can be opened on: an object store or one of its indexes.
pub trait Source: Send + Sync {
    type Cursor: Cursor;

    /// First record whose key (store key or index key) equals `key`.
    fn get(&self, key: &Key) -> impl Future<Output = EngineResult<Option<Value>>> + Send;

    fn count(&self, range: Option<&KeyRange>) -> impl Future<Output = EngineResult<u64>> + Send;

    /// Open a forward cursor. Resolves with `None` when nothing is in range.
    fn open_cursor(
        &self,
        range: Option<KeyRange>,
    ) -> impl Future<Output = EngineResult<Option<Self::Cursor>>> + Send;
}

/// An object store handle inside a transaction.
pub trait ObjectStore: Source {
    type Index: Source;

    fn name(&self) -> &str;

    fn index(&self, name: &str) -> EngineResult<Self::Index>;

    /// Insert a record. Fails with [`EngineError::Constraint`] if the key exists.
    fn add(&self, value: Value, key: Option<Key>) -> impl Future<Output = EngineResult<Key>> + Send;

    /// Insert or replace a record.
    fn put(&self, value: Value, key: Option<Key>) -> impl Future<Output = EngineResult<Key>> + Send;

    /// Remove a record. Removing an absent key succeeds.
    fn delete(&self, key: &Key) -> impl Future<Output = EngineResult<()>> + Send;
}

/// A positioned forward cursor.
///
/// Resuming consumes the cursor and yields the next position, or `None` once
/// the range is exhausted. Dropping a cursor ends the iteration.
pub trait Cursor: Send + Sized {
    /// Key at the current position (index key for index cursors).
    fn key(&self) -> &Key;

    /// Primary key of the record at the current position.
    fn primary_key(&self) -> &Key;

    fn value(&self) -> &Value;

    fn next(self) -> impl Future<Output = EngineResult<Option<Self>>> + Send;

    /// Skip `count` positions forward. `count` must be at least 1.
    fn advance(self, count: u32) -> impl Future<Output = EngineResult<Option<Self>>> + Send;

    /// Delete the record at the current position.
    fn delete(&self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// Events produced by an open request.
pub enum OpenEvent<S: Session> {
    /// A version change transaction is in progress.
    UpgradeNeeded {
        session: S,
        old_version: u32,
        upgrade: S::Upgrade,
    },
    /// The connection is ready.
    Success(S),
    Error(EngineError),
}

/// Receiving side of an open request.
pub struct OpenRequest<S: Session> {
    events: mpsc::UnboundedReceiver<OpenEvent<S>>,
}

impl<S: Session> OpenRequest<S> {
    /// Create a connected sender/request pair.
    pub fn channel() -> (OpenEventSender<S>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (OpenEventSender { events: tx }, Self { events: rx })
    }

    /// Wait for the next event. `None` means the engine dropped the request.
    pub async fn next_event(&mut self) -> Option<OpenEvent<S>> {
        self.events.recv().await
    }
}

/// Engine side of an open request.
pub struct OpenEventSender<S: Session> {
    events: mpsc::UnboundedSender<OpenEvent<S>>,
}

impl<S: Session> Clone for OpenEventSender<S> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<S: Session> OpenEventSender<S> {
    /// Emit an event. Events for a request nobody listens to are discarded.
    pub fn emit(&self, event: OpenEvent<S>) {
        if self.events.send(event).is_err() {
            tracing::trace!("open request dropped; event discarded");
        }
    }
}
