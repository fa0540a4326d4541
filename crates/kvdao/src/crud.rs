//! Single-record operations

use kvdao_core::{Engine, Key, KeyRange, ObjectStore, Source};
use serde_json::Value;

use crate::client::StoreClient;
use crate::error::Result;
use crate::request::{begin, complete, construct, finish};

impl<E: Engine> StoreClient<E> {
    /// Fetch a record by primary key. An absent key resolves to `None`.
    pub async fn get(&self, store: &str, key: impl Into<Key>) -> Result<Option<Value>> {
        let key = key.into();
        tracing::debug!(store, %key, "get");
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        let value = complete(handle.get(&key)).await?;
        finish(tx).await?;
        Ok(value)
    }

    /// Fetch the first record whose `index` key equals `key`.
    pub async fn get_by_index(
        &self,
        store: &str,
        index: &str,
        key: impl Into<Key>,
    ) -> Result<Option<Value>> {
        let key = key.into();
        tracing::debug!(store, index, %key, "get by index");
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        let index = construct(handle.index(index))?;
        let value = complete(index.get(&key)).await?;
        finish(tx).await?;
        Ok(value)
    }

    /// Insert a record and return its key.
    ///
    /// An occupied key fails with a constraint error (see
    /// [`DaoError::is_constraint`](crate::DaoError::is_constraint)); the
    /// existing record is left as it was.
    pub async fn add(&self, store: &str, value: Value, key: Option<Key>) -> Result<Key> {
        tracing::debug!(store, key = ?key, "add");
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        let key = complete(handle.add(value, key)).await?;
        finish(tx).await?;
        Ok(key)
    }

    /// Insert or replace a record and return its key.
    pub async fn put(&self, store: &str, value: Value, key: Option<Key>) -> Result<Key> {
        tracing::debug!(store, key = ?key, "put");
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        let key = complete(handle.put(value, key)).await?;
        finish(tx).await?;
        Ok(key)
    }

    /// Remove a record by primary key. Removing an absent key succeeds.
    pub async fn delete(&self, store: &str, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        tracing::debug!(store, %key, "delete");
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        complete(handle.delete(&key)).await?;
        finish(tx).await
    }

    /// Count records, optionally through `index`, optionally only those whose
    /// key is at or after `key`.
    pub async fn count(&self, store: &str, index: Option<&str>, key: Option<Key>) -> Result<u64> {
        tracing::debug!(store, index, key = ?key, "count");
        let range = key.map(|k| KeyRange::lower_bound(k, false));
        let session = self.session().await?;
        let (tx, handle) = begin(&session, store)?;
        let count = match index {
            Some(name) => {
                let index = construct(handle.index(name))?;
                complete(index.count(range.as_ref())).await?
            }
            None => complete(handle.count(range.as_ref())).await?,
        };
        finish(tx).await?;
        Ok(count)
    }
}
