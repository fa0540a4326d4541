//! Request continuation helpers
//!
//! Every operation is built from the same pieces: a transaction scoped to one
//! store, one or more engine requests, and a commit. Synchronous construction
//! failures become [`DaoError::Transaction`], request failures become
//! [`DaoError::Request`].

use std::future::Future;

use kvdao_core::{EngineResult, Session, Transaction, TransactionMode};
use tokio::task::JoinHandle;

use crate::error::{DaoError, Result};

/// Object store handle type of a session's transactions.
pub(crate) type StoreOf<S> = <<S as Session>::Transaction as Transaction>::Store;

/// Map a synchronous construction result.
pub(crate) fn construct<T>(result: EngineResult<T>) -> Result<T> {
    result.map_err(DaoError::Transaction)
}

/// Await one engine request.
pub(crate) async fn complete<T>(request: impl Future<Output = EngineResult<T>>) -> Result<T> {
    request.await.map_err(|e| {
        tracing::debug!(error = %e, "request failed");
        DaoError::Request(e)
    })
}

/// Open a read-write transaction on `store` and look the store up in it.
pub(crate) fn begin<S: Session>(session: &S, store: &str) -> Result<(S::Transaction, StoreOf<S>)> {
    let tx = construct(session.transaction(&[store], TransactionMode::ReadWrite))?;
    let handle = construct(tx.object_store(store))?;
    Ok((tx, handle))
}

/// Await transaction completion.
pub(crate) async fn finish<T: Transaction>(tx: T) -> Result<()> {
    tx.commit().await.map_err(DaoError::Transaction)
}

/// Run `operation` and hand its result to `callback`.
///
/// The callback is `FnOnce`, so it runs exactly once, on success and on
/// failure alike.
pub async fn deliver<T, F, C>(operation: F, callback: C)
where
    F: Future<Output = Result<T>>,
    C: FnOnce(Result<T>),
{
    callback(operation.await)
}

/// [`deliver`] on a new tokio task.
///
/// ```rust
/// use std::sync::Arc;
/// use kvdao::{request::spawn_with_callback, DaoConfig, StoreClient};
/// use kvdao_core::MemoryEngine;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let client = Arc::new(StoreClient::new(MemoryEngine::new(), DaoConfig::default()));
/// let task_client = client.clone();
/// let handle = spawn_with_callback(
///     async move { task_client.get("missing", 1).await },
///     |result| assert!(result.is_err()),
/// );
/// handle.await.unwrap();
/// # });
/// ```
pub fn spawn_with_callback<T, F, C>(operation: F, callback: C) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
    C: FnOnce(Result<T>) + Send + 'static,
{
    tokio::spawn(deliver(operation, callback))
}
