//! Cursor engine: paged scans and range deletes
//!
//! Both operations walk a forward cursor over a store or one of its indexes.
//! A scan collects record values under one of three stop rules (prefix,
//! unbounded, bounded). A range delete removes records while their key equals
//! the requested key, waiting for each delete before moving on.

use kvdao_core::{Cursor, Engine, Key, KeyRange, ObjectStore, Source};
use serde_json::Value;

use crate::client::StoreClient;
use crate::error::Result;
use crate::request::{begin, complete, construct, finish};
use crate::tracing::prefix;

/// How many records an operation may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// No limit: run until the cursor is exhausted.
    All,
    /// At most this many records.
    Count(usize),
}

impl Limit {
    fn is_reached(self) -> bool {
        self == Limit::Count(0)
    }

    fn decrement(self) -> Self {
        match self {
            Limit::All => Limit::All,
            Limit::Count(n) => Limit::Count(n.saturating_sub(1)),
        }
    }
}

/// Negative values mean [`Limit::All`].
impl From<i64> for Limit {
    fn from(raw: i64) -> Self {
        usize::try_from(raw).map_or(Limit::All, Limit::Count)
    }
}

/// A paged scan request.
///
/// ```rust
/// use kvdao::cursor::{Limit, Scan};
///
/// let scan = Scan::new("orders").index("by_customer").key("c-17").key_only().page_size(Limit::All);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    store: String,
    page_size: Option<Limit>,
    index: Option<String>,
    key: Option<Key>,
    key_only: bool,
    prefix: bool,
    open_bound: bool,
    skip: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Skipping(u32),
    Scanning,
    Stopped,
}

impl Scan {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            page_size: None,
            index: None,
            key: None,
            key_only: false,
            prefix: false,
            open_bound: false,
            skip: None,
        }
    }

    /// Records to collect. Defaults to the client's configured page size, and
    /// a size of zero falls back to that default too.
    pub fn page_size(mut self, page_size: impl Into<Limit>) -> Self {
        self.page_size = Some(page_size.into()).filter(|limit| !limit.is_reached());
        self
    }

    /// Scan through an index instead of the store itself.
    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    /// Start at `key` (or match only `key`, see [`key_only`](Self::key_only)).
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Visit only records whose key equals the scan key.
    pub fn key_only(mut self) -> Self {
        self.key_only = true;
        self
    }

    /// Stop at the first key that does not contain the scan key.
    pub fn prefix(mut self) -> Self {
        self.prefix = true;
        self
    }

    /// Exclude the scan key itself from a lower-bound range.
    pub fn open_bound(mut self) -> Self {
        self.open_bound = true;
        self
    }

    /// Skip this many records at the start. Zero means no skip.
    pub fn skip(mut self, count: u32) -> Self {
        self.skip = (count > 0).then_some(count);
        self
    }

    fn range(&self) -> Option<KeyRange> {
        self.key.as_ref().map(|key| {
            if self.key_only {
                KeyRange::only(key.clone())
            } else {
                KeyRange::lower_bound(key.clone(), self.open_bound)
            }
        })
    }

    async fn drive<S: Source>(&self, source: &S, page_size: Limit) -> Result<Vec<Value>> {
        let fragment = self.key.as_ref().filter(|_| self.prefix);
        let mut remaining = page_size;
        let mut values = Vec::new();
        let mut state = match self.skip {
            Some(count) => ScanState::Skipping(count),
            None => ScanState::Scanning,
        };

        let mut cursor = complete(source.open_cursor(self.range())).await?;
        while let Some(current) = cursor {
            match state {
                ScanState::Skipping(count) => {
                    state = ScanState::Scanning;
                    cursor = complete(current.advance(count)).await?;
                }
                ScanState::Scanning => {
                    let outside_prefix =
                        fragment.is_some_and(|f| !current.key().contains_fragment(f));
                    if outside_prefix || remaining.is_reached() {
                        state = ScanState::Stopped;
                        break;
                    }
                    values.push(current.value().clone());
                    remaining = remaining.decrement();
                    cursor = if remaining.is_reached() {
                        state = ScanState::Stopped;
                        None
                    } else {
                        complete(current.next()).await?
                    };
                }
                ScanState::Stopped => break,
            }
        }

        tracing::debug!(
            store = %self.store,
            ?state,
            collected = values.len(),
            "scan finished"
        );
        Ok(values)
    }
}

/// A delete-while-scanning request.
///
/// Deletes records whose key (index key when an index is set, primary key
/// otherwise) equals `key`, starting from the lower bound at `key`. The sweep
/// stops at the first record with a different key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeDelete {
    store: String,
    index: Option<String>,
    key: Option<Key>,
    open_bound: bool,
    count: Limit,
}

impl RangeDelete {
    pub fn new(store: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            index: None,
            key: None,
            open_bound: false,
            count: Limit::All,
        }
    }

    pub fn index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn open_bound(mut self) -> Self {
        self.open_bound = true;
        self
    }

    /// Maximum number of records to delete. Defaults to [`Limit::All`].
    pub fn count(mut self, count: impl Into<Limit>) -> Self {
        self.count = count.into();
        self
    }

    async fn sweep<S: Source>(&self, source: &S) -> Result<usize> {
        let range = self
            .key
            .as_ref()
            .map(|key| KeyRange::lower_bound(key.clone(), self.open_bound));
        let mut remaining = self.count;
        let mut deleted = 0;

        let mut cursor = complete(source.open_cursor(range)).await?;
        while let Some(current) = cursor {
            let compared = if self.index.is_some() {
                current.key()
            } else {
                current.primary_key()
            };
            if self.key.as_ref() != Some(compared) || remaining.is_reached() {
                break;
            }
            complete(current.delete()).await?;
            deleted += 1;
            remaining = remaining.decrement();
            cursor = complete(current.next()).await?;
        }
        Ok(deleted)
    }
}

impl<E: Engine> StoreClient<E> {
    /// Collect a page of record values in ascending key order.
    ///
    /// An engine error discards everything collected so far.
    pub async fn scan(&self, scan: Scan) -> Result<Vec<Value>> {
        let page_size = scan
            .page_size
            .unwrap_or(Limit::Count(self.config().default_page_size));
        let session = self.session().await?;
        let (tx, handle) = begin(&session, &scan.store)?;
        let values = match &scan.index {
            Some(name) => {
                let index = construct(handle.index(name))?;
                scan.drive(&index, page_size).await?
            }
            None => scan.drive(&handle, page_size).await?,
        };
        finish(tx).await?;
        Ok(values)
    }

    /// Delete the records matching `request`, one cursor position at a time.
    pub async fn delete_by_range(&self, request: RangeDelete) -> Result<()> {
        let session = self.session().await?;
        let (tx, handle) = begin(&session, &request.store)?;
        let deleted = match &request.index {
            Some(name) => {
                let index = construct(handle.index(name))?;
                request.sweep(&index).await?
            }
            None => request.sweep(&handle).await?,
        };
        finish(tx).await?;
        tracing::debug!(
            "{} deleted {} record(s) from {}",
            prefix::DB,
            deleted,
            request.store
        );
        Ok(())
    }
}
