use crate::cache::{CacheKey, Record, RecordBatch};
use crate::error::PersistenceError;
use crate::traits::PersistentStore;
use derivative::Derivative;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};

/// The result of one committed write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Every record key the batch touched, in batch order.
    pub merged_keys: Vec<CacheKey>,

    /// The store epoch after the merge.
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    records: HashMap<CacheKey, Record>,
    epoch: u64,
}

/// The single source of truth: a flat key→record table plus a monotonically
/// increasing mutation epoch.
///
/// All mutation goes through [`write`](RecordStore::write), which holds the
/// exclusive side of the lock for the whole batch — readers never observe a
/// half-merged batch, and concurrent read transactions proceed in parallel
/// with each other.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct RecordStore {
    inner: RwLock<StoreInner>,
    #[derivative(Debug = "ignore")]
    backing: Option<Arc<dyn PersistentStore>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    /// An empty, purely in-memory store with no side effects beyond process
    /// lifetime.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            backing: None,
        }
    }

    /// A store that flushes every committed batch to `backing` and can
    /// [`restore`](RecordStore::restore) from it at start.
    pub fn with_backing(backing: Arc<dyn PersistentStore>) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            backing: Some(backing),
        }
    }

    /// Load persisted records into the store. Loaded records merge over
    /// whatever is already present.
    pub async fn restore(&self) -> Result<usize, PersistenceError> {
        let Some(backing) = self.backing.as_ref() else {
            return Ok(0);
        };
        let records = backing.load().await?;
        let count = records.len();
        let mut inner = self.inner.write().await;
        for (key, record) in records {
            inner.records.entry(key).or_default().merge(record);
        }
        if count > 0 {
            inner.epoch += 1;
        }
        Ok(count)
    }

    /// Open a read transaction. Holds the shared side of the lock until the
    /// guard is dropped.
    pub async fn read(&self) -> StoreReadGuard<'_> {
        StoreReadGuard {
            inner: self.inner.read().await,
        }
    }

    /// Commit a write transaction: the whole batch merges record-by-record,
    /// field-by-field, and the epoch advances once. An empty batch commits
    /// nothing.
    #[tracing::instrument(skip_all, level = "trace")]
    pub async fn write(&self, batch: RecordBatch) -> WriteOutcome {
        if batch.is_empty() {
            let inner = self.inner.read().await;
            return WriteOutcome {
                merged_keys: Vec::new(),
                epoch: inner.epoch,
            };
        }

        let outcome = {
            let mut inner = self.inner.write().await;
            let mut merged_keys = Vec::with_capacity(batch.len());
            for (key, record) in batch.iter() {
                inner
                    .records
                    .entry(key.clone())
                    .or_default()
                    .merge(record.clone());
                merged_keys.push(key.clone());
            }
            inner.epoch += 1;
            WriteOutcome {
                merged_keys,
                epoch: inner.epoch,
            }
        };

        if let Some(backing) = self.backing.as_ref() {
            if let Err(err) = backing.flush(&batch).await {
                failfast_error!("failed to flush write batch to backing store: {}", err);
            }
        }

        tracing::trace!(
            epoch = outcome.epoch,
            records = outcome.merged_keys.len(),
            "committed write batch"
        );
        outcome
    }

    /// Stage a batch as an explicit transaction. Nothing touches the store
    /// until [`commit`](WriteTransaction::commit); an aborted transaction
    /// changes nothing at all.
    pub fn transaction(&self, batch: RecordBatch) -> WriteTransaction<'_> {
        WriteTransaction { store: self, batch }
    }

    /// Remove one record outright. Returns the outcome of the removal, or
    /// `None` if the key was not present.
    pub async fn evict(&self, key: &CacheKey) -> Option<WriteOutcome> {
        let mut inner = self.inner.write().await;
        inner.records.remove(key)?;
        inner.epoch += 1;
        Some(WriteOutcome {
            merged_keys: vec![key.clone()],
            epoch: inner.epoch,
        })
    }

    /// Drop every record. The epoch keeps advancing: a cleared store is a
    /// mutated store.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
        inner.epoch += 1;
    }

    pub async fn epoch(&self) -> u64 {
        self.inner.read().await.epoch
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.records.is_empty()
    }
}

/// A staged write: the batch can still be amended or thrown away before it
/// reaches the store.
#[derive(Debug)]
pub struct WriteTransaction<'a> {
    store: &'a RecordStore,
    batch: RecordBatch,
}

impl WriteTransaction<'_> {
    pub fn batch_mut(&mut self) -> &mut RecordBatch {
        &mut self.batch
    }

    /// Merge the staged batch atomically.
    pub async fn commit(self) -> WriteOutcome {
        self.store.write(self.batch).await
    }

    /// Discard the staged batch; the store is untouched and the batch is
    /// handed back to the caller.
    pub fn abort(self) -> RecordBatch {
        self.batch
    }
}

/// A consistent snapshot of the store for the duration of one selection
/// replay.
pub struct StoreReadGuard<'a> {
    inner: RwLockReadGuard<'a, StoreInner>,
}

impl StoreReadGuard<'_> {
    /// `None` means the key was never fetched — distinct from a record
    /// holding a stored null.
    pub fn get(&self, key: &CacheKey) -> Option<&Record> {
        self.inner.records.get(key)
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch
    }

    pub fn len(&self) -> usize {
        self.inner.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.records.is_empty()
    }
}
