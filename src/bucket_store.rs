use std::future::Future;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::backend::dialect::{self, BUCKET_TABLE};
use crate::backend::runner::{TxSlot, completed, run_in_transaction};
use crate::backend::{BackendPool, TxMode};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::RowValues;

/// Ordered key/value buckets kept in one table keyed by `(bucket_name, key)`.
///
/// Views share a process-wide read lock and updates take the write lock, so an update
/// never overlaps another transaction of the same store.
pub struct BucketStore {
    pool: RwLock<Option<BackendPool>>,
    lock: RwLock<()>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for BucketStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketStore")
            .field("closed", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BucketStore {
    /// Connect and create the bucket table if it is missing.
    ///
    /// # Errors
    /// Configuration and connectivity errors, or the backend error from creating the table.
    pub async fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let pool = BackendPool::connect(config).await?;
        let cancel = CancellationToken::new();
        let db = pool.db_type();
        run_in_transaction(
            &pool,
            TxMode::ReadWrite,
            &cancel,
            |slot: TxSlot<()>| slot,
            |slot| async move {
                let guard = slot.lock().await;
                let backend = guard.backend.as_ref().ok_or_else(completed)?;
                backend
                    .batch(&dialect::create_bucket_table(db))
                    .await
                    .map_err(|e| e.context("initialize schema", BUCKET_TABLE))
            },
        )
        .await?;
        tracing::info!(%db, table = BUCKET_TABLE, "bucket store ready");
        Ok(Self {
            pool: RwLock::new(Some(pool)),
            lock: RwLock::new(()),
            cancel,
        })
    }

    async fn pool(&self) -> Result<BackendPool, StoreError> {
        self.pool.read().await.clone().ok_or(StoreError::NoConnection)
    }

    /// Run a read-only transaction. [`Bucket::put`] and [`Bucket::delete`] fail inside it.
    ///
    /// # Errors
    /// The error returned by `f`, or connectivity errors.
    pub async fn view<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(BucketTx) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let pool = self.pool().await?;
        let _shared = self.lock.read().await;
        run_in_transaction(
            &pool,
            TxMode::ReadOnly,
            &self.cancel,
            |slot| BucketTx {
                slot,
                writeable: false,
            },
            f,
        )
        .await
    }

    /// Run a read-write transaction; it commits when `f` returns `Ok`.
    ///
    /// # Errors
    /// The error returned by `f`, or connectivity errors.
    pub async fn update<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(BucketTx) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let pool = self.pool().await?;
        let _exclusive = self.lock.write().await;
        run_in_transaction(
            &pool,
            TxMode::ReadWrite,
            &self.cancel,
            |slot| BucketTx {
                slot,
                writeable: true,
            },
            f,
        )
        .await
    }

    /// Cancel running transactions and release the pool.
    ///
    /// Transactions in flight fail with [`StoreError::Cancelled`]; later calls fail with
    /// [`StoreError::NoConnection`].
    pub async fn close(&self) {
        self.cancel.cancel();
        if self.pool.write().await.take().is_some() {
            tracing::info!(table = BUCKET_TABLE, "bucket store closed");
        }
    }
}

/// A transaction over the bucket table.
pub struct BucketTx {
    slot: TxSlot<()>,
    writeable: bool,
}

impl BucketTx {
    #[must_use]
    pub fn writeable(&self) -> bool {
        self.writeable
    }

    #[must_use]
    pub fn bucket(&self, name: impl AsRef<[u8]>) -> Bucket<'_> {
        Bucket {
            tx: self,
            name: String::from_utf8_lossy(name.as_ref()).into_owned(),
        }
    }

    /// Buckets exist implicitly, so this only returns the handle.
    ///
    /// # Errors
    /// Never fails; the signature matches stores that do create buckets.
    pub async fn create_bucket_if_not_exists(
        &self,
        name: impl AsRef<[u8]>,
    ) -> Result<Bucket<'_>, StoreError> {
        Ok(self.bucket(name))
    }
}

/// One bucket inside a [`BucketTx`].
pub struct Bucket<'a> {
    tx: &'a BucketTx,
    name: String,
}

impl Bucket<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn ensure_writeable(&self) -> Result<(), StoreError> {
        if self.tx.writeable {
            Ok(())
        } else {
            Err(StoreError::ReadOnlyTransaction)
        }
    }

    /// Insert or replace the value stored under `key`.
    ///
    /// # Errors
    /// [`StoreError::ReadOnlyTransaction`] inside a view, otherwise backend errors.
    pub async fn put(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.ensure_writeable()?;
        let guard = self.tx.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        backend
            .execute(
                &format!(
                    "INSERT INTO {BUCKET_TABLE} (bucket_name, key, value) VALUES ($1, $2, $3) \
                     ON CONFLICT (bucket_name, key) DO UPDATE SET value = $3"
                ),
                &[
                    RowValues::Text(self.name.clone()),
                    RowValues::Blob(key.to_vec()),
                    RowValues::Blob(value.to_vec()),
                ],
            )
            .await
            .map_err(|e| e.context("put", self.name.clone()))?;
        Ok(())
    }

    /// # Errors
    /// Backend errors.
    pub async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.tx.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        let rs = backend
            .query(
                &format!("SELECT value FROM {BUCKET_TABLE} WHERE bucket_name = $1 AND key = $2"),
                &[
                    RowValues::Text(self.name.clone()),
                    RowValues::Blob(key.to_vec()),
                ],
            )
            .await
            .map_err(|e| e.context("get", self.name.clone()))?;
        Ok(rs
            .scalar()
            .and_then(RowValues::as_blob)
            .map(<[u8]>::to_vec))
    }

    /// Remove `key`. A missing key is not an error.
    ///
    /// # Errors
    /// [`StoreError::ReadOnlyTransaction`] inside a view, otherwise backend errors.
    pub async fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        self.ensure_writeable()?;
        let guard = self.tx.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        backend
            .execute(
                &format!("DELETE FROM {BUCKET_TABLE} WHERE bucket_name = $1 AND key = $2"),
                &[
                    RowValues::Text(self.name.clone()),
                    RowValues::Blob(key.to_vec()),
                ],
            )
            .await
            .map_err(|e| e.context("delete", self.name.clone()))?;
        Ok(())
    }

    /// Visit every pair in ascending key order. An error from `visit` ends the walk.
    ///
    /// # Errors
    /// Backend errors or the error returned by `visit`.
    pub async fn for_each<V>(&self, mut visit: V) -> Result<(), StoreError>
    where
        V: FnMut(&[u8], &[u8]) -> Result<(), StoreError>,
    {
        let rs = {
            let guard = self.tx.slot.lock().await;
            let backend = guard.backend.as_ref().ok_or_else(completed)?;
            backend
                .query(
                    &format!(
                        "SELECT key, value FROM {BUCKET_TABLE} WHERE bucket_name = $1 ORDER BY key"
                    ),
                    &[RowValues::Text(self.name.clone())],
                )
                .await
                .map_err(|e| e.context("scan", self.name.clone()))?
        };
        for row in &rs.results {
            let key = row.get_by_index(0).and_then(RowValues::as_blob);
            let value = row.get_by_index(1).and_then(RowValues::as_blob);
            match (key, value) {
                (Some(key), Some(value)) => visit(key, value)?,
                _ => {
                    return Err(StoreError::ExecutionError(format!(
                        "malformed row in bucket {}",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }
}
