use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::BackendTx;
use crate::backend::dialect::{self, KeyKind};
use crate::backend::runner::{TxSlot, completed};
use crate::codec::EnvelopeCodec;
use crate::error::StoreError;
use crate::key::{ObjectKey, like_prefix_pattern, quote_bucket};
use crate::types::RowValues;

/// Identifiers handed out so far in one transaction, per bucket.
pub(crate) type Allocations = HashMap<String, i64>;

const NEXT_ID_SAVEPOINT: &str = "next_identifier";
const CREATE_SAVEPOINT: &str = "create_object";

/// Bucket operations inside one database transaction.
///
/// Handed to the closure given to [`crate::Connection::update_tx`] or
/// [`crate::Connection::view_tx`]. It stays valid until that closure's future completes;
/// after the commit or rollback every method fails with "transaction already completed".
/// Concurrent calls on one handle run one after another.
pub struct Transaction {
    slot: TxSlot<Allocations>,
    codec: Arc<EnvelopeCodec>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("encrypted", &self.codec.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl Transaction {
    pub(crate) fn new(slot: TxSlot<Allocations>, codec: Arc<EnvelopeCodec>) -> Self {
        Self { slot, codec }
    }

    /// Create the table behind a numeric-keyed bucket if it is missing.
    ///
    /// # Errors
    /// [`StoreError::InvalidBucketName`] or the wrapped backend error.
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.create_bucket(bucket, KeyKind::Numeric).await
    }

    /// Create the table behind a string-keyed bucket if it is missing.
    ///
    /// # Errors
    /// [`StoreError::InvalidBucketName`] or the wrapped backend error.
    pub async fn ensure_string_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.create_bucket(bucket, KeyKind::Text).await
    }

    async fn create_bucket(&self, bucket: &str, kind: KeyKind) -> Result<(), StoreError> {
        let quoted = quote_bucket(bucket)?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        let sql = dialect::create_bucket(backend.db_type(), &quoted, kind);
        backend
            .batch(&sql)
            .await
            .map_err(|e| e.context("create bucket", bucket))?;
        tracing::debug!(bucket, ?kind, "bucket ensured");
        Ok(())
    }

    /// Fetch and decode the object stored under `key`.
    ///
    /// # Errors
    /// [`StoreError::ObjectNotFound`] when no row matches; backend and envelope errors are
    /// wrapped with the bucket name.
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
    ) -> Result<T, StoreError> {
        let key = key.into();
        let quoted = quote_bucket(bucket)?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;

        let rs = backend
            .query(
                &format!("SELECT data FROM {quoted} WHERE id = $1"),
                &[key.to_param()],
            )
            .await
            .map_err(|e| e.context("get object", bucket))?;
        let Some(row) = rs.results.first() else {
            return Err(not_found(bucket, &key));
        };
        let data = payload(row.get_by_index(0))?;
        self.codec
            .decode(data)
            .map_err(|e| e.context("get object", bucket))
    }

    /// Replace the object stored under `key`. Never creates.
    ///
    /// # Errors
    /// [`StoreError::ObjectNotFound`] when no row matches.
    pub async fn update_object<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let quoted = quote_bucket(bucket)?;
        let data = self
            .codec
            .encode(value)
            .map_err(|e| e.context("update object", bucket))?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;

        let changed = backend
            .execute(
                &format!("UPDATE {quoted} SET data = $1 WHERE id = $2"),
                &[RowValues::Blob(data), key.to_param()],
            )
            .await
            .map_err(|e| e.context("update object", bucket))?;
        if changed == 0 {
            return Err(not_found(bucket, &key));
        }
        Ok(())
    }

    /// Remove the object stored under `key`. A missing key is not an error.
    ///
    /// # Errors
    /// Wrapped backend errors.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        let quoted = quote_bucket(bucket)?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        backend
            .execute(
                &format!("DELETE FROM {quoted} WHERE id = $1"),
                &[key.to_param()],
            )
            .await
            .map_err(|e| e.context("delete object", bucket))?;
        Ok(())
    }

    /// Delete every object for which `predicate` returns true and report how many went.
    ///
    /// Rows are decoded into `T` first; a row that does not decode aborts the operation.
    ///
    /// # Errors
    /// Wrapped backend and envelope errors.
    pub async fn delete_all_objects<T, P>(
        &self,
        bucket: &str,
        mut predicate: P,
    ) -> Result<usize, StoreError>
    where
        T: DeserializeOwned,
        P: FnMut(&ObjectKey, &T) -> bool,
    {
        let quoted = quote_bucket(bucket)?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;

        let rs = backend
            .query(&format!("SELECT id, data FROM {quoted} ORDER BY id"), &[])
            .await
            .map_err(|e| e.context("delete objects", bucket))?;

        let mut doomed = Vec::new();
        for row in &rs.results {
            let key = row
                .get_by_index(0)
                .ok_or_else(|| StoreError::ExecutionError("missing id column".into()))
                .and_then(ObjectKey::from_row_value)?;
            let value: T = self
                .codec
                .decode(payload(row.get_by_index(1))?)
                .map_err(|e| e.context("delete objects", bucket))?;
            if predicate(&key, &value) {
                doomed.push(key);
            }
        }

        let sql = format!("DELETE FROM {quoted} WHERE id = $1");
        for key in &doomed {
            backend
                .execute(&sql, &[key.to_param()])
                .await
                .map_err(|e| e.context("delete objects", bucket))?;
        }
        tracing::debug!(bucket, deleted = doomed.len(), "bulk delete");
        Ok(doomed.len())
    }

    /// Next free identifier of a numeric bucket: `max(id) + 1`, `1` for an empty bucket.
    ///
    /// Inside one transaction the values returned for a bucket only ever grow, even when
    /// nothing was inserted in between. A failed lookup is logged and yields `1` (or the
    /// next value after the last one handed out) without aborting the transaction.
    pub async fn next_identifier(&self, bucket: &str) -> i64 {
        let mut guard = self.slot.lock().await;
        let state = &mut *guard;
        let Some(backend) = state.backend.as_ref() else {
            tracing::error!(bucket, "next identifier requested on a completed transaction");
            return 1;
        };
        let db_next = match quote_bucket(bucket) {
            Ok(quoted) => isolated_next_id(backend, &quoted).await,
            Err(e) => Err(e),
        }
        .unwrap_or_else(|e| {
            tracing::error!(bucket, error = %e, "failed to get the next identifier");
            1
        });
        allocate(&mut state.local, bucket, db_next)
    }

    /// Insert a new object whose id is chosen by `generator` from the next sequence value.
    /// Returns the id that was inserted.
    ///
    /// # Errors
    /// [`StoreError::CreateConflict`] when the generated id is taken; wrapped backend and
    /// envelope errors otherwise. Unlike [`Transaction::next_identifier`], a failed sequence
    /// lookup is returned.
    pub async fn create_object<T, G>(&self, bucket: &str, generator: G) -> Result<i64, StoreError>
    where
        T: Serialize,
        G: FnOnce(i64) -> (i64, T),
    {
        let quoted = quote_bucket(bucket)?;
        let mut guard = self.slot.lock().await;
        let state = &mut *guard;
        let backend = state.backend.as_ref().ok_or_else(completed)?;

        let db_next = max_id_plus_one(backend, &quoted)
            .await
            .map_err(|e| e.context("allocate identifier", bucket))?;
        let seq = allocate(&mut state.local, bucket, db_next);
        let (id, value) = generator(seq);
        let data = self
            .codec
            .encode(&value)
            .map_err(|e| e.context("create object", bucket))?;
        insert(backend, bucket, &quoted, &ObjectKey::Id(id), data).await?;
        Ok(id)
    }

    /// Insert `value` under a caller-chosen numeric id.
    ///
    /// # Errors
    /// [`StoreError::CreateConflict`] when the id is taken.
    pub async fn create_object_with_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: i64,
        value: &T,
    ) -> Result<(), StoreError> {
        self.create_with_key(bucket, ObjectKey::Id(id), value).await
    }

    /// Insert `value` under a byte-string id, stored as text.
    ///
    /// # Errors
    /// [`StoreError::CreateConflict`] when the id is taken.
    pub async fn create_object_with_string_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: &[u8],
        value: &T,
    ) -> Result<(), StoreError> {
        self.create_with_key(bucket, ObjectKey::from_bytes(id), value)
            .await
    }

    async fn create_with_key<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: ObjectKey,
        value: &T,
    ) -> Result<(), StoreError> {
        let quoted = quote_bucket(bucket)?;
        let data = self
            .codec
            .encode(value)
            .map_err(|e| e.context("create object", bucket))?;
        let guard = self.slot.lock().await;
        let backend = guard.backend.as_ref().ok_or_else(completed)?;
        insert(backend, bucket, &quoted, &key, data).await
    }

    /// Decode every object of the bucket in ascending key order and hand it to `visit`.
    /// An error from `visit` stops the scan and is returned.
    ///
    /// # Errors
    /// Wrapped backend and envelope errors, or the error returned by `visit`.
    pub async fn get_all<T, V>(&self, bucket: &str, visit: V) -> Result<(), StoreError>
    where
        T: DeserializeOwned,
        V: FnMut(T) -> Result<(), StoreError>,
    {
        let quoted = quote_bucket(bucket)?;
        self.scan(
            bucket,
            &format!("SELECT data FROM {quoted} ORDER BY id"),
            Vec::new(),
            visit,
        )
        .await
    }

    /// Like [`Transaction::get_all`], limited to keys starting with `prefix`. The match is
    /// exact and case-sensitive; `%` and `_` in the prefix have no special meaning.
    ///
    /// # Errors
    /// Wrapped backend and envelope errors, or the error returned by `visit`.
    pub async fn get_all_with_key_prefix<T, V>(
        &self,
        bucket: &str,
        prefix: &[u8],
        visit: V,
    ) -> Result<(), StoreError>
    where
        T: DeserializeOwned,
        V: FnMut(T) -> Result<(), StoreError>,
    {
        let quoted = quote_bucket(bucket)?;
        self.scan(
            bucket,
            &format!(
                "SELECT data FROM {quoted} WHERE CAST(id AS TEXT) LIKE $1 ESCAPE '\\' ORDER BY id"
            ),
            vec![RowValues::Text(like_prefix_pattern(prefix))],
            visit,
        )
        .await
    }

    async fn scan<T, V>(
        &self,
        bucket: &str,
        sql: &str,
        params: Vec<RowValues>,
        mut visit: V,
    ) -> Result<(), StoreError>
    where
        T: DeserializeOwned,
        V: FnMut(T) -> Result<(), StoreError>,
    {
        let rs = {
            let guard = self.slot.lock().await;
            let backend = guard.backend.as_ref().ok_or_else(completed)?;
            backend
                .query(sql, &params)
                .await
                .map_err(|e| e.context("scan bucket", bucket))?
        };
        for row in &rs.results {
            let value: T = self
                .codec
                .decode(payload(row.get_by_index(0))?)
                .map_err(|e| e.context("scan bucket", bucket))?;
            visit(value)?;
        }
        Ok(())
    }
}

fn not_found(bucket: &str, key: &ObjectKey) -> StoreError {
    StoreError::ObjectNotFound {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
}

fn payload(value: Option<&RowValues>) -> Result<&[u8], StoreError> {
    value
        .and_then(RowValues::as_blob)
        .ok_or_else(|| StoreError::ExecutionError("data column is not binary".into()))
}

fn allocate(allocations: &mut Allocations, bucket: &str, db_next: i64) -> i64 {
    let next = match allocations.get(bucket) {
        Some(last) => db_next.max(last + 1),
        None => db_next,
    };
    allocations.insert(bucket.to_string(), next);
    next
}

async fn max_id_plus_one(backend: &BackendTx, quoted: &str) -> Result<i64, StoreError> {
    let rs = backend
        .query(&format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {quoted}"), &[])
        .await?;
    rs.scalar()
        .and_then(RowValues::as_int)
        .copied()
        .ok_or_else(|| StoreError::ExecutionError("next identifier is not an integer".into()))
}

/// Run the sequence lookup inside a savepoint so a failure leaves the transaction usable.
async fn isolated_next_id(backend: &BackendTx, quoted: &str) -> Result<i64, StoreError> {
    backend
        .batch(&format!("SAVEPOINT {NEXT_ID_SAVEPOINT}"))
        .await?;
    let result = max_id_plus_one(backend, quoted).await;
    let cleanup = if result.is_ok() {
        format!("RELEASE SAVEPOINT {NEXT_ID_SAVEPOINT}")
    } else {
        format!("ROLLBACK TO SAVEPOINT {NEXT_ID_SAVEPOINT}; RELEASE SAVEPOINT {NEXT_ID_SAVEPOINT}")
    };
    if let Err(e) = backend.batch(&cleanup).await {
        tracing::warn!(error = %e, "failed to close next identifier savepoint");
    }
    result
}

/// The INSERT runs under a savepoint so a unique violation leaves the enclosing
/// transaction usable on Postgres.
async fn insert(
    backend: &BackendTx,
    bucket: &str,
    quoted: &str,
    key: &ObjectKey,
    data: Vec<u8>,
) -> Result<(), StoreError> {
    backend.batch(&format!("SAVEPOINT {CREATE_SAVEPOINT}")).await?;
    let result = backend
        .execute(
            &format!("INSERT INTO {quoted} (id, data) VALUES ($1, $2)"),
            &[key.to_param(), RowValues::Blob(data)],
        )
        .await;
    let cleanup = if result.is_ok() {
        format!("RELEASE SAVEPOINT {CREATE_SAVEPOINT}")
    } else {
        format!("ROLLBACK TO SAVEPOINT {CREATE_SAVEPOINT}; RELEASE SAVEPOINT {CREATE_SAVEPOINT}")
    };
    if let Err(e) = backend.batch(&cleanup).await {
        tracing::warn!(error = %e, bucket, "failed to close create savepoint");
    }
    match result {
        Ok(_) => Ok(()),
        Err(e) if e.is_unique_violation() => Err(StoreError::CreateConflict {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }),
        Err(e) => Err(e.context("create object", bucket)),
    }
}
