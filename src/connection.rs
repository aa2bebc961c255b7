use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::backend::runner::{TxSlot, completed, run_in_transaction};
use crate::backend::{BackendPool, TxMode};
use crate::codec::EnvelopeCodec;
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::key::ObjectKey;
use crate::migration::{
    ENCRYPTED_METADATA_TABLE, MarkerState, UNENCRYPTED_METADATA_TABLE, classify, is_fatal,
};
use crate::transaction::Transaction;

enum PoolState {
    Unopened,
    Open(BackendPool),
    Closed,
    Blocked(String),
}

/// A pooled connection to a bucket store with one table per bucket.
///
/// Every operation runs inside [`Connection::update_tx`] or [`Connection::view_tx`]; the
/// object helpers on this type are single-operation transactions.
///
/// ```rust,no_run
/// use sql_bucket_store::prelude::*;
///
/// # async fn run() -> Result<(), StoreError> {
/// let config = StoreConfig::sqlite_builder("/var/lib/app/store.db").finish()?;
/// let conn = Connection::new(config).await?;
/// conn.update_tx(|tx| async move {
///     tx.ensure_bucket("settings").await?;
///     tx.create_object_with_id("settings", 1, &serde_json::json!({"theme": "dark"}))
///         .await
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub struct Connection {
    config: StoreConfig,
    codec: Arc<EnvelopeCodec>,
    state: RwLock<PoolState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("db_type", &self.config.db_type)
            .field("encrypted", &self.codec.is_encrypted())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Validate `config` and open the pool.
    ///
    /// # Errors
    /// [`StoreError::ConfigError`] for invalid settings, [`StoreError::ConnectionError`]
    /// when the database cannot be reached.
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let conn = Self::unopened(config)?;
        conn.open().await?;
        Ok(conn)
    }

    /// Validate `config` without connecting; call [`Connection::open`] later.
    ///
    /// # Errors
    /// [`StoreError::ConfigError`] for invalid settings.
    pub fn unopened(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        let codec = EnvelopeCodec::new(config.key_bytes(), config.encrypted)?;
        Ok(Self {
            config,
            codec: Arc::new(codec),
            state: RwLock::new(PoolState::Unopened),
            cancel: CancellationToken::new(),
        })
    }

    /// Build the pool and ping the database. The pool is only installed once the ping
    /// succeeds. Opening an open connection is a no-op.
    ///
    /// # Errors
    /// [`StoreError::ConnectionError`] when the database cannot be reached or the
    /// connection was already closed.
    pub async fn open(&self) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        match &*state {
            PoolState::Open(_) => return Ok(()),
            PoolState::Closed => {
                return Err(StoreError::ConnectionError(
                    "connection was closed and cannot be reopened".to_string(),
                ));
            }
            PoolState::Blocked(reason) => return Err(StoreError::MigrationBlocked(reason.clone())),
            PoolState::Unopened => {}
        }

        tracing::info!(db = %self.config.db_type, "connecting to database");
        let pool = BackendPool::connect(&self.config).await.map_err(|e| match e {
            StoreError::ConfigError(_) | StoreError::ConnectionError(_) => e,
            other => StoreError::ConnectionError(format!("failed to connect to database: {other}")),
        })?;
        *state = PoolState::Open(pool);
        Ok(())
    }

    /// Abort in-flight transaction bodies at their next await point and release the pool.
    pub async fn close(&self) {
        tracing::info!(db = %self.config.db_type, "closing database connection");
        self.cancel.cancel();
        *self.state.write().await = PoolState::Closed;
    }

    async fn pool(&self) -> Result<BackendPool, StoreError> {
        match &*self.state.read().await {
            PoolState::Open(pool) => Ok(pool.clone()),
            PoolState::Unopened | PoolState::Closed => Err(StoreError::NoConnection),
            PoolState::Blocked(reason) => Err(StoreError::MigrationBlocked(reason.clone())),
        }
    }

    async fn block(&self, reason: String) {
        tracing::error!(%reason, "connection blocked");
        *self.state.write().await = PoolState::Blocked(reason);
    }

    /// Run `f` in a transaction that commits when it returns `Ok`.
    ///
    /// Returning `Err`, panicking or closing the connection meanwhile rolls everything back.
    /// A panic is resumed after the rollback.
    ///
    /// # Errors
    /// The error returned by `f`, [`StoreError::Cancelled`] after [`Connection::close`], or
    /// connectivity errors from starting or committing the transaction.
    pub async fn update_tx<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(TxMode::ReadWrite, f).await
    }

    /// Run `f` in a transaction meant for reads.
    ///
    /// It takes the same path as [`Connection::update_tx`]: writes made inside are not
    /// rejected and commit with it.
    ///
    /// # Errors
    /// See [`Connection::update_tx`].
    pub async fn view_tx<T, F, Fut>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.run(TxMode::ReadOnly, f).await
    }

    async fn run<T, F, Fut>(&self, mode: TxMode, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let pool = self.pool().await?;
        let codec = Arc::clone(&self.codec);
        run_in_transaction(
            &pool,
            mode,
            &self.cancel,
            move |slot| Transaction::new(slot, codec),
            f,
        )
        .await
    }

    /// Check the marker tables and decide whether the plaintext store must be migrated to
    /// an encrypted one before use.
    ///
    /// # Errors
    /// [`StoreError::HaveEncryptedAndUnencrypted`] and [`StoreError::HaveEncryptedWithNoKey`]
    /// also block this connection: its pool is released and every later call fails with
    /// [`StoreError::MigrationBlocked`].
    pub async fn needs_encryption_migration(&self) -> Result<bool, StoreError> {
        let pool = self.pool().await?;
        let markers = run_in_transaction(
            &pool,
            TxMode::ReadOnly,
            &self.cancel,
            |slot: TxSlot<()>| slot,
            |slot| async move {
                let guard = slot.lock().await;
                let backend = guard.backend.as_ref().ok_or_else(completed)?;
                let unencrypted = backend
                    .table_exists(UNENCRYPTED_METADATA_TABLE)
                    .await
                    .map_err(|e| e.context("check marker table", UNENCRYPTED_METADATA_TABLE))?;
                let encrypted = backend
                    .table_exists(ENCRYPTED_METADATA_TABLE)
                    .await
                    .map_err(|e| e.context("check marker table", ENCRYPTED_METADATA_TABLE))?;
                Ok(MarkerState {
                    unencrypted,
                    encrypted,
                })
            },
        )
        .await?;

        let key_present = self.config.key_bytes().is_some();
        match classify(markers, key_present) {
            Err(err) if is_fatal(&err) => {
                self.block(err.to_string()).await;
                Err(err)
            }
            other => {
                tracing::debug!(?markers, key_present, result = ?other.as_ref().ok(), "migration check");
                other
            }
        }
    }

    /// Next free identifier of `bucket` in its own transaction. Failures are logged and
    /// yield `1`.
    pub async fn next_identifier(&self, bucket: &str) -> i64 {
        self.view_tx(|tx| async move { Ok(tx.next_identifier(bucket).await) })
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(bucket, error = %e, "failed to get the next identifier");
                1
            })
    }

    /// # Errors
    /// See [`Transaction::ensure_bucket`].
    pub async fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        self.update_tx(|tx| async move { tx.ensure_bucket(bucket).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::create_object`].
    pub async fn create_object<T, G>(&self, bucket: &str, generator: G) -> Result<i64, StoreError>
    where
        T: Serialize,
        G: FnOnce(i64) -> (i64, T),
    {
        self.update_tx(|tx| async move { tx.create_object(bucket, generator).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::create_object_with_id`].
    pub async fn create_object_with_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: i64,
        value: &T,
    ) -> Result<(), StoreError> {
        self.update_tx(|tx| async move { tx.create_object_with_id(bucket, id, value).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::create_object_with_string_id`].
    pub async fn create_object_with_string_id<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        id: &[u8],
        value: &T,
    ) -> Result<(), StoreError> {
        self.update_tx(|tx| async move { tx.create_object_with_string_id(bucket, id, value).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::get_object`].
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
    ) -> Result<T, StoreError> {
        let key = key.into();
        self.view_tx(|tx| async move { tx.get_object(bucket, key).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::update_object`].
    pub async fn update_object<T: Serialize + ?Sized>(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
        value: &T,
    ) -> Result<(), StoreError> {
        let key = key.into();
        self.update_tx(|tx| async move { tx.update_object(bucket, key, value).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::delete_object`].
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: impl Into<ObjectKey>,
    ) -> Result<(), StoreError> {
        let key = key.into();
        self.update_tx(|tx| async move { tx.delete_object(bucket, key).await })
            .await
    }

    /// # Errors
    /// See [`Transaction::get_all`].
    pub async fn get_all<T, V>(&self, bucket: &str, visit: V) -> Result<(), StoreError>
    where
        T: DeserializeOwned,
        V: FnMut(T) -> Result<(), StoreError>,
    {
        self.view_tx(|tx| async move { tx.get_all(bucket, visit).await })
            .await
    }

    /// Whether payloads are sealed. Fixed at construction.
    #[must_use]
    pub fn is_encrypted_store(&self) -> bool {
        self.codec.is_encrypted()
    }

    /// The connection string (or `SQLite` path) this store was configured with.
    #[must_use]
    pub fn store_path(&self) -> &str {
        &self.config.connection_string
    }

    #[must_use]
    pub fn convert_to_key(&self, id: i64) -> ObjectKey {
        ObjectKey::Id(id)
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Encode `value` exactly as it would be stored.
    ///
    /// # Errors
    /// See [`EnvelopeCodec::encode`].
    pub fn marshal_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, StoreError> {
        self.codec.encode(value)
    }

    /// Decode a stored payload.
    ///
    /// # Errors
    /// See [`EnvelopeCodec::decode`].
    pub fn unmarshal_object<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, StoreError> {
        self.codec.decode(data)
    }

    pub(crate) async fn open_pool(&self) -> Result<BackendPool, StoreError> {
        self.pool().await
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }
}
