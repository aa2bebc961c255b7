use crate::error::StoreError;
use crate::results::ResultSet;
use crate::types::{DatabaseType, RowValues};

#[cfg(feature = "postgres")]
use crate::postgres::PgTx;
#[cfg(feature = "sqlite")]
use crate::sqlite::SqliteTx;

/// Intent of a transaction. Only `SQLite` acts on it, taking the write lock at `BEGIN` for
/// writers; reads inside a read-write transaction and writes inside a read-only one both
/// still work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    ReadWrite,
    ReadOnly,
}

/// One pooled connection inside an open transaction.
///
/// All statements use `$N` placeholders regardless of engine.
pub enum BackendTx {
    #[cfg(feature = "postgres")]
    Postgres(PgTx),
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteTx),
}

impl BackendTx {
    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => DatabaseType::Postgres,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => DatabaseType::Sqlite,
        }
    }

    /// # Errors
    /// Backend errors from preparing or running the statement.
    pub async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(tx) => tx.query(sql, params).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(tx) => tx.query(sql, params).await,
        }
    }

    /// Returns the number of rows affected.
    ///
    /// # Errors
    /// Backend errors from preparing or running the statement.
    pub async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<u64, StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(tx) => tx.execute(sql, params).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(tx) => tx.execute(sql, params).await,
        }
    }

    /// # Errors
    /// Backend errors.
    pub async fn batch(&self, sql: &str) -> Result<(), StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(tx) => tx.batch(sql).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(tx) => tx.batch(sql).await,
        }
    }

    /// Whether a table named `name` exists in the current schema.
    ///
    /// # Errors
    /// Backend errors.
    pub async fn table_exists(&self, name: &str) -> Result<bool, StoreError> {
        let rs = self
            .query(
                super::dialect::table_exists(self.db_type()),
                &[RowValues::Text(name.to_string())],
            )
            .await?;
        rs.scalar().and_then(RowValues::as_bool).copied().ok_or_else(|| {
            StoreError::ExecutionError(format!("unexpected existence check result for {name}"))
        })
    }

    /// # Errors
    /// Backend errors from `COMMIT`.
    pub async fn commit(self) -> Result<(), StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(tx) => tx.commit().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(tx) => tx.commit().await,
        }
    }

    /// # Errors
    /// Backend errors from `ROLLBACK`.
    pub async fn rollback(self) -> Result<(), StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(tx) => tx.rollback().await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(tx) => tx.rollback().await,
        }
    }
}
