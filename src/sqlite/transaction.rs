use std::sync::Arc;

use bb8::{Pool, PooledConnection};
use tokio::runtime::{Handle, RuntimeFlavor};

use super::config::{SharedSqliteConnection, SqliteManager, run_blocking};
use super::params::Params;
use super::query::build_result_set;
use crate::error::StoreError;
use crate::results::ResultSet;
use crate::translation::{PlaceholderStyle, translate_placeholders};
use crate::types::RowValues;

/// A pooled connection with an open transaction.
///
/// Statements are written with `$N` placeholders and translated before they are prepared.
/// Dropping it unfinished rolls back before the connection returns to the pool.
pub struct SqliteTx {
    conn: Option<PooledConnection<'static, SqliteManager>>,
}

impl SqliteTx {
    /// Check out a connection and start a transaction. Writers take the database write
    /// lock up front (`BEGIN IMMEDIATE`) so they never fail half-way on lock upgrade.
    ///
    /// # Errors
    /// Pool checkout errors, or the `SQLite` error raised by `BEGIN`.
    pub async fn begin(pool: &Pool<SqliteManager>, write: bool) -> Result<Self, StoreError> {
        let conn = pool.get_owned().await?;
        let begin = if write { "BEGIN IMMEDIATE" } else { "BEGIN" };
        run_blocking(Arc::clone(&*conn), move |guard| {
            guard.execute_batch(begin).map_err(StoreError::SqliteError)
        })
        .await?;
        Ok(Self { conn: Some(conn) })
    }

    fn handle(&self) -> Result<SharedSqliteConnection, StoreError> {
        self.conn
            .as_ref()
            .map(|c| Arc::clone(&**c))
            .ok_or_else(|| StoreError::ExecutionError("sqlite transaction already finished".into()))
    }

    /// # Errors
    /// Prepare, execution or extraction errors.
    pub async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, StoreError> {
        let handle = self.handle()?;
        let sql = translate_placeholders(sql, PlaceholderStyle::Sqlite).into_owned();
        let params = Params::convert(params);
        run_blocking(handle, move |guard| {
            let mut stmt = guard.prepare_cached(&sql)?;
            build_result_set(&mut stmt, params.as_values())
        })
        .await
    }

    /// # Errors
    /// Prepare or execution errors.
    pub async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<u64, StoreError> {
        let handle = self.handle()?;
        let sql = translate_placeholders(sql, PlaceholderStyle::Sqlite).into_owned();
        let params = Params::convert(params);
        run_blocking(handle, move |guard| {
            let mut stmt = guard.prepare_cached(&sql)?;
            let changed = stmt.execute(rusqlite::params_from_iter(params.as_values().iter()))?;
            Ok(changed as u64)
        })
        .await
    }

    /// Run parameterless statements such as `SAVEPOINT` or DDL.
    ///
    /// # Errors
    /// Execution errors.
    pub async fn batch(&self, sql: &str) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let sql = sql.to_owned();
        run_blocking(handle, move |guard| {
            guard.execute_batch(&sql).map_err(StoreError::SqliteError)
        })
        .await
    }

    /// # Errors
    /// The `SQLite` error raised by `COMMIT`; a rollback is attempted first.
    pub async fn commit(mut self) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let result = run_blocking(Arc::clone(&handle), |guard| {
            guard.execute_batch("COMMIT").map_err(StoreError::SqliteError)
        })
        .await;
        if result.is_err() {
            let _ = run_blocking(handle, |guard| {
                guard.execute_batch("ROLLBACK").map_err(StoreError::SqliteError)
            })
            .await;
        }
        self.conn = None;
        result
    }

    /// # Errors
    /// The `SQLite` error raised by `ROLLBACK`.
    pub async fn rollback(mut self) -> Result<(), StoreError> {
        let handle = self.handle()?;
        let result = run_blocking(handle, |guard| {
            guard.execute_batch("ROLLBACK").map_err(StoreError::SqliteError)
        })
        .await;
        self.conn = None;
        result
    }
}

impl Drop for SqliteTx {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let conn_handle: SharedSqliteConnection = Arc::clone(&*conn);
        match Handle::try_current() {
            // roll back before the connection is visible to the next checkout
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| rollback_blocking(&conn_handle));
                drop(conn);
            }
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = run_blocking(conn_handle, |guard| {
                        guard.execute_batch("ROLLBACK").map_err(StoreError::SqliteError)
                    })
                    .await;
                    drop(conn);
                });
            }
            Err(_) => {
                rollback_blocking(&conn_handle);
                drop(conn);
            }
        }
    }
}

fn rollback_blocking(conn: &SharedSqliteConnection) {
    let guard = conn.blocking_lock();
    if !guard.is_autocommit()
        && let Err(e) = guard.execute_batch("ROLLBACK")
    {
        tracing::error!(error = %e, "sqlite rollback on drop failed");
    }
}
