use bb8::{Pool, PooledConnection};
use tokio::runtime::Handle;

use super::config::PgManager;
use super::params::Params;
use super::query::build_result_set;
use crate::error::StoreError;
use crate::results::ResultSet;
use crate::types::RowValues;

/// A pooled client with an open transaction.
///
/// Dropping it without [`PgTx::commit`] or [`PgTx::rollback`] issues a best-effort
/// `ROLLBACK` on the runtime before the client goes back to the pool.
pub struct PgTx {
    conn: Option<PooledConnection<'static, PgManager>>,
}

impl PgTx {
    /// Check out a client and run `BEGIN`.
    ///
    /// # Errors
    /// Pool checkout errors, or [`StoreError::ExecutionError`] if `BEGIN` fails.
    pub async fn begin(pool: &Pool<PgManager>) -> Result<Self, StoreError> {
        let conn = pool.get_owned().await?;
        conn.simple_query("BEGIN").await.map_err(|e| {
            StoreError::ExecutionError(format!("postgres begin error: {e}"))
        })?;
        Ok(Self { conn: Some(conn) })
    }

    fn client(&self) -> Result<&PooledConnection<'static, PgManager>, StoreError> {
        self.conn
            .as_ref()
            .ok_or_else(|| StoreError::ExecutionError("postgres transaction already finished".into()))
    }

    /// # Errors
    /// Prepare, execution or extraction errors.
    pub async fn query(&self, sql: &str, params: &[RowValues]) -> Result<ResultSet, StoreError> {
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        let converted = Params::convert(params);
        let rows = client.query(&stmt, converted.as_refs()).await?;
        build_result_set(&stmt, &rows)
    }

    /// # Errors
    /// Prepare or execution errors.
    pub async fn execute(&self, sql: &str, params: &[RowValues]) -> Result<u64, StoreError> {
        let client = self.client()?;
        let stmt = client.prepare(sql).await?;
        let converted = Params::convert(params);
        Ok(client.execute(&stmt, converted.as_refs()).await?)
    }

    /// Run parameterless statements such as `SAVEPOINT` or DDL.
    ///
    /// # Errors
    /// Execution errors.
    pub async fn batch(&self, sql: &str) -> Result<(), StoreError> {
        Ok(self.client()?.batch_execute(sql).await?)
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] if `COMMIT` fails; a rollback is attempted first.
    pub async fn commit(self) -> Result<(), StoreError> {
        self.finish_tx("COMMIT", "commit").await
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] if `ROLLBACK` fails.
    pub async fn rollback(self) -> Result<(), StoreError> {
        self.finish_tx("ROLLBACK", "rollback").await
    }

    async fn finish_tx(mut self, sql: &str, action: &str) -> Result<(), StoreError> {
        let Some(conn) = self.conn.take() else {
            return Err(StoreError::ExecutionError(
                "postgres transaction already finished".into(),
            ));
        };
        match conn.simple_query(sql).await {
            Ok(_) => Ok(()),
            Err(e) => {
                let _ = conn.simple_query("ROLLBACK").await;
                Err(StoreError::ExecutionError(format!("postgres {action} error: {e}")))
            }
        }
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take()
            && let Ok(handle) = Handle::try_current()
        {
            handle.spawn(async move {
                if let Err(e) = conn.simple_query("ROLLBACK").await {
                    tracing::error!(error = %e, "postgres rollback on drop failed");
                }
            });
        }
    }
}
