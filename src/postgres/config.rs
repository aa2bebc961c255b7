use std::future::Future;

use bb8::{ManageConnection, Pool};
use tokio_postgres::{Client, NoTls};

use crate::config::PoolLimits;
use crate::error::StoreError;

/// bb8 manager for `tokio-postgres` clients.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self { config }
    }

    /// # Errors
    /// Returns [`StoreError::ConfigError`] if the connection string does not parse.
    pub fn from_connection_string(connection_string: &str) -> Result<Self, StoreError> {
        let config = connection_string.parse::<tokio_postgres::Config>().map_err(|e| {
            StoreError::ConfigError(format!("invalid postgres connection string: {e}"))
        })?;
        Ok(Self::new(config))
    }
}

impl ManageConnection for PgManager {
    type Connection = Client;
    type Error = tokio_postgres::Error;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        async move {
            tracing::debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect start"
            );
            let (client, connection) = cfg.connect(NoTls).await?;
            tokio::spawn(async move {
                if let Err(e) = connection.await {
                    tracing::warn!(error = %e, "postgres connection task ended with error");
                }
            });
            Ok(client)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.simple_query("SELECT 1").await.map(|_| ()) }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed()
    }
}

/// Build a pool sized by `limits` and check one connection out before returning it.
///
/// # Errors
/// Returns [`StoreError::ConnectionError`] if the pool cannot be built or the ping fails.
pub async fn build_pool(
    manager: PgManager,
    limits: &PoolLimits,
) -> Result<Pool<PgManager>, StoreError> {
    let pool = Pool::builder()
        .max_size(limits.max_open)
        .max_lifetime(limits.max_lifetime)
        .idle_timeout(limits.idle_timeout)
        .connection_timeout(limits.connection_timeout)
        .retry_connection(false)
        .build(manager)
        .await
        .map_err(|e| StoreError::ConnectionError(format!("postgres pool error: {e}")))?;

    {
        let conn = pool
            .get()
            .await
            .map_err(|e| StoreError::ConnectionError(format!("postgres checkout error: {e}")))?;
        conn.simple_query("SELECT 1")
            .await
            .map_err(|e| StoreError::ConnectionError(format!("postgres ping failed: {e}")))?;
    }

    Ok(pool)
}
