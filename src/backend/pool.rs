use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::types::DatabaseType;

#[cfg(feature = "postgres")]
use crate::postgres::PgManager;
#[cfg(feature = "sqlite")]
use crate::sqlite::SqliteManager;

use super::tx::{BackendTx, TxMode};

/// Connection pool for the configured engine.
#[derive(Clone)]
pub enum BackendPool {
    #[cfg(feature = "postgres")]
    Postgres(bb8::Pool<PgManager>),
    #[cfg(feature = "sqlite")]
    Sqlite(bb8::Pool<SqliteManager>),
}

impl std::fmt::Debug for BackendPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (name, state) = match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => ("Postgres", pool.state()),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => ("Sqlite", pool.state()),
        };
        f.debug_struct(name)
            .field("connections", &state.connections)
            .field("idle_connections", &state.idle_connections)
            .finish()
    }
}

impl BackendPool {
    /// Build the pool described by `config` and ping it once.
    ///
    /// # Errors
    /// [`StoreError::ConfigError`] for an unusable connection string, otherwise
    /// [`StoreError::ConnectionError`] when the database cannot be reached.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        match config.db_type {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                let manager = PgManager::from_connection_string(&config.connection_string)?;
                let pool = crate::postgres::build_pool(manager, &config.limits).await?;
                Ok(Self::Postgres(pool))
            }
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => {
                let manager = SqliteManager::new(config.connection_string.clone());
                let pool = crate::sqlite::build_pool(manager, &config.limits).await?;
                Ok(Self::Sqlite(pool))
            }
        }
    }

    #[must_use]
    pub fn db_type(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(_) => DatabaseType::Postgres,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => DatabaseType::Sqlite,
        }
    }

    /// Check out a connection and open a transaction on it.
    ///
    /// # Errors
    /// Pool checkout or `BEGIN` failures.
    #[cfg_attr(not(feature = "sqlite"), allow(unused_variables))]
    pub async fn begin(&self, mode: TxMode) -> Result<BackendTx, StoreError> {
        match self {
            #[cfg(feature = "postgres")]
            Self::Postgres(pool) => Ok(BackendTx::Postgres(
                crate::postgres::PgTx::begin(pool).await?,
            )),
            #[cfg(feature = "sqlite")]
            Self::Sqlite(pool) => Ok(BackendTx::Sqlite(
                crate::sqlite::SqliteTx::begin(pool, mode == TxMode::ReadWrite).await?,
            )),
        }
    }
}
