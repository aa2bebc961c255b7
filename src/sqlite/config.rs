use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bb8::{ManageConnection, Pool};

use crate::config::PoolLimits;
use crate::error::StoreError;

/// A `rusqlite` connection shared with the blocking thread that runs its statements.
pub type SharedSqliteConnection = Arc<tokio::sync::Mutex<rusqlite::Connection>>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// bb8 manager for `rusqlite` connections.
///
/// Every new connection runs in WAL mode with a case-sensitive `LIKE`, so prefix scans
/// match byte-for-byte.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    path: String,
}

impl SqliteManager {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

fn open_connection(path: &str) -> Result<rusqlite::Connection, StoreError> {
    let conn = rusqlite::Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    // in-memory databases report "memory" and keep it
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "case_sensitive_like", true)?;
    Ok(conn)
}

impl ManageConnection for SqliteManager {
    type Connection = SharedSqliteConnection;
    type Error = StoreError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let path = self.path.clone();
        async move {
            tracing::debug!(path = %path, "sqlite connect start");
            let conn = tokio::task::spawn_blocking(move || open_connection(&path))
                .await
                .map_err(|e| {
                    StoreError::ConnectionError(format!("sqlite spawn_blocking join error: {e}"))
                })??;
            Ok(Arc::new(tokio::sync::Mutex::new(conn)))
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let handle = Arc::clone(conn);
        async move {
            run_blocking(handle, |guard| {
                guard
                    .execute_batch("SELECT 1")
                    .map_err(StoreError::SqliteError)
            })
            .await
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        // a connection still inside a transaction must not be handed out again
        conn.try_lock().is_ok_and(|guard| !guard.is_autocommit())
    }
}

/// Run `func` against the connection on the blocking thread pool.
pub(crate) async fn run_blocking<F, R>(
    conn: SharedSqliteConnection,
    func: F,
) -> Result<R, StoreError>
where
    F: FnOnce(&mut rusqlite::Connection) -> Result<R, StoreError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.blocking_lock();
        func(&mut guard)
    })
    .await
    .map_err(|e| StoreError::ExecutionError(format!("sqlite spawn_blocking join error: {e}")))?
}

/// Build a pool sized by `limits` and ping one connection before returning it.
///
/// An in-memory database exists once per connection, so its pool is capped at one.
///
/// # Errors
/// Returns [`StoreError::ConnectionError`] if the pool cannot be built or the ping fails.
pub async fn build_pool(
    manager: SqliteManager,
    limits: &PoolLimits,
) -> Result<Pool<SqliteManager>, StoreError> {
    let max_size = if manager.path() == ":memory:" {
        1
    } else {
        limits.max_open
    };
    let pool = Pool::builder()
        .max_size(max_size)
        .max_lifetime(limits.max_lifetime)
        .idle_timeout(limits.idle_timeout)
        .connection_timeout(limits.connection_timeout)
        .retry_connection(false)
        .build(manager)
        .await
        .map_err(|e| StoreError::ConnectionError(format!("sqlite pool error: {e}")))?;

    {
        let conn = pool.get().await.map_err(|e| {
            StoreError::ConnectionError(format!("sqlite checkout error: {e}"))
        })?;
        run_blocking(Arc::clone(&*conn), |guard| {
            guard
                .execute_batch("SELECT 1")
                .map_err(StoreError::SqliteError)
        })
        .await
        .map_err(|e| StoreError::ConnectionError(format!("sqlite ping failed: {e}")))?;
    }

    Ok(pool)
}
