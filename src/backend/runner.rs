use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{BackendPool, BackendTx, TxMode};
use crate::error::StoreError;

/// The live backend transaction plus per-transaction bookkeeping of the handle type.
pub(crate) struct TxState<S> {
    pub(crate) backend: Option<BackendTx>,
    pub(crate) local: S,
}

pub(crate) type TxSlot<S> = Arc<Mutex<TxState<S>>>;

pub(crate) fn completed() -> StoreError {
    StoreError::ExecutionError("transaction already completed".to_string())
}

/// Run `f` inside one backend transaction.
///
/// `wrap` turns the shared slot into the handle passed to `f`. The transaction commits when
/// `f` returns `Ok` and rolls back when it returns `Err`, panics, or `cancel` fires first. A
/// panic is re-raised once the rollback has been attempted. Afterwards the slot is empty, so
/// any handle that escaped `f` only sees "transaction already completed".
pub(crate) async fn run_in_transaction<S, H, W, F, Fut, T>(
    pool: &BackendPool,
    mode: TxMode,
    cancel: &CancellationToken,
    wrap: W,
    f: F,
) -> Result<T, StoreError>
where
    S: Default,
    W: FnOnce(TxSlot<S>) -> H,
    F: FnOnce(H) -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    let backend = pool.begin(mode).await?;
    let slot: TxSlot<S> = Arc::new(Mutex::new(TxState {
        backend: Some(backend),
        local: S::default(),
    }));
    let handle = wrap(Arc::clone(&slot));
    tracing::debug!(?mode, db = %pool.db_type(), "transaction started");

    let work = AssertUnwindSafe(async move { f(handle).await }).catch_unwind();
    let outcome = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        res = work => Some(res),
    };

    let backend = slot.lock().await.backend.take();
    match outcome {
        Some(Ok(Ok(value))) => {
            let backend = backend.ok_or_else(completed)?;
            backend
                .commit()
                .await
                .map_err(|e| e.context("commit transaction", pool.db_type().to_string()))?;
            tracing::debug!(?mode, "transaction committed");
            Ok(value)
        }
        Some(Ok(Err(err))) => {
            rollback_logged(backend, "error").await;
            Err(err)
        }
        Some(Err(panic)) => {
            rollback_logged(backend, "panic").await;
            std::panic::resume_unwind(panic)
        }
        None => {
            rollback_logged(backend, "cancellation").await;
            Err(StoreError::Cancelled)
        }
    }
}

async fn rollback_logged(backend: Option<BackendTx>, reason: &'static str) {
    let Some(backend) = backend else {
        return;
    };
    match backend.rollback().await {
        Ok(()) => tracing::debug!(reason, "transaction rolled back"),
        Err(e) => tracing::error!(reason, error = %e, "failed to rollback transaction"),
    }
}
