#![cfg(feature = "sqlite")]

mod common;

use common::unique_db_path;
use sql_bucket_store::prelude::*;

async fn store(prefix: &str) -> Result<BucketStore, StoreError> {
    BucketStore::open(&StoreConfig::sqlite_builder(unique_db_path(prefix)).finish()?).await
}

#[tokio::test(flavor = "multi_thread")]
async fn put_get_delete() -> Result<(), Box<dyn std::error::Error>> {
    let store = store("kv_basic").await?;

    store
        .update(|tx| async move {
            assert!(tx.writeable());
            let bucket = tx.create_bucket_if_not_exists("settings").await?;
            bucket.put(b"theme", b"dark").await?;
            bucket.put(b"theme", b"light").await?;
            bucket.put(b"lang", b"en").await?;
            Ok(())
        })
        .await?;

    let (theme, missing) = store
        .view(|tx| async move {
            assert!(!tx.writeable());
            let bucket = tx.bucket("settings");
            Ok((bucket.get(b"theme").await?, bucket.get(b"nope").await?))
        })
        .await?;
    assert_eq!(theme.as_deref(), Some(&b"light"[..]));
    assert_eq!(missing, None);

    store
        .update(|tx| async move {
            let bucket = tx.bucket("settings");
            bucket.delete(b"theme").await?;
            bucket.delete(b"theme").await
        })
        .await?;
    let gone = store
        .view(|tx| async move { tx.bucket("settings").get(b"theme").await })
        .await?;
    assert!(gone.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn buckets_are_isolated_and_ordered() -> Result<(), Box<dyn std::error::Error>> {
    let store = store("kv_order").await?;
    store
        .update(|tx| async move {
            let a = tx.bucket("a");
            for key in [b"c", b"a", b"b"] {
                a.put(key, b"1").await?;
            }
            tx.bucket("b").put(b"z", b"2").await
        })
        .await?;

    let keys = store
        .view(|tx| async move {
            let mut keys = Vec::new();
            tx.bucket("a")
                .for_each(|k, v| {
                    assert_eq!(v, b"1");
                    keys.push(k.to_vec());
                    Ok(())
                })
                .await?;
            Ok(keys)
        })
        .await?;
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn view_rejects_writes() -> Result<(), Box<dyn std::error::Error>> {
    let store = store("kv_readonly").await?;
    let err = store
        .view(|tx| async move { tx.bucket("settings").put(b"k", b"v").await })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ReadOnlyTransaction));

    let err = store
        .view(|tx| async move { tx.bucket("settings").delete(b"k").await })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ReadOnlyTransaction));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_update_rolls_back() -> Result<(), Box<dyn std::error::Error>> {
    let store = store("kv_rollback").await?;
    let result: Result<(), StoreError> = store
        .update(|tx| async move {
            tx.bucket("settings").put(b"k", b"v").await?;
            Err(StoreError::ExecutionError("abort".into()))
        })
        .await;
    assert!(result.is_err());

    let value = store
        .view(|tx| async move { tx.bucket("settings").get(b"k").await })
        .await?;
    assert!(value.is_none());

    store.close().await;
    let err = store
        .view(|tx| async move { tx.bucket("settings").get(b"k").await })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoConnection));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn close_cancels_in_flight_update() -> Result<(), Box<dyn std::error::Error>> {
    let store = store("kv_close").await?;
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let (result, ()) = tokio::join!(
        store.update(|tx| async move {
            tx.bucket("settings").put(b"k", b"v").await?;
            let _ = started_tx.send(());
            std::future::pending::<Result<(), StoreError>>().await
        }),
        async {
            let _ = started_rx.await;
            store.close().await;
        }
    );
    assert!(matches!(result, Err(StoreError::Cancelled)));
    let err = store
        .update(|tx| async move { tx.bucket("settings").put(b"k", b"v").await })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NoConnection), "got {err:?}");
    Ok(())
}
