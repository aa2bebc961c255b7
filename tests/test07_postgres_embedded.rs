#![cfg(feature = "test-utils")]

mod common;

use std::collections::BTreeMap;

use common::{Endpoint, test_key};
use serde_json::{Value, json};
use sql_bucket_store::prelude::*;
use sql_bucket_store::test_utils::{setup_postgres_embedded, stop_postgres_embedded};

#[test]
fn postgres_bucket_operations() -> Result<(), Box<dyn std::error::Error>> {
    let pg = setup_postgres_embedded("bucket_store_test")?;
    let config = pg.store_config().finish()?;
    let sealed_config = pg.store_config().encryption_key(test_key()).finish()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let conn = Connection::new(config.clone()).await?;
        assert!(!conn.needs_encryption_migration().await?);

        conn.update_tx(|tx| async move {
            tx.ensure_bucket("endpoints").await?;
            tx.ensure_string_bucket("edge_jobs").await?;
            tx.ensure_bucket(UNENCRYPTED_METADATA_TABLE).await
        })
        .await?;

        // CRUD
        let id = conn
            .create_object("endpoints", |id| (id, Endpoint::new(id, "local")))
            .await?;
        assert_eq!(id, 1);
        conn.update_object("endpoints", 1, &Endpoint::new(1, "renamed"))
            .await?;
        let fetched: Endpoint = conn.get_object("endpoints", 1).await?;
        assert_eq!(fetched.name, "renamed");
        let err = conn
            .create_object_with_id("endpoints", 1, &Endpoint::new(1, "dup"))
            .await
            .unwrap_err();
        assert!(err.is_create_conflict(), "unexpected error: {err}");
        assert!(
            conn.get_object::<Endpoint>("endpoints", 99)
                .await
                .unwrap_err()
                .is_object_not_found()
        );

        // a failed lookup is isolated from the rest of the transaction
        let (missing, next) = conn
            .update_tx(|tx| async move {
                let missing = tx.next_identifier("no_such_bucket").await;
                tx.create_object_with_id("endpoints", 2, &Endpoint::new(2, "two"))
                    .await?;
                Ok((missing, tx.next_identifier("endpoints").await))
            })
            .await?;
        assert_eq!((missing, next), (1, 3));

        // a create conflict leaves the transaction usable and the commit intact
        let conflicted = conn
            .update_tx(|tx| async move {
                tx.create_object_with_id("endpoints", 3, &Endpoint::new(3, "three"))
                    .await?;
                let conflict = tx
                    .create_object_with_id("endpoints", 1, &Endpoint::new(1, "dup"))
                    .await
                    .is_err_and(|e| e.is_create_conflict());
                tx.create_object_with_id("endpoints", 4, &Endpoint::new(4, "four"))
                    .await?;
                Ok(conflict)
            })
            .await?;
        assert!(conflicted);
        let three: Endpoint = conn.get_object("endpoints", 3).await?;
        let four: Endpoint = conn.get_object("endpoints", 4).await?;
        assert_eq!((three.name.as_str(), four.name.as_str()), ("three", "four"));

        // prefix scans over text keys
        for key in ["a_b1", "axb2", "a_b3"] {
            conn.create_object_with_string_id("edge_jobs", key.as_bytes(), &key)
                .await?;
        }
        let found = conn
            .view_tx(|tx| async move {
                let mut found = Vec::new();
                tx.get_all_with_key_prefix("edge_jobs", b"a_b", |v: String| {
                    found.push(v);
                    Ok(())
                })
                .await?;
                Ok(found)
            })
            .await?;
        assert_eq!(found, vec!["a_b1".to_string(), "a_b3".to_string()]);

        // sequences
        conn.restore_metadata(&BTreeMap::from([("endpoints".to_string(), 50)]))
            .await?;
        let metadata = conn.backup_metadata().await?;
        assert_eq!(metadata.get("endpoints"), Some(&50));

        let exported: Value = serde_json::from_slice(&conn.export_json(true).await?)?;
        assert_eq!(exported["endpoints"][1]["data"]["name"], json!("two"));
        assert_eq!(exported["__metadata"]["endpoints"], json!(50));

        // a key with a plaintext store means migration
        let keyed = Connection::new(sealed_config).await?;
        assert!(keyed.needs_encryption_migration().await?);
        keyed.close().await;
        conn.close().await;

        // single-table buckets
        let store = BucketStore::open(&config).await?;
        store
            .update(|tx| async move {
                let bucket = tx.bucket("settings");
                bucket.put(b"b", b"2").await?;
                bucket.put(b"a", b"1").await?;
                bucket.put(b"a", b"3").await
            })
            .await?;
        let pairs = store
            .view(|tx| async move {
                let mut pairs = Vec::new();
                tx.bucket("settings")
                    .for_each(|k, v| {
                        pairs.push((k.to_vec(), v.to_vec()));
                        Ok(())
                    })
                    .await?;
                Ok(pairs)
            })
            .await?;
        assert_eq!(
            pairs,
            vec![(b"a".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
        store.close().await;
        Ok::<(), StoreError>(())
    })?;

    stop_postgres_embedded(pg);
    Ok(())
}
