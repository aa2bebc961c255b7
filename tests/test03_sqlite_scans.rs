#![cfg(feature = "sqlite")]

mod common;

use common::{Endpoint, sqlite_connection};
use sql_bucket_store::prelude::*;

#[tokio::test(flavor = "multi_thread")]
async fn get_all_visits_in_key_order() -> Result<(), Box<dyn std::error::Error>> {
    let conn = sqlite_connection("scan_order").await?;
    conn.ensure_bucket("endpoints").await?;
    for id in [3, 1, 2] {
        conn.create_object_with_id("endpoints", id, &Endpoint::new(id, &format!("e{id}")))
            .await?;
    }

    let mut ids = Vec::new();
    conn.get_all("endpoints", |e: Endpoint| {
        ids.push(e.id);
        Ok(())
    })
    .await?;
    assert_eq!(ids, vec![1, 2, 3]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn visitor_error_stops_the_scan() -> Result<(), Box<dyn std::error::Error>> {
    let conn = sqlite_connection("scan_stop").await?;
    conn.ensure_bucket("endpoints").await?;
    for id in 1..=5 {
        conn.create_object_with_id("endpoints", id, &Endpoint::new(id, "x"))
            .await?;
    }

    let mut visited = 0;
    let err = conn
        .get_all("endpoints", |e: Endpoint| {
            visited += 1;
            if e.id == 2 {
                return Err(StoreError::ExecutionError("stop".into()));
            }
            Ok(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ExecutionError(ref m) if m == "stop"));
    assert_eq!(visited, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn prefix_scan_treats_wildcards_literally() -> Result<(), Box<dyn std::error::Error>> {
    let conn = sqlite_connection("scan_prefix").await?;
    let found = conn
        .update_tx(|tx| async move {
            tx.ensure_string_bucket("edge_jobs").await?;
            for key in ["a_b1", "axb2", "a_b3", "A_b4", "a%c", "b_b5"] {
                tx.create_object_with_string_id("edge_jobs", key.as_bytes(), &key)
                    .await?;
            }

            let mut underscore = Vec::new();
            tx.get_all_with_key_prefix("edge_jobs", b"a_b", |v: String| {
                underscore.push(v);
                Ok(())
            })
            .await?;

            let mut percent = Vec::new();
            tx.get_all_with_key_prefix("edge_jobs", b"a%", |v: String| {
                percent.push(v);
                Ok(())
            })
            .await?;

            let mut everything = 0;
            tx.get_all_with_key_prefix("edge_jobs", b"", |_: String| {
                everything += 1;
                Ok(())
            })
            .await?;
            Ok((underscore, percent, everything))
        })
        .await?;

    assert_eq!(found.0, vec!["a_b1".to_string(), "a_b3".to_string()]);
    assert_eq!(found.1, vec!["a%c".to_string()]);
    assert_eq!(found.2, 6);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_all_objects_by_predicate() -> Result<(), Box<dyn std::error::Error>> {
    let conn = sqlite_connection("delete_all").await?;
    conn.ensure_bucket("endpoints").await?;
    for (id, name) in [(1, "keep"), (2, "drop"), (3, "drop"), (4, "keep")] {
        conn.create_object_with_id("endpoints", id, &Endpoint::new(id, name))
            .await?;
    }

    let (deleted, none) = conn
        .update_tx(|tx| async move {
            let deleted = tx
                .delete_all_objects("endpoints", |key, e: &Endpoint| {
                    assert_eq!(key.as_id(), Some(e.id));
                    e.name == "drop"
                })
                .await?;
            let none = tx
                .delete_all_objects("endpoints", |_, _: &Endpoint| false)
                .await?;
            Ok((deleted, none))
        })
        .await?;
    assert_eq!((deleted, none), (2, 0));

    let mut left = Vec::new();
    conn.get_all("endpoints", |e: Endpoint| {
        left.push(e.id);
        Ok(())
    })
    .await?;
    assert_eq!(left, vec![1, 4]);
    Ok(())
}
