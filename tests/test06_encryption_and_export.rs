#![cfg(feature = "sqlite")]

mod common;

use common::{Endpoint, test_key, unique_db_path};
use serde_json::{Value, json};
use sql_bucket_store::prelude::*;

async fn seed(conn: &Connection) -> Result<(), StoreError> {
    conn.update_tx(|tx| async move {
        tx.ensure_bucket("endpoints").await?;
        tx.ensure_string_bucket("settings").await?;
        tx.ensure_string_bucket("ssl").await?;
        tx.ensure_bucket("teams").await?;
        tx.create_object_with_id("endpoints", 1, &Endpoint::new(1, "local"))
            .await?;
        tx.create_object_with_id("endpoints", 2, &Endpoint::new(2, "edge"))
            .await?;
        tx.create_object_with_string_id("settings", b"SETTINGS", &json!({"LogoURL": ""}))
            .await
    })
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn encrypted_payloads_need_the_key() -> Result<(), Box<dyn std::error::Error>> {
    let path = unique_db_path("sealed");
    let sealed = Connection::new(
        StoreConfig::sqlite_builder(path.clone())
            .encryption_key(test_key())
            .finish()?,
    )
    .await?;
    assert!(sealed.is_encrypted_store());
    seed(&sealed).await?;

    let fetched: Endpoint = sealed.get_object("endpoints", 1).await?;
    assert_eq!(fetched, Endpoint::new(1, "local"));

    let plain = Connection::new(StoreConfig::sqlite_builder(path.clone()).finish()?).await?;
    assert!(plain.get_object::<Endpoint>("endpoints", 1).await.is_err());

    let other_key = EncryptionKey::from_bytes(vec![7u8; 32])?;
    let wrong = Connection::new(
        StoreConfig::sqlite_builder(path)
            .encryption_key(other_key)
            .finish()?,
    )
    .await?;
    let err = wrong
        .get_object::<Endpoint>("endpoints", 1)
        .await
        .unwrap_err();
    assert!(
        err.to_string().contains("message authentication failed"),
        "unexpected error: {err}"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn key_can_be_present_but_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::new(
        StoreConfig::sqlite_builder(unique_db_path("disabled_key"))
            .encryption_key(test_key())
            .encrypted(false)
            .finish()?,
    )
    .await?;
    assert!(!conn.is_encrypted_store());
    let bytes = conn.marshal_object(&json!({"a": 1}))?;
    assert_eq!(bytes, br#"{"a":1}"#.to_vec());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn export_json_decodes_every_table() -> Result<(), Box<dyn std::error::Error>> {
    let conn = Connection::new(
        StoreConfig::sqlite_builder(unique_db_path("export"))
            .encryption_key(test_key())
            .finish()?,
    )
    .await?;
    seed(&conn).await?;

    let exported: Value = serde_json::from_slice(&conn.export_json(true).await?)?;
    assert_eq!(exported["__metadata"], json!({"endpoints": 2, "teams": 0}));
    assert_eq!(exported["settings"], json!({"LogoURL": ""}));
    assert_eq!(exported["ssl"], Value::Null);
    assert!(exported.get("teams").is_none(), "empty tables are left out");

    let endpoints = exported["endpoints"].as_array().expect("endpoint rows");
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0]["id"], json!(1));
    assert_eq!(endpoints[1]["data"]["name"], json!("edge"));

    let without: Value = serde_json::from_slice(&conn.export_json(false).await?)?;
    assert!(without.get("__metadata").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn metadata_round_trip_is_harmless_on_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let conn = common::sqlite_connection("metadata").await?;
    seed(&conn).await?;

    let metadata = conn.backup_metadata().await?;
    assert_eq!(metadata.get("endpoints"), Some(&2));
    assert!(!metadata.contains_key("settings"));

    conn.restore_metadata(&metadata).await?;
    assert_eq!(conn.next_identifier("endpoints").await, 3);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn backup_to_lists_schema() -> Result<(), Box<dyn std::error::Error>> {
    let conn = common::sqlite_connection("schema_dump").await?;
    seed(&conn).await?;

    let mut out = Vec::new();
    conn.backup_to(&mut out).await?;
    let text = String::from_utf8(out)?;
    assert!(
        text.contains("Table: endpoints\nColumns:\n  id INTEGER\n  data BLOB\n---\n"),
        "{text}"
    );
    assert!(text.contains("Table: settings\nColumns:\n  id TEXT\n"));
    Ok(())
}
