#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use sql_bucket_store::prelude::*;
#[cfg(feature = "sqlite")]
use tempfile::tempdir;

#[cfg(feature = "sqlite")]
pub fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

#[cfg(feature = "sqlite")]
pub async fn sqlite_connection(prefix: &str) -> Result<Connection, StoreError> {
    Connection::new(StoreConfig::sqlite_builder(unique_db_path(prefix)).finish()?).await
}

pub fn test_key() -> EncryptionKey {
    EncryptionKey::from_bytes(b"0123456789abcdef0123456789abcdef".to_vec()).expect("32-byte key")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Endpoint {
    pub id: i64,
    pub name: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            url: format!("tcp://{name}:9001"),
        }
    }
}
