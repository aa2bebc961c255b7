//! Transactional, optionally encrypted bucket storage on `PostgreSQL` or `SQLite`.
//!
//! Applications written against an embedded ordered key/value store (buckets, byte-string
//! keys, opaque values) run unchanged on a relational database:
//!
//! - [`Connection`] keeps one table per bucket and exposes the bucket protocol through
//!   [`Transaction`] inside [`Connection::update_tx`] / [`Connection::view_tx`].
//! - [`BucketStore`] emulates all buckets in a single `(bucket_name, key, value)` table.
//! - [`EnvelopeCodec`] turns objects into stored payloads, sealing them with AES-GCM when an
//!   encryption key is configured.
//! - [`Connection::needs_encryption_migration`] inspects the marker tables before use.

#[cfg(not(any(feature = "postgres", feature = "sqlite")))]
compile_error!("enable at least one of the `postgres` or `sqlite` features");

pub mod backend;
pub mod bucket_store;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod key;
pub mod migration;
pub mod prelude;
pub mod results;
pub mod transaction;
pub mod translation;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use bucket_store::{Bucket, BucketStore, BucketTx};
pub use codec::EnvelopeCodec;
pub use config::{EncryptionKey, PoolLimits, StoreConfig, StoreConfigBuilder};
pub use connection::Connection;
pub use error::StoreError;
pub use key::{ObjectKey, quote_bucket};
pub use migration::{DatabaseState, MarkerState};
pub use results::{CustomDbRow, ResultSet};
pub use transaction::Transaction;
pub use types::{DatabaseType, RowValues};
