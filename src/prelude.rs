//! Convenient imports for common functionality.

pub use crate::backend::{BackendPool, TxMode};
pub use crate::bucket_store::{Bucket, BucketStore, BucketTx};
pub use crate::codec::EnvelopeCodec;
pub use crate::config::{EncryptionKey, PoolLimits, StoreConfig, StoreConfigBuilder};
pub use crate::connection::Connection;
pub use crate::error::StoreError;
pub use crate::key::ObjectKey;
pub use crate::migration::{
    ENCRYPTED_METADATA_TABLE, MarkerState, UNENCRYPTED_METADATA_TABLE, classify,
};
pub use crate::results::{CustomDbRow, ResultSet};
pub use crate::transaction::Transaction;
pub use crate::translation::{PlaceholderStyle, translate_placeholders};
pub use crate::types::{DatabaseType, RowValues};
