use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PostgresError(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),

    #[cfg(feature = "postgres")]
    #[error(transparent)]
    PoolErrorPostgres(#[from] bb8::RunError<tokio_postgres::Error>),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("database connection is not initialized")]
    NoConnection,

    #[error("operation cancelled: the connection was closed")]
    Cancelled,

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("detected both an encrypted and an un-encrypted database and cannot start")]
    HaveEncryptedAndUnencrypted,

    #[error("the database is encrypted, but no secret was loaded")]
    HaveEncryptedWithNoKey,

    #[error("connection is unusable: {0}")]
    MigrationBlocked(String),

    #[error("object not found inside the database (bucket={bucket}, key={key})")]
    ObjectNotFound { bucket: String, key: String },

    #[error("object already exists inside the database (bucket={bucket}, key={key})")]
    CreateConflict { bucket: String, key: String },

    #[error("invalid bucket name: {0:?}")]
    InvalidBucketName(String),

    #[error("transaction is read-only")]
    ReadOnlyTransaction,

    #[error("encrypted string too short")]
    EncryptedStringTooShort,

    #[error("failed decrypting object: {0}")]
    Decryption(String),

    #[error("failed encrypting object: {0}")]
    Encryption(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to {op} ({target}): {source}")]
    Operation {
        op: &'static str,
        target: String,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    /// Wrap a lower-level failure with the operation and the table/bucket it touched.
    ///
    /// Not-found and create-conflict errors already carry their bucket and are returned as-is.
    #[must_use]
    pub fn context(self, op: &'static str, target: impl Into<String>) -> Self {
        match self {
            err @ (StoreError::ObjectNotFound { .. } | StoreError::CreateConflict { .. }) => err,
            source => StoreError::Operation {
                op,
                target: target.into(),
                source: Box::new(source),
            },
        }
    }

    /// True when this error (or the error it wraps) reports a missing object.
    #[must_use]
    pub fn is_object_not_found(&self) -> bool {
        match self {
            StoreError::ObjectNotFound { .. } => true,
            StoreError::Operation { source, .. } => source.is_object_not_found(),
            _ => false,
        }
    }

    /// True when this error (or the error it wraps) reports a duplicate key on create.
    #[must_use]
    pub fn is_create_conflict(&self) -> bool {
        match self {
            StoreError::CreateConflict { .. } => true,
            StoreError::Operation { source, .. } => source.is_create_conflict(),
            _ => false,
        }
    }

    /// Whether the backend rejected a statement because of a primary-key/unique violation.
    pub(crate) fn is_unique_violation(&self) -> bool {
        match self {
            #[cfg(feature = "postgres")]
            StoreError::PostgresError(err) => {
                err.code() == Some(&tokio_postgres::error::SqlState::UNIQUE_VIOLATION)
            }
            #[cfg(feature = "sqlite")]
            StoreError::SqliteError(rusqlite::Error::SqliteFailure(err, _)) => {
                err.code == rusqlite::ErrorCode::ConstraintViolation
            }
            StoreError::Operation { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }
}

/// Pool errors from the `SQLite` manager already carry a `StoreError`.
impl From<bb8::RunError<StoreError>> for StoreError {
    fn from(err: bb8::RunError<StoreError>) -> Self {
        match err {
            bb8::RunError::User(inner) => inner,
            other => StoreError::ConnectionError(format!("SQLite pool error: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified_through_context() {
        let err = StoreError::ObjectNotFound {
            bucket: "users".into(),
            key: "7".into(),
        };
        assert!(err.is_object_not_found());

        let wrapped = StoreError::Operation {
            op: "get object",
            target: "users".into(),
            source: Box::new(err),
        };
        assert!(wrapped.is_object_not_found());
        assert!(!wrapped.is_create_conflict());
    }

    #[test]
    fn context_leaves_not_found_untouched() {
        let err = StoreError::ObjectNotFound {
            bucket: "users".into(),
            key: "7".into(),
        }
        .context("get object", "users");
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));

        let err = StoreError::ExecutionError("boom".into()).context("update object", "users");
        assert_eq!(
            err.to_string(),
            "failed to update object (users): SQL execution error: boom"
        );
    }
}
