//! Statement text that differs between engines.
//!
//! Bucket names passed here must already be quoted with [`crate::quote_bucket`].

use crate::types::DatabaseType;

/// Name of the single table behind [`crate::BucketStore`].
pub const BUCKET_TABLE: &str = "portainer_buckets";

/// How a bucket addresses its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Numeric,
    Text,
}

fn blob_type(db: DatabaseType) -> &'static str {
    match db {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => "BYTEA",
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => "BLOB",
    }
}

#[must_use]
pub fn create_bucket(db: DatabaseType, quoted: &str, kind: KeyKind) -> String {
    let id = match (kind, db) {
        (KeyKind::Text, _) => "TEXT",
        #[cfg(feature = "postgres")]
        (KeyKind::Numeric, DatabaseType::Postgres) => "BIGSERIAL",
        #[cfg(feature = "sqlite")]
        (KeyKind::Numeric, DatabaseType::Sqlite) => "INTEGER",
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {quoted} (id {id} PRIMARY KEY, data {} NOT NULL)",
        blob_type(db)
    )
}

#[must_use]
pub fn create_bucket_table(db: DatabaseType) -> String {
    let blob = blob_type(db);
    format!(
        "CREATE TABLE IF NOT EXISTS {BUCKET_TABLE} (
            bucket_name TEXT NOT NULL,
            key {blob} NOT NULL,
            value {blob} NOT NULL,
            PRIMARY KEY (bucket_name, key)
        )"
    )
}

/// One boolean row telling whether table `$1` exists.
#[must_use]
pub fn table_exists(db: DatabaseType) -> &'static str {
    match db {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name::text = $1)"
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = $1)"
        }
    }
}

/// Every user table, by name.
#[must_use]
pub fn list_tables(db: DatabaseType) -> &'static str {
    match db {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            "SELECT table_name::text FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' \
             ORDER BY table_name"
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => {
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name"
        }
    }
}

/// `(column, type)` rows for table `$1`, in declaration order.
#[must_use]
pub fn list_columns(db: DatabaseType) -> &'static str {
    match db {
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            "SELECT column_name::text, data_type::text FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name::text = $1 \
             ORDER BY ordinal_position"
        }
        #[cfg(feature = "sqlite")]
        DatabaseType::Sqlite => "SELECT name, type FROM pragma_table_info($1) ORDER BY cid",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "sqlite")]
    #[test]
    fn sqlite_bucket_schema() {
        assert_eq!(
            create_bucket(DatabaseType::Sqlite, "\"users\"", KeyKind::Numeric),
            "CREATE TABLE IF NOT EXISTS \"users\" (id INTEGER PRIMARY KEY, data BLOB NOT NULL)"
        );
        assert!(create_bucket(DatabaseType::Sqlite, "\"k\"", KeyKind::Text).contains("id TEXT"));
        assert!(create_bucket_table(DatabaseType::Sqlite).contains("key BLOB NOT NULL"));
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn postgres_bucket_schema() {
        assert_eq!(
            create_bucket(DatabaseType::Postgres, "\"users\"", KeyKind::Numeric),
            "CREATE TABLE IF NOT EXISTS \"users\" (id BIGSERIAL PRIMARY KEY, data BYTEA NOT NULL)"
        );
        assert!(create_bucket_table(DatabaseType::Postgres).contains("PRIMARY KEY (bucket_name, key)"));
    }
}
