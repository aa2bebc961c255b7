//! Sequence metadata backup/restore, JSON export and a plain-text schema dump.

use std::collections::BTreeMap;
use std::future::Future;
use std::io::Write;

use serde_json::{Map, Value};

use crate::backend::dialect;
use crate::backend::runner::{TxSlot, completed, run_in_transaction};
use crate::backend::TxMode;
use crate::connection::Connection;
use crate::error::StoreError;
use crate::key::quote_bucket;
use crate::types::{DatabaseType, RowValues};

/// Buckets holding a single object; exported as that object rather than a list.
pub const SINGLETON_BUCKETS: [&str; 4] = ["version", "ssl", "settings", "tunnel_server"];

const METADATA_KEY: &str = "__metadata";

impl Connection {
    async fn raw_tx<T, F, Fut>(&self, mode: TxMode, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(TxSlot<()>) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let pool = self.open_pool().await?;
        run_in_transaction(&pool, mode, self.cancel_token(), |slot| slot, f).await
    }

    async fn list_tables(&self) -> Result<Vec<String>, StoreError> {
        self.raw_tx(TxMode::ReadOnly, |slot| async move {
            let guard = slot.lock().await;
            let backend = guard.backend.as_ref().ok_or_else(completed)?;
            let rs = backend
                .query(dialect::list_tables(backend.db_type()), &[])
                .await
                .map_err(|e| e.context("list tables", "catalog"))?;
            Ok(rs
                .results
                .iter()
                .filter_map(|row| row.get_by_index(0).and_then(RowValues::as_text))
                .map(str::to_string)
                .collect())
        })
        .await
    }

    /// `(column, type)` pairs per table, tables in name order.
    async fn list_schema(&self) -> Result<Vec<(String, Vec<(String, String)>)>, StoreError> {
        let tables = self.list_tables().await?;
        self.raw_tx(TxMode::ReadOnly, |slot| async move {
            let guard = slot.lock().await;
            let backend = guard.backend.as_ref().ok_or_else(completed)?;
            let sql = dialect::list_columns(backend.db_type());
            let mut schema = Vec::with_capacity(tables.len());
            for table in tables {
                let rs = backend
                    .query(sql, &[RowValues::Text(table.clone())])
                    .await
                    .map_err(|e| e.context("list columns", table.clone()))?;
                let columns = rs
                    .results
                    .iter()
                    .map(|row| {
                        let text = |idx| {
                            row.get_by_index(idx)
                                .and_then(RowValues::as_text)
                                .unwrap_or_default()
                                .to_string()
                        };
                        (text(0), text(1))
                    })
                    .collect();
                schema.push((table, columns));
            }
            Ok(schema)
        })
        .await
    }

    /// Current sequence value of every table with an `id` column.
    ///
    /// `Postgres` reports the `last_value` of the column's serial sequence; `SQLite` has no
    /// sequences and reports `max(id)`. Tables that cannot be read are logged and skipped.
    ///
    /// # Errors
    /// Connectivity errors or a failure to read the catalog.
    pub async fn backup_metadata(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let pool = self.open_pool().await?;
        let sequences: Vec<(String, Option<String>)> = match pool.db_type() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                self.raw_tx(TxMode::ReadOnly, |slot| async move {
                    let guard = slot.lock().await;
                    let backend = guard.backend.as_ref().ok_or_else(completed)?;
                    let rs = backend
                        .query(
                            "SELECT c.table_name::text, \
                             pg_get_serial_sequence(quote_ident(c.table_name::text), 'id') \
                             FROM information_schema.columns c \
                             WHERE c.table_schema = current_schema() AND c.column_name = 'id' \
                             ORDER BY 1",
                            &[],
                        )
                        .await
                        .map_err(|e| e.context("list sequences", "catalog"))?;
                    Ok(rs
                        .results
                        .iter()
                        .filter_map(|row| {
                            let table = row.get_by_index(0)?.as_text()?.to_string();
                            let seq = row.get_by_index(1).and_then(RowValues::as_text);
                            Some((table, seq.map(str::to_string)))
                        })
                        .collect())
                })
                .await?
            }
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => self
                .list_schema()
                .await?
                .into_iter()
                .filter(|(_, columns)| {
                    columns
                        .iter()
                        .any(|(name, ty)| name == "id" && ty.eq_ignore_ascii_case("INTEGER"))
                })
                .map(|(table, _)| (table, None))
                .collect(),
        };

        let mut metadata = BTreeMap::new();
        for (table, sequence) in sequences {
            let sql = match (pool.db_type(), sequence) {
                #[cfg(feature = "postgres")]
                (DatabaseType::Postgres, Some(seq)) => format!("SELECT last_value FROM {seq}"),
                #[cfg(feature = "postgres")]
                (DatabaseType::Postgres, None) => continue,
                #[cfg(feature = "sqlite")]
                (DatabaseType::Sqlite, _) => match quote_bucket(&table) {
                    Ok(quoted) => format!("SELECT COALESCE(MAX(id), 0) FROM {quoted}"),
                    Err(e) => {
                        tracing::warn!(table = %table, error = %e, "skipping table in metadata backup");
                        continue;
                    }
                },
            };
            let value = self
                .raw_tx(TxMode::ReadOnly, |slot| async move {
                    let guard = slot.lock().await;
                    let backend = guard.backend.as_ref().ok_or_else(completed)?;
                    let rs = backend.query(&sql, &[]).await?;
                    Ok(rs.scalar().and_then(RowValues::as_int).copied())
                })
                .await;
            match value {
                Ok(Some(value)) => {
                    metadata.insert(table, value);
                }
                Ok(None) => {}
                Err(e) => tracing::error!(table = %table, error = %e, "failed to read sequence"),
            }
        }
        Ok(metadata)
    }

    /// Reset each table's sequence to the recorded value, one transaction per table.
    /// Failures are logged and the remaining tables are still processed. `SQLite` derives
    /// identifiers from `max(id)`, so there is nothing to restore there.
    ///
    /// # Errors
    /// Only connectivity errors detected before the first table.
    pub async fn restore_metadata(&self, metadata: &BTreeMap<String, i64>) -> Result<(), StoreError> {
        let pool = self.open_pool().await?;
        match pool.db_type() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                for (table, value) in metadata {
                    let quoted = match quote_bucket(table) {
                        Ok(quoted) => quoted,
                        Err(e) => {
                            tracing::error!(table = %table, error = %e, "failed to restore metadata");
                            continue;
                        }
                    };
                    let value = *value;
                    let result = self
                        .raw_tx(TxMode::ReadWrite, |slot| async move {
                            let guard = slot.lock().await;
                            let backend = guard.backend.as_ref().ok_or_else(completed)?;
                            backend
                                .query(
                                    "SELECT setval(pg_get_serial_sequence($1, 'id'), $2)",
                                    &[RowValues::Text(quoted), RowValues::Int(value)],
                                )
                                .await
                                .map(|_| ())
                        })
                        .await;
                    if let Err(e) = result {
                        tracing::error!(table = %table, error = %e, "failed to restore sequence");
                    }
                }
            }
            #[cfg(feature = "sqlite")]
            DatabaseType::Sqlite => {
                tracing::info!(
                    tables = metadata.len(),
                    "sqlite identifiers follow max(id); nothing to restore"
                );
            }
        }
        Ok(())
    }

    /// Export every table as pretty-printed JSON.
    ///
    /// Each table maps to its rows as column/value objects, with binary columns decoded
    /// through the envelope (or kept as lossy text when they do not decode). Singleton
    /// buckets map to their first row's `data`, or `null`. With `include_metadata` the
    /// result of [`Connection::backup_metadata`] is stored under `__metadata`. Tables that
    /// fail to export are logged and left out.
    ///
    /// # Errors
    /// Connectivity errors, or a failure to list tables.
    pub async fn export_json(&self, include_metadata: bool) -> Result<Vec<u8>, StoreError> {
        tracing::debug!(include_metadata, "exporting database to JSON");
        let mut backup = Map::new();

        if include_metadata {
            let meta = match self.backup_metadata().await {
                Ok(meta) => serde_json::to_value(meta)?,
                Err(e) => {
                    tracing::error!(error = %e, "failed exporting metadata");
                    Value::Null
                }
            };
            backup.insert(METADATA_KEY.to_string(), meta);
        }

        for table in self.list_tables().await? {
            let rows = match self.export_table(&table).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "failed to export table");
                    continue;
                }
            };
            if SINGLETON_BUCKETS.contains(&table.as_str()) {
                let first = rows
                    .into_iter()
                    .next()
                    .and_then(|row| match row {
                        Value::Object(mut fields) => fields.remove("data"),
                        _ => None,
                    })
                    .unwrap_or(Value::Null);
                backup.insert(table, first);
            } else if !rows.is_empty() {
                backup.insert(table, Value::Array(rows));
            }
        }

        Ok(serde_json::to_vec_pretty(&Value::Object(backup))?)
    }

    async fn export_table(&self, table: &str) -> Result<Vec<Value>, StoreError> {
        let quoted = quote_bucket(table)?;
        let rs = self
            .raw_tx(TxMode::ReadOnly, |slot| async move {
                let guard = slot.lock().await;
                let backend = guard.backend.as_ref().ok_or_else(completed)?;
                backend
                    .query(&format!("SELECT * FROM {quoted} ORDER BY 1"), &[])
                    .await
            })
            .await?;

        let columns = rs.column_names().to_vec();
        Ok(rs
            .results
            .iter()
            .map(|row| {
                let fields: Map<String, Value> = columns
                    .iter()
                    .zip(&row.rows)
                    .map(|(name, value)| (name.clone(), self.export_value(value)))
                    .collect();
                Value::Object(fields)
            })
            .collect())
    }

    fn export_value(&self, value: &RowValues) -> Value {
        match value {
            RowValues::Null => Value::Null,
            RowValues::Int(i) => Value::from(*i),
            RowValues::Float(f) => Value::from(*f),
            RowValues::Bool(b) => Value::Bool(*b),
            RowValues::Text(s) => Value::String(s.clone()),
            RowValues::Blob(bytes) => self
                .unmarshal_object::<Value>(bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned())),
        }
    }

    /// Write a plain-text listing of every table and its columns.
    ///
    /// # Errors
    /// Connectivity errors, catalog query errors, or I/O errors from `out`.
    pub async fn backup_to<W: Write>(&self, mut out: W) -> Result<(), StoreError> {
        for (table, columns) in self.list_schema().await? {
            writeln!(out, "Table: {table}\nColumns:")?;
            for (name, ty) in columns {
                writeln!(out, "  {name} {ty}")?;
            }
            writeln!(out, "---")?;
        }
        out.flush()?;
        Ok(())
    }
}
