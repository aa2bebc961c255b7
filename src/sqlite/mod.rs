// SQLite backend
//
// - config: bb8 connection manager, pool setup and the blocking-thread helper
// - params: RowValues -> rusqlite value conversion
// - query: result extraction
// - transaction: one pooled connection inside BEGIN .. COMMIT/ROLLBACK

pub mod config;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{SharedSqliteConnection, SqliteManager, build_pool};
pub use params::Params;
pub use query::{build_result_set, sqlite_extract_value_sync};
pub use transaction::SqliteTx;
