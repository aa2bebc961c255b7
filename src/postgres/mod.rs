// PostgreSQL backend
//
// - config: bb8 connection manager and pool setup
// - params: RowValues -> tokio-postgres parameter conversion
// - query: result extraction
// - transaction: one pooled client inside BEGIN .. COMMIT/ROLLBACK

pub mod config;
pub mod params;
pub mod query;
pub mod transaction;

pub use config::{PgManager, build_pool};
pub use params::Params;
pub use query::{build_result_set, postgres_extract_value};
pub use transaction::PgTx;
