use std::sync::LazyLock;
use tokio::runtime::Runtime;

/// Runtime that owns the embedded server tasks, shared by every caller in the process.
pub(crate) static SHARED_RUNTIME: LazyLock<Runtime> =
    LazyLock::new(|| Runtime::new().expect("Failed to create tokio runtime for test utilities"));

/// Embedded `PostgreSQL` for integration tests and benchmarks
pub mod postgres;

pub use postgres::*;
