//! Engine-neutral plumbing shared by [`crate::Connection`] and [`crate::BucketStore`].
//!
//! A [`BackendPool`] dispatches to the pool of the configured engine, a [`BackendTx`] is one
//! checked-out connection inside a transaction, and [`dialect`] holds the few statements whose
//! text differs between engines.

pub mod dialect;
mod pool;
pub(crate) mod runner;
mod tx;

pub use pool::BackendPool;
pub use tx::{BackendTx, TxMode};
