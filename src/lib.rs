// RustyDB lock manager — concurrency control core.
//
// A hierarchical, multi-granularity lock manager implementing strict
// two-phase locking (SS2PL) with wait-die deadlock prevention. See
// `transaction::lock_manager` for the component itself and
// `transaction::types` for the mode lattice and resource identifiers it
// operates on.

pub mod common;
pub mod error;
pub mod transaction;

pub use error::{DbError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
