// # Common Types
//
// Shared identifiers used across the lock manager and the transaction
// contract it integrates with. Kept intentionally small: this crate does
// not own a catalog, a storage layer, or a wire format, so it does not
// carry their identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for transactions.
///
/// Ids are assigned in strictly increasing order at `begin()` time, so the
/// id doubles as the transaction's *age* for wait-die arbitration: a lower
/// id is strictly older.
pub type TransactionId = u64;

/// Log sequence number for write-ahead logging.
///
/// The lock manager itself never emits log records; this alias exists only
/// so `transaction::types::WriteRecord` and sibling types can talk about LSNs
/// in the same vocabulary as the rest of the engine without this crate
/// pulling in a WAL implementation.
pub type LogSequenceNumber = u64;

/// Physical identifier of a record or an index-gap position: `(page_no, slot_no)`.
///
/// Records and gap positions share this shape deliberately — a gap lock
/// targets the position a range scan's `lower_bound` would land on, and the
/// B+-tree returns the same `(page, slot)` pair either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_no: i32,
    pub slot_no: i32,
}

impl Rid {
    pub const fn new(page_no: i32, slot_no: i32) -> Self {
        Self { page_no, slot_no }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page_no, self.slot_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rid_equality_is_structural() {
        assert_eq!(Rid::new(3, 4), Rid::new(3, 4));
        assert_ne!(Rid::new(3, 4), Rid::new(3, 5));
    }
}
