//! Crate-wide error type.
//!
//! The lock manager's own errors live in [`crate::transaction::error`]; this
//! type exists only so callers outside the transaction module (and the
//! doctests) have a single `Result` alias to write against, matching the
//! convention the rest of this codebase's crates use at their root.

use thiserror::Error;

use crate::transaction::error::TransactionError;

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, DbError>;
