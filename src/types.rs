//! Shared error types for the ledger service.
//!
//! The taxonomy maps directly onto HTTP statuses at the route layer:
//! `Validation` -> 400, `NotFound` -> 404, `AlreadySettled` -> 200 with a
//! `success: false` flag (informational for the client UI, deliberately not
//! an HTTP error), `Database`/`Io` -> 500.

use thiserror::Error;

/// Errors surfaced by the ledger core and the store layer.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Missing or malformed input (non-numeric score, empty ids, ...)
    #[error("{0}")]
    Validation(String),

    /// Unknown user or document
    #[error("{0}")]
    NotFound(String),

    /// The referral pair already has a durable record
    #[error("This referral has already been processed")]
    AlreadySettled,

    /// The document store is unreachable or rejected the call
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
