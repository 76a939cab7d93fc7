//! Collaborator store errors.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceStoreError {
    #[error("unable to locate invoice")]
    NotFound,
    #[error("db error: {0}")]
    Db(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WitnessCacheError {
    #[error("no witnesses")]
    NotFound,
    #[error("invalid witness: {0}")]
    InvalidWitness(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Reasons a contract term cannot report its payment hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PaymentHashError {
    #[error("external preimage requires locally defined hash")]
    MissingExternalHash,
    #[error("must have a preimage or use external preimage")]
    MissingPreimage,
}
