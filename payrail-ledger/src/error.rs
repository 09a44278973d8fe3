//! Error types for the ledger

use crate::types::{AccountId, Currency};
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input, rejected before any mutation
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Sender cannot cover the requested amount (a missing balance row
    /// reads as zero)
    #[error("insufficient funds: account {account} holds {available} {currency}, requested {requested}")]
    InsufficientFunds {
        /// Sender account
        account: AccountId,
        /// Currency of the attempted transfer
        currency: Currency,
        /// Balance found inside the transaction
        available: Decimal,
        /// Amount the transfer asked for
        requested: Decimal,
    },

    /// Uniqueness constraint violated
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Lock timeout or write-write conflict; safe to retry as-is
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures where retrying the same call can succeed
    /// (transient contention, as opposed to a business-rule violation)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;

        match err.kind() {
            ErrorKind::Busy | ErrorKind::TimedOut | ErrorKind::TryAgain => {
                Error::Conflict(err.to_string())
            }
            _ => Error::Storage(err.to_string()),
        }
    }
}
