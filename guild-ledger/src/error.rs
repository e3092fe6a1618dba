//! Error types for the ledger

use crate::types::AccountId;
use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Amount was zero or negative
    #[error("Invalid amount: {0} (must be positive)")]
    InvalidAmount(Decimal),

    /// Spend or transfer would overdraw the account
    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance at the time of the check
        balance: Decimal,
        /// Amount the caller asked for
        requested: Decimal,
    },

    /// Source and destination of a transfer are the same account
    #[error("Cannot transfer to the same account: {0}")]
    SelfTransfer(AccountId),

    /// Entry description was empty
    #[error("Invalid description: {0}")]
    InvalidDescription(String),

    /// Durable storage could not be reached (RocksDB)
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Invariant violation (negative experience, corrupt index, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (writer mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_) | Error::Concurrency(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::StorageUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::StorageUnavailable("disk gone".into()).is_retryable());
        assert!(Error::Concurrency("mailbox closed".into()).is_retryable());
        assert!(!Error::InvalidAmount(Decimal::ZERO).is_retryable());
        assert!(!Error::InsufficientFunds {
            balance: Decimal::new(10000, 2),
            requested: Decimal::new(15000, 2),
        }
        .is_retryable());
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = Error::InsufficientFunds {
            balance: Decimal::new(10000, 2),
            requested: Decimal::new(15000, 2),
        };
        assert_eq!(
            err.to_string(),
            "Insufficient funds: balance 100.00, requested 150.00"
        );
    }
}
