//! Storage Error Types
//!
//! This module defines error types for the scoped table contract, covering
//! constraint violations, backend failures and misuse of a finished transaction.

use thiserror::Error;

/// Storage operation errors
///
/// Every backend maps its native failures onto these variants. The service layer
/// propagates them unchanged and never retries.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A write would break a storage constraint (duplicate id, wrong scope, ...)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Generic backend failure with context
    #[error("Storage backend failure: {context}")]
    Backend { context: String },

    /// The transaction was already committed or rolled back
    #[error("Transaction for scope {scope} is already finished")]
    TransactionClosed { scope: String },

    /// Failure raised on purpose by `MemoryStore::fail_on_write`
    #[error("Injected failure on write #{write}")]
    InjectedFailure { write: usize },

    /// libsql operation error
    #[cfg(feature = "libsql")]
    #[error("Database operation failed: {0}")]
    Libsql(#[from] libsql::Error),
}

impl StoreError {
    /// Create a constraint violation error
    pub fn constraint(msg: impl Into<String>) -> Self {
        Self::Constraint(msg.into())
    }

    /// Create a backend failure with context
    pub fn backend(context: impl Into<String>) -> Self {
        Self::Backend {
            context: context.into(),
        }
    }

    /// Create a transaction closed error
    pub fn transaction_closed(scope: impl ToString) -> Self {
        Self::TransactionClosed {
            scope: scope.to_string(),
        }
    }
}

/// Result alias for storage calls
pub type StoreResult<T> = Result<T, StoreError>;
