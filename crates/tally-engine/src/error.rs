//! # Engine Error Types
//!
//! Error types for database operations and the engine umbrella error.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)                                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  DbError (this module) ← Adds context and categorization                │
//! │       │                                                                 │
//! │       ▼                          LedgerError (tally-core)               │
//! │       │                               │                                 │
//! │       └──────────► EngineError ◄──────┘                                 │
//! │                         │                                               │
//! │                         ▼                                               │
//! │  Caller maps to its own API error and message                           │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed operation always rolls its transaction scope back fully.
//! `EngineError::is_retryable` marks the two cases a caller may retry
//! (optimistic conflict and SQLITE_BUSY), both of which guarantee nothing
//! was persisted.

use thiserror::Error;

use tally_core::{LedgerError, ValidationError};

// =============================================================================
// Database Error
// =============================================================================

/// Database operation errors.
///
/// These wrap sqlx errors and provide additional context for debugging and
/// user feedback.
#[derive(Debug, Error)]
pub enum DbError {
    /// Entity not found in database.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Unique constraint violation.
    ///
    /// ## When This Occurs
    /// - Duplicate transfer or invoice number
    /// - Second open shift racing past the pre-check into the partial index
    #[error("Duplicate {field}: '{value}' already exists")]
    UniqueViolation { field: String, value: String },

    /// Foreign key constraint violation.
    #[error("Foreign key violation: {message}")]
    ForeignKeyViolation { message: String },

    /// The database is locked by a concurrent writer (SQLITE_BUSY).
    /// Retryable: the statement did not apply.
    #[error("Database busy, concurrent writer holds the lock")]
    Busy,

    /// Database connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound    → DbError::NotFound
/// sqlx::Error::Database       → Analyze message for constraint / busy
/// sqlx::Error::PoolTimedOut   → DbError::PoolExhausted
/// Other                       → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::NotFound {
                entity: "Record".to_string(),
                id: "unknown".to_string(),
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();

                // SQLite error text for the cases we classify:
                // UNIQUE constraint: "UNIQUE constraint failed: <table>.<column>"
                // FK constraint: "FOREIGN KEY constraint failed"
                // Busy: "database is locked" / "database table is locked"
                if msg.contains("UNIQUE constraint failed") {
                    let field = msg
                        .split("UNIQUE constraint failed: ")
                        .nth(1)
                        .unwrap_or("unknown")
                        .to_string();
                    DbError::UniqueViolation {
                        field,
                        value: "unknown".to_string(),
                    }
                } else if msg.contains("FOREIGN KEY constraint failed") {
                    DbError::ForeignKeyViolation {
                        message: msg.to_string(),
                    }
                } else if msg.contains("database is locked")
                    || msg.contains("database table is locked")
                {
                    DbError::Busy
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::ConnectionFailed("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;

// =============================================================================
// Engine Error
// =============================================================================

/// Umbrella error for engine operations: a business rule violation or a
/// persistence failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Business rule violation from tally-core.
    #[error(transparent)]
    Domain(#[from] LedgerError),

    /// Persistence failure.
    #[error(transparent)]
    Db(#[from] DbError),
}

impl EngineError {
    /// Whether a caller may retry the whole operation.
    ///
    /// True only for the optimistic-conflict and SQLITE_BUSY cases; both
    /// guarantee no ledger write happened, which is the precondition for a
    /// safe retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Domain(LedgerError::ConcurrentModification { .. })
                | EngineError::Db(DbError::Busy)
        )
    }
}

// Let `?` lift raw sqlx and validation errors directly inside engine code.

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Db(DbError::from(err))
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Domain(LedgerError::Validation(err))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let conflict: EngineError = LedgerError::ConcurrentModification {
            subject: "stock b-1/p-1".to_string(),
        }
        .into();
        assert!(conflict.is_retryable());

        let busy: EngineError = DbError::Busy.into();
        assert!(busy.is_retryable());

        let insufficient: EngineError = LedgerError::InsufficientStock {
            product_id: "p-1".to_string(),
            requested: 2,
            available: 1,
        }
        .into();
        assert!(!insufficient.is_retryable());

        let not_found: EngineError = DbError::not_found("Shift", "s-1").into();
        assert!(!not_found.is_retryable());
    }

    #[test]
    fn test_validation_lifts_through_domain() {
        let err: EngineError = ValidationError::SameBranch.into();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));
    }
}
