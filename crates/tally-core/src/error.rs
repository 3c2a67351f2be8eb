//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                          │
//! │  ├── LedgerError      - Business rule violations                        │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  tally-engine errors (separate crate)                                   │
//! │  ├── DbError          - Database operation failures                     │
//! │  └── EngineError      - Umbrella: Domain(LedgerError) | Db(DbError)     │
//! │                                                                         │
//! │  Flow: ValidationError → LedgerError → EngineError → caller             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (product id, balances, statuses)
//! 3. Errors are enum variants, never String
//! 4. A failed operation inside a transaction scope rolls back the whole
//!    scope; only `ConcurrentModification` is safe to retry automatically

use thiserror::Error;

// =============================================================================
// Ledger Error
// =============================================================================

/// Business rule violations raised by ledger and workflow operations.
///
/// Every variant aborts the enclosing transaction scope completely: no
/// ledger entry survives a failed composite operation.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A decreasing stock movement would drive the balance negative and the
    /// tenant forbids negative stock.
    ///
    /// ## When This Occurs
    /// - Selling more than available stock
    /// - Approving a transfer the source branch cannot cover
    /// - Returning more to a supplier than is on hand
    #[error("Insufficient stock for product {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: String,
        requested: i64,
        available: i64,
    },

    /// A decreasing cash movement would overdraw the register and the tenant
    /// forbids negative cash balances.
    #[error("Insufficient cash in register for branch {branch_id}: available {available}, requested {requested}")]
    CashRegisterInsufficientBalance {
        branch_id: String,
        requested: i64,
        available: i64,
    },

    /// A sale or refund cash entry was attempted with no open shift for the
    /// acting user in that branch.
    #[error("No open shift for user {user_id} in branch {branch_id}")]
    NoActiveShift { branch_id: String, user_id: String },

    /// `open_shift` found an existing open shift for the same (branch, user).
    #[error("User {user_id} already has open shift {shift_id} in branch {branch_id}")]
    ShiftAlreadyOpen {
        branch_id: String,
        user_id: String,
        shift_id: String,
    },

    /// A shift transition was attempted from a state that does not permit it
    /// (e.g. closing an already-closed shift, or a non-owner closing).
    #[error("Shift {shift_id} is {status}: cannot {operation}")]
    InvalidShiftState {
        shift_id: String,
        status: String,
        operation: String,
    },

    /// A transfer transition was attempted from a state that does not permit
    /// it. Transitions are one-directional; Completed and Cancelled are
    /// terminal.
    #[error("Transfer {transfer_id} is {status}: cannot {operation}")]
    InvalidTransferState {
        transfer_id: String,
        status: String,
        operation: String,
    },

    /// An edit was attempted on a purchase invoice that is no longer Draft.
    #[error("Invoice {invoice_id} is {status} and not editable")]
    InvoiceNotEditable { invoice_id: String, status: String },

    /// A payment amount is invalid (zero, negative, or exceeds the amount
    /// due).
    #[error("Invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// The optimistic balance check lost a race: another writer appended to
    /// the same subject between our read and our append.
    ///
    /// The only error kind a caller may retry automatically (bounded),
    /// because nothing was persisted.
    #[error("Concurrent modification of {subject}, retry the operation")]
    ConcurrentModification { subject: String },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These occur before any business logic runs; nothing has been read or
/// written when one is raised.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// The movement kind is not recorded on this ledger at all
    /// (e.g. a Deposit on the stock ledger).
    #[error("movement kind {kind} is not valid on the {ledger} ledger")]
    KindNotAllowed { kind: String, ledger: String },

    /// The delta's sign contradicts the movement kind
    /// (e.g. a positive Damage, or a negative Receiving).
    #[error("movement kind {kind} requires a {expected} delta, got {delta}")]
    WrongSign {
        kind: String,
        expected: &'static str,
        delta: i64,
    },

    /// Source and destination branch of a transfer must differ.
    #[error("transfer source and destination branch must differ")]
    SameBranch,

    /// Balance arithmetic overflowed i64. Practically unreachable with sane
    /// data; surfaced instead of wrapping silently.
    #[error("balance arithmetic overflow for {field}")]
    Overflow { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with LedgerError.
pub type CoreResult<T> = Result<T, LedgerError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LedgerError::InsufficientStock {
            product_id: "prod-1".to_string(),
            requested: 12,
            available: 10,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product prod-1: available 10, requested 12"
        );

        let err = LedgerError::NoActiveShift {
            branch_id: "b1".to_string(),
            user_id: "u1".to_string(),
        };
        assert_eq!(err.to_string(), "No open shift for user u1 in branch b1");
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::WrongSign {
            kind: "receiving".to_string(),
            expected: "positive",
            delta: -3,
        };
        assert_eq!(
            err.to_string(),
            "movement kind receiving requires a positive delta, got -3"
        );
    }

    #[test]
    fn test_validation_converts_to_ledger_error() {
        let validation_err = ValidationError::SameBranch;
        let ledger_err: LedgerError = validation_err.into();
        assert!(matches!(ledger_err, LedgerError::Validation(_)));
    }
}
