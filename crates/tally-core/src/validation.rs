//! # Validation Module
//!
//! Input validation for ledger movements and workflow requests.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: API / DTO layer (outside this workspace)                      │
//! │  ├── Shape and type checks, auth                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE - business rule validation                        │
//! │  ├── Movement kind/sign rules per ledger                                │
//! │  ├── Reason requirements for manual kinds                               │
//! │  └── Workflow request sanity (branches differ, quantity > 0)            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                             │
//! │  ├── NOT NULL / UNIQUE / foreign key constraints                        │
//! │  └── Guarded inserts (optimistic balance check)                         │
//! │                                                                         │
//! │  Defense in depth: each layer catches different errors                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every function here runs before any read or write; a validation failure
//! means nothing happened.

use crate::chain::{self, LedgerDomain, Sign};
use crate::error::ValidationError;
use crate::types::MovementKind;
use crate::{MAX_MOVEMENT_QUANTITY, MAX_REASON_LEN};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Movement Validation
// =============================================================================

/// Validates a ledger movement before any balance is read.
///
/// ## Rules
/// - the kind must be recorded on this ledger at all
/// - the delta must be non-zero, inside the quantity bound, and carry the
///   sign the kind demands on this ledger
/// - manual kinds (Adjustment, Damage, Deposit, Withdrawal, Expense) must
///   carry a non-empty reason
///
/// ## Example
/// ```rust
/// use tally_core::chain::LedgerDomain;
/// use tally_core::types::MovementKind;
/// use tally_core::validation::validate_movement;
///
/// // A sale takes stock out: negative delta required
/// assert!(validate_movement(LedgerDomain::Stock, MovementKind::Sale, -3, None).is_ok());
/// assert!(validate_movement(LedgerDomain::Stock, MovementKind::Sale, 3, None).is_err());
/// ```
pub fn validate_movement(
    domain: LedgerDomain,
    kind: MovementKind,
    delta: i64,
    reason: Option<&str>,
) -> ValidationResult<()> {
    if !chain::kind_allowed(domain, kind) {
        return Err(ValidationError::KindNotAllowed {
            kind: kind.as_str().to_string(),
            ledger: domain.as_str().to_string(),
        });
    }

    if delta == 0 {
        return Err(ValidationError::Required {
            field: "delta".to_string(),
        });
    }

    if delta.abs() > MAX_MOVEMENT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "delta".to_string(),
            min: -MAX_MOVEMENT_QUANTITY,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }

    match chain::expected_sign(domain, kind) {
        Sign::Positive if delta < 0 => {
            return Err(ValidationError::WrongSign {
                kind: kind.as_str().to_string(),
                expected: "positive",
                delta,
            });
        }
        Sign::Negative if delta > 0 => {
            return Err(ValidationError::WrongSign {
                kind: kind.as_str().to_string(),
                expected: "negative",
                delta,
            });
        }
        _ => {}
    }

    if kind.requires_reason() {
        validate_reason(reason)?;
    }

    Ok(())
}

/// Validates a free-text reason: present, non-blank, bounded length.
pub fn validate_reason(reason: Option<&str>) -> ValidationResult<()> {
    let reason = reason.map(str::trim).unwrap_or_default();
    if reason.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }
    Ok(())
}

// =============================================================================
// Workflow Request Validation
// =============================================================================

/// Validates a transfer request: distinct branches, positive bounded
/// quantity.
pub fn validate_transfer_request(
    from_branch_id: &str,
    to_branch_id: &str,
    quantity: i64,
) -> ValidationResult<()> {
    validate_required("from_branch_id", from_branch_id)?;
    validate_required("to_branch_id", to_branch_id)?;
    if from_branch_id == to_branch_id {
        return Err(ValidationError::SameBranch);
    }
    validate_quantity(quantity)
}

/// Validates a quantity: positive, inside the movement bound.
pub fn validate_quantity(quantity: i64) -> ValidationResult<()> {
    if quantity <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "quantity".to_string(),
        });
    }
    if quantity > MAX_MOVEMENT_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 1,
            max: MAX_MOVEMENT_QUANTITY,
        });
    }
    Ok(())
}

/// Validates that a string field is present and non-blank.
pub fn validate_required(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_kind_foreign_to_ledger() {
        let err =
            validate_movement(LedgerDomain::Stock, MovementKind::Deposit, 5, Some("float")).unwrap_err();
        assert!(matches!(err, ValidationError::KindNotAllowed { .. }));
    }

    #[test]
    fn test_rejects_zero_delta() {
        let err = validate_movement(LedgerDomain::Cash, MovementKind::Adjustment, 0, Some("x"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Required { .. }));
    }

    #[test]
    fn test_rejects_wrong_sign() {
        // Receiving is always increasing
        let err = validate_movement(LedgerDomain::Stock, MovementKind::Receiving, -4, None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::WrongSign { .. }));

        // Cash refund is always decreasing
        let err =
            validate_movement(LedgerDomain::Cash, MovementKind::Refund, 100, None).unwrap_err();
        assert!(matches!(err, ValidationError::WrongSign { .. }));
    }

    #[test]
    fn test_manual_kinds_require_reason() {
        let err = validate_movement(LedgerDomain::Stock, MovementKind::Damage, -1, None)
            .unwrap_err();
        assert!(matches!(err, ValidationError::Required { .. }));

        let err = validate_movement(LedgerDomain::Stock, MovementKind::Damage, -1, Some("  "))
            .unwrap_err();
        assert!(matches!(err, ValidationError::Required { .. }));

        assert!(
            validate_movement(LedgerDomain::Stock, MovementKind::Damage, -1, Some("dropped"))
                .is_ok()
        );
    }

    #[test]
    fn test_transfer_request_rules() {
        assert!(validate_transfer_request("b-1", "b-2", 5).is_ok());
        assert!(matches!(
            validate_transfer_request("b-1", "b-1", 5),
            Err(ValidationError::SameBranch)
        ));
        assert!(matches!(
            validate_transfer_request("b-1", "b-2", 0),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_quantity_bound() {
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY).is_ok());
        assert!(validate_quantity(MAX_MOVEMENT_QUANTITY + 1).is_err());
    }
}
