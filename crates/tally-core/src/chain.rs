//! # Balance Chain Math
//!
//! Pure functions for the append-only balance chain shared by the stock and
//! cash ledgers.
//!
//! ## The Chain Invariant
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  For one subject (branch+product for stock, branch for cash):           │
//! │                                                                         │
//! │  seq 1: before   0  delta +10  after  10                                │
//! │  seq 2: before  10  delta  -3  after   7   ◄── before == prev after     │
//! │  seq 3: before   7  delta  -7  after   0                                │
//! │                                                                         │
//! │  • after = before + delta, always                                       │
//! │  • the first entry starts from the subject baseline (0)                 │
//! │  • current balance = last entry's after                                 │
//! │  • rows are never updated; corrections are new entries                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything here is deterministic and I/O-free; the engine applies these
//! rules inside its transaction scopes, and tests apply them to whole
//! ledgers as an integrity check.

use crate::error::ValidationError;
use crate::types::{LedgerEntry, MovementKind};

// =============================================================================
// Ledger Domain
// =============================================================================

/// Which ledger a movement targets. Sign and kind rules differ per domain:
/// a Sale takes stock out but puts cash in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerDomain {
    Stock,
    Cash,
}

impl LedgerDomain {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LedgerDomain::Stock => "stock",
            LedgerDomain::Cash => "cash",
        }
    }
}

/// The delta sign a movement kind must carry on a given ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Delta must be > 0.
    Positive,
    /// Delta must be < 0.
    Negative,
    /// Either direction (never zero). Transfer legs and adjustments.
    Any,
}

/// Whether this movement kind is recorded on this ledger at all.
///
/// Exhaustive on purpose: adding a `MovementKind` variant must force a
/// decision here for both ledgers.
pub const fn kind_allowed(domain: LedgerDomain, kind: MovementKind) -> bool {
    match domain {
        LedgerDomain::Stock => matches!(
            kind,
            MovementKind::Opening
                | MovementKind::Sale
                | MovementKind::Refund
                | MovementKind::Adjustment
                | MovementKind::Receiving
                | MovementKind::Damage
                | MovementKind::Return
                | MovementKind::Transfer
        ),
        LedgerDomain::Cash => matches!(
            kind,
            MovementKind::Opening
                | MovementKind::Sale
                | MovementKind::Refund
                | MovementKind::Adjustment
                | MovementKind::Deposit
                | MovementKind::Withdrawal
                | MovementKind::Expense
                | MovementKind::SupplierPayment
                | MovementKind::Transfer
        ),
    }
}

/// The sign a movement kind's delta must have on a given ledger.
///
/// Callers must have checked [`kind_allowed`] first; for kinds foreign to
/// the domain this returns `Sign::Any` and the allowed-check is what rejects
/// them.
pub const fn expected_sign(domain: LedgerDomain, kind: MovementKind) -> Sign {
    match domain {
        LedgerDomain::Stock => match kind {
            MovementKind::Opening => Sign::Positive,
            MovementKind::Sale => Sign::Negative,
            MovementKind::Refund => Sign::Positive,
            MovementKind::Adjustment => Sign::Any,
            MovementKind::Receiving => Sign::Positive,
            MovementKind::Damage => Sign::Negative,
            MovementKind::Return => Sign::Negative,
            MovementKind::Transfer => Sign::Any,
            // Cash-only kinds; unreachable past kind_allowed.
            MovementKind::Deposit
            | MovementKind::Withdrawal
            | MovementKind::Expense
            | MovementKind::SupplierPayment => Sign::Any,
        },
        LedgerDomain::Cash => match kind {
            MovementKind::Opening => Sign::Positive,
            MovementKind::Sale => Sign::Positive,
            MovementKind::Refund => Sign::Negative,
            MovementKind::Adjustment => Sign::Any,
            MovementKind::Deposit => Sign::Positive,
            MovementKind::Withdrawal => Sign::Negative,
            MovementKind::Expense => Sign::Negative,
            MovementKind::SupplierPayment => Sign::Negative,
            MovementKind::Transfer => Sign::Any,
            // Stock-only kinds; unreachable past kind_allowed.
            MovementKind::Receiving | MovementKind::Damage | MovementKind::Return => Sign::Any,
        },
    }
}

// =============================================================================
// Balance Arithmetic
// =============================================================================

/// Computes the balance after applying `delta`, rejecting i64 overflow.
pub fn next_balance(balance_before: i64, delta: i64) -> Result<i64, ValidationError> {
    balance_before
        .checked_add(delta)
        .ok_or(ValidationError::Overflow {
            field: "balance_after".to_string(),
        })
}

/// Whether a movement breaches the non-negative floor under the given
/// policy.
///
/// Only decreasing movements are gated: an already-negative balance (from an
/// earlier permissive policy) does not block inflows that keep it negative.
#[inline]
pub const fn breaches_floor(delta: i64, balance_after: i64, allow_negative: bool) -> bool {
    delta < 0 && balance_after < 0 && !allow_negative
}

/// Signed sum of deltas, as used for shift reconciliation.
pub fn signed_sum(entries: &[LedgerEntry]) -> i64 {
    entries.iter().map(|e| e.delta).sum()
}

// =============================================================================
// Chain Verification
// =============================================================================

/// A broken ledger invariant found by [`verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// `balance_after != balance_before + delta` on the entry at `seq`.
    DeltaMismatch { seq: i64 },
    /// An entry's `balance_before` does not equal the previous entry's
    /// `balance_after`.
    BrokenLink { seq: i64 },
    /// The first entry of the subject does not start from the 0 baseline.
    BaselineNotZero { seq: i64 },
}

/// Verifies the full chain invariant over one subject's entries, in `seq`
/// order.
///
/// Used by tests and by integrity checks; the engine never needs this on the
/// hot path because the append guard maintains the invariant by
/// construction.
pub fn verify(entries: &[LedgerEntry]) -> Result<(), ChainViolation> {
    let mut prev_after: Option<i64> = None;

    for entry in entries {
        if entry.balance_before + entry.delta != entry.balance_after {
            return Err(ChainViolation::DeltaMismatch { seq: entry.seq });
        }
        match prev_after {
            None => {
                if entry.balance_before != 0 {
                    return Err(ChainViolation::BaselineNotZero { seq: entry.seq });
                }
            }
            Some(after) => {
                if entry.balance_before != after {
                    return Err(ChainViolation::BrokenLink { seq: entry.seq });
                }
            }
        }
        prev_after = Some(entry.balance_after);
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
