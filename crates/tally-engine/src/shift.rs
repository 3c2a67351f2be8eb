//! # Shift Manager
//!
//! State machine governing a cashier's register session.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Shift Lifecycle                                  │
//! │                                                                         │
//! │            open_shift(branch, user, opening)                            │
//! │                         │                                               │
//! │                         ▼                                               │
//! │                     ┌────────┐    handover(to_user)   ┌────────┐        │
//! │                     │  Open  │ ──────────────────────►│  Open  │        │
//! │                     └───┬────┘   (continuation shift, └────────┘        │
//! │                         │          same cash trail)                     │
//! │         close_shift ────┤                                               │
//! │                         │──── force_close (stale/abandoned, admin)      │
//! │                         ▼                    ▼                          │
//! │                   ┌─────────┐         ┌─────────────┐                   │
//! │                   │ Closed  │         │ ForceClosed │   (terminal)      │
//! │                   └─────────┘         └─────────────┘                   │
//! │                                                                         │
//! │  Reconciliation at close:                                               │
//! │    expected = opening + Σ(cash entries stamped with the shift)          │
//! │    difference = counted - expected   (recorded, never rejected)         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Shift totals are never stored counters: they are derived from the cash
//! ledger by the `shift_id` stamp, so they cannot drift from the journal.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::coordinator::{LedgerTx, TransactionCoordinator};
use crate::error::{DbError, EngineResult};
use serde::Serialize;
use tally_core::{
    validation, LedgerError, Money, MovementKind, Shift, ShiftStatus, TenantConfig,
};

// =============================================================================
// Shift Manager
// =============================================================================

/// Opens, closes, force-closes, and hands over cashier shifts.
#[derive(Debug, Clone)]
pub struct ShiftManager {
    pool: SqlitePool,
    tenant: TenantConfig,
}

impl ShiftManager {
    pub fn new(pool: SqlitePool, tenant: TenantConfig) -> Self {
        ShiftManager { pool, tenant }
    }

    fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.pool.clone())
    }

    /// Opens a shift for (branch, user) with a counted opening float.
    ///
    /// Fails with [`LedgerError::ShiftAlreadyOpen`] if one is already open
    /// for the pair; a partial unique index backs this check against races.
    pub async fn open_shift(
        &self,
        branch_id: &str,
        user_id: &str,
        opening_balance: Money,
    ) -> EngineResult<Shift> {
        validation::validate_required("branch_id", branch_id)?;
        validation::validate_required("user_id", user_id)?;

        let mgr = self.clone();
        let branch_id = branch_id.to_string();
        let user_id = user_id.to_string();

        let shift = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    if let Some(existing) =
                        open_shift_for(tx, &branch_id, &user_id).await?
                    {
                        return Err(LedgerError::ShiftAlreadyOpen {
                            branch_id,
                            user_id,
                            shift_id: existing,
                        }
                        .into());
                    }

                    let shift = Shift {
                        id: Uuid::new_v4().to_string(),
                        tenant_id: mgr.tenant.tenant_id.clone(),
                        branch_id,
                        user_id,
                        status: ShiftStatus::Open,
                        opening_balance,
                        closing_balance: None,
                        expected_balance: None,
                        difference: None,
                        opened_at: Utc::now(),
                        closed_at: None,
                        notes: None,
                        handed_over_from_user_id: None,
                        handed_over_to_user_id: None,
                        handover_balance: None,
                        handover_at: None,
                        force_closed_by_user_id: None,
                        force_close_reason: None,
                    };
                    insert_shift(tx, &shift).await?;
                    Ok(shift)
                })
            })
            .await?;

        info!(
            shift_id = %shift.id,
            branch_id = %shift.branch_id,
            user_id = %shift.user_id,
            opening = %shift.opening_balance,
            "Shift opened"
        );
        self.audit("shift.opened", &shift).await;
        Ok(shift)
    }

    /// Closes an open shift with the counted drawer balance.
    ///
    /// Only the owning user may close. The expected balance is derived from
    /// the cash ledger; a non-zero difference is recorded, never rejected.
    pub async fn close_shift(
        &self,
        shift_id: &str,
        user_id: &str,
        closing_balance: Money,
        notes: Option<String>,
    ) -> EngineResult<Shift> {
        let shift_id = shift_id.to_string();
        let user_id = user_id.to_string();

        let shift = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let shift = load_shift(tx, &shift_id).await?;
                    require_open(&shift, "close")?;
                    require_owner(&shift, &user_id, "close")?;

                    let expected =
                        shift.opening_balance + shift_activity(tx, &shift.id).await?;
                    let difference = closing_balance - expected;
                    let now = Utc::now();

                    let result = sqlx::query(
                        r#"
                        UPDATE shifts SET
                            status = 'closed',
                            closing_balance = ?2,
                            expected_balance = ?3,
                            difference = ?4,
                            closed_at = ?5,
                            notes = COALESCE(?6, notes)
                        WHERE id = ?1 AND status = 'open'
                        "#,
                    )
                    .bind(&shift.id)
                    .bind(closing_balance)
                    .bind(expected)
                    .bind(difference)
                    .bind(now)
                    .bind(&notes)
                    .execute(tx.conn())
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(LedgerError::ConcurrentModification {
                            subject: format!("shift {}", shift.id),
                        }
                        .into());
                    }

                    Ok(Shift {
                        status: ShiftStatus::Closed,
                        closing_balance: Some(closing_balance),
                        expected_balance: Some(expected),
                        difference: Some(difference),
                        closed_at: Some(now),
                        notes: notes.or_else(|| shift.notes.clone()),
                        ..shift
                    })
                })
            })
            .await?;

        info!(
            shift_id = %shift.id,
            expected = %shift.expected_balance.unwrap_or_default(),
            difference = %shift.difference.unwrap_or_default(),
            "Shift closed"
        );
        self.audit("shift.closed", &shift).await;
        Ok(shift)
    }

    /// Force-closes a stale or abandoned shift on behalf of an admin.
    ///
    /// `actual_balance` is the counted drawer, when someone was there to
    /// count it; the difference is only recorded when it is known.
    pub async fn force_close(
        &self,
        shift_id: &str,
        admin_user_id: &str,
        reason: &str,
        actual_balance: Option<Money>,
    ) -> EngineResult<Shift> {
        validation::validate_reason(Some(reason))?;

        let shift_id = shift_id.to_string();
        let admin_user_id = admin_user_id.to_string();
        let reason = reason.to_string();

        let shift = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let shift = load_shift(tx, &shift_id).await?;
                    require_open(&shift, "force-close")?;

                    let expected =
                        shift.opening_balance + shift_activity(tx, &shift.id).await?;
                    let difference = actual_balance.map(|actual| actual - expected);
                    let now = Utc::now();

                    let result = sqlx::query(
                        r#"
                        UPDATE shifts SET
                            status = 'force_closed',
                            closing_balance = ?2,
                            expected_balance = ?3,
                            difference = ?4,
                            closed_at = ?5,
                            force_closed_by_user_id = ?6,
                            force_close_reason = ?7
                        WHERE id = ?1 AND status = 'open'
                        "#,
                    )
                    .bind(&shift.id)
                    .bind(actual_balance)
                    .bind(expected)
                    .bind(difference)
                    .bind(now)
                    .bind(&admin_user_id)
                    .bind(&reason)
                    .execute(tx.conn())
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(LedgerError::ConcurrentModification {
                            subject: format!("shift {}", shift.id),
                        }
                        .into());
                    }

                    Ok(Shift {
                        status: ShiftStatus::ForceClosed,
                        closing_balance: actual_balance,
                        expected_balance: Some(expected),
                        difference,
                        closed_at: Some(now),
                        force_closed_by_user_id: Some(admin_user_id),
                        force_close_reason: Some(reason),
                        ..shift
                    })
                })
            })
            .await?;

        info!(shift_id = %shift.id, "Shift force-closed");
        self.audit("shift.force_closed", &shift).await;
        Ok(shift)
    }

    /// Hands the register over to another user without interrupting trading.
    ///
    /// The acting user's shift is closed with handover bookkeeping and a
    /// continuation shift opens for `to_user_id`, carrying `current_balance`
    /// forward as its opening balance. Ledger history is untouched: the cash
    /// trail simply continues under the new shift's stamp.
    pub async fn handover(
        &self,
        shift_id: &str,
        user_id: &str,
        to_user_id: &str,
        current_balance: Money,
        notes: Option<String>,
    ) -> EngineResult<Shift> {
        validation::validate_required("to_user_id", to_user_id)?;

        let mgr = self.clone();
        let shift_id = shift_id.to_string();
        let log_shift_id = shift_id.clone();
        let user_id = user_id.to_string();
        let to_user_id = to_user_id.to_string();

        let successor = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let shift = load_shift(tx, &shift_id).await?;
                    require_open(&shift, "hand over")?;
                    require_owner(&shift, &user_id, "hand over")?;

                    if to_user_id == user_id {
                        return Err(LedgerError::InvalidShiftState {
                            shift_id: shift.id,
                            status: shift.status.as_str().to_string(),
                            operation: "hand over to the same user".to_string(),
                        }
                        .into());
                    }

                    if let Some(existing) =
                        open_shift_for(tx, &shift.branch_id, &to_user_id).await?
                    {
                        return Err(LedgerError::ShiftAlreadyOpen {
                            branch_id: shift.branch_id,
                            user_id: to_user_id,
                            shift_id: existing,
                        }
                        .into());
                    }

                    let expected =
                        shift.opening_balance + shift_activity(tx, &shift.id).await?;
                    let now = Utc::now();

                    let result = sqlx::query(
                        r#"
                        UPDATE shifts SET
                            status = 'closed',
                            closing_balance = ?2,
                            expected_balance = ?3,
                            difference = ?4,
                            closed_at = ?5,
                            notes = COALESCE(?6, notes),
                            handed_over_to_user_id = ?7,
                            handover_balance = ?2,
                            handover_at = ?5
                        WHERE id = ?1 AND status = 'open'
                        "#,
                    )
                    .bind(&shift.id)
                    .bind(current_balance)
                    .bind(expected)
                    .bind(current_balance - expected)
                    .bind(now)
                    .bind(&notes)
                    .bind(&to_user_id)
                    .execute(tx.conn())
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(LedgerError::ConcurrentModification {
                            subject: format!("shift {}", shift.id),
                        }
                        .into());
                    }

                    let successor = Shift {
                        id: Uuid::new_v4().to_string(),
                        tenant_id: mgr.tenant.tenant_id.clone(),
                        branch_id: shift.branch_id,
                        user_id: to_user_id,
                        status: ShiftStatus::Open,
                        opening_balance: current_balance,
                        closing_balance: None,
                        expected_balance: None,
                        difference: None,
                        opened_at: now,
                        closed_at: None,
                        notes: None,
                        handed_over_from_user_id: Some(user_id),
                        handed_over_to_user_id: None,
                        handover_balance: Some(current_balance),
                        handover_at: Some(now),
                        force_closed_by_user_id: None,
                        force_close_reason: None,
                    };
                    insert_shift(tx, &successor).await?;
                    Ok(successor)
                })
            })
            .await?;

        info!(
            from_shift = %log_shift_id,
            to_shift = %successor.id,
            to_user = %successor.user_id,
            balance = %current_balance,
            "Shift handed over"
        );
        self.audit("shift.handed_over", &successor).await;
        Ok(successor)
    }

    /// Fetches a shift by id.
    pub async fn get(&self, shift_id: &str) -> EngineResult<Shift> {
        let shift = sqlx::query_as::<_, Shift>(SELECT_SHIFT)
            .bind(shift_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Shift", shift_id))?;
        Ok(shift)
    }

    /// Per-kind cash totals for a shift, derived from the ledger stamp.
    pub async fn summary(&self, shift_id: &str) -> EngineResult<ShiftSummary> {
        let shift = self.get(shift_id).await?;

        let rows: Vec<(MovementKind, i64, i64)> = sqlx::query_as(
            r#"
            SELECT kind, COALESCE(SUM(delta), 0), COUNT(*)
            FROM cash_ledger
            WHERE shift_id = ?1
            GROUP BY kind
            ORDER BY kind
            "#,
        )
        .bind(shift_id)
        .fetch_all(&self.pool)
        .await?;

        let cash_activity: i64 = rows.iter().map(|(_, total, _)| total).sum();
        let entry_count: i64 = rows.iter().map(|(_, _, count)| count).sum();

        Ok(ShiftSummary {
            shift_id: shift.id,
            opening_balance: shift.opening_balance,
            cash_activity: Money::from_cents(cash_activity),
            expected_balance: shift.opening_balance + Money::from_cents(cash_activity),
            entry_count,
            totals: rows
                .into_iter()
                .map(|(kind, total, count)| KindTotal {
                    kind,
                    total: Money::from_cents(total),
                    count,
                })
                .collect(),
        })
    }

    /// Open shifts that have outlived the tenant's staleness thresholds.
    ///
    /// Warning-level shifts want a nudge; critical ones are force-close
    /// candidates.
    pub async fn find_stale_open(&self) -> EngineResult<Vec<StaleShift>> {
        let open: Vec<Shift> = sqlx::query_as(
            &format!("{SELECT_SHIFT_BASE} WHERE status = 'open' ORDER BY opened_at"),
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let stale = open
            .into_iter()
            .filter_map(|shift| {
                let open_hours = shift.open_duration(now).num_hours();
                let level = if open_hours >= self.tenant.shift_critical_hours {
                    StalenessLevel::Critical
                } else if open_hours >= self.tenant.shift_warning_hours {
                    StalenessLevel::Warning
                } else {
                    return None;
                };
                Some(StaleShift {
                    shift,
                    level,
                    open_hours,
                })
            })
            .collect();

        Ok(stale)
    }

    async fn audit(&self, action: &str, shift: &Shift) {
        AuditLog::new(self.pool.clone())
            .record(AuditEvent {
                action: action.to_string(),
                entity_type: "shift".to_string(),
                entity_id: shift.id.clone(),
                old_values: None,
                new_values: serde_json::to_value(shift).ok(),
                actor_user_id: shift.user_id.clone(),
            })
            .await;
    }
}

// =============================================================================
// Summary & Staleness Types
// =============================================================================

/// Per-kind cash totals for one shift.
#[derive(Debug, Clone, Serialize)]
pub struct ShiftSummary {
    pub shift_id: String,
    pub opening_balance: Money,
    /// Signed sum of all cash entries stamped with the shift.
    pub cash_activity: Money,
    pub expected_balance: Money,
    pub entry_count: i64,
    pub totals: Vec<KindTotal>,
}

/// One movement kind's contribution to a shift.
#[derive(Debug, Clone, Serialize)]
pub struct KindTotal {
    pub kind: MovementKind,
    pub total: Money,
    pub count: i64,
}

/// How overdue an open shift is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StalenessLevel {
    Warning,
    Critical,
}

/// An open shift past the tenant's staleness threshold.
#[derive(Debug, Clone, Serialize)]
pub struct StaleShift {
    pub shift: Shift,
    pub level: StalenessLevel,
    pub open_hours: i64,
}

// =============================================================================
// Shared Queries
// =============================================================================

const SELECT_SHIFT_BASE: &str = r#"
    SELECT id, tenant_id, branch_id, user_id, status,
           opening_balance, closing_balance, expected_balance, difference,
           opened_at, closed_at, notes,
           handed_over_from_user_id, handed_over_to_user_id,
           handover_balance, handover_at,
           force_closed_by_user_id, force_close_reason
    FROM shifts
"#;

const SELECT_SHIFT: &str = r#"
    SELECT id, tenant_id, branch_id, user_id, status,
           opening_balance, closing_balance, expected_balance, difference,
           opened_at, closed_at, notes,
           handed_over_from_user_id, handed_over_to_user_id,
           handover_balance, handover_at,
           force_closed_by_user_id, force_close_reason
    FROM shifts
    WHERE id = ?1
"#;

async fn load_shift(tx: &mut LedgerTx, shift_id: &str) -> EngineResult<Shift> {
    let shift = sqlx::query_as::<_, Shift>(SELECT_SHIFT)
        .bind(shift_id)
        .fetch_optional(tx.conn())
        .await?
        .ok_or_else(|| DbError::not_found("Shift", shift_id))?;
    Ok(shift)
}

async fn open_shift_for(
    tx: &mut LedgerTx,
    branch_id: &str,
    user_id: &str,
) -> EngineResult<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM shifts WHERE branch_id = ?1 AND user_id = ?2 AND status = 'open'",
    )
    .bind(branch_id)
    .bind(user_id)
    .fetch_optional(tx.conn())
    .await?;
    Ok(id)
}

async fn insert_shift(tx: &mut LedgerTx, shift: &Shift) -> EngineResult<()> {
    debug!(shift_id = %shift.id, "Inserting shift");

    sqlx::query(
        r#"
        INSERT INTO shifts (
            id, tenant_id, branch_id, user_id, status,
            opening_balance, closing_balance, expected_balance, difference,
            opened_at, closed_at, notes,
            handed_over_from_user_id, handed_over_to_user_id,
            handover_balance, handover_at,
            force_closed_by_user_id, force_close_reason
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11, ?12,
            ?13, ?14,
            ?15, ?16,
            ?17, ?18
        )
        "#,
    )
    .bind(&shift.id)
    .bind(&shift.tenant_id)
    .bind(&shift.branch_id)
    .bind(&shift.user_id)
    .bind(shift.status)
    .bind(shift.opening_balance)
    .bind(shift.closing_balance)
    .bind(shift.expected_balance)
    .bind(shift.difference)
    .bind(shift.opened_at)
    .bind(shift.closed_at)
    .bind(&shift.notes)
    .bind(&shift.handed_over_from_user_id)
    .bind(&shift.handed_over_to_user_id)
    .bind(shift.handover_balance)
    .bind(shift.handover_at)
    .bind(&shift.force_closed_by_user_id)
    .bind(&shift.force_close_reason)
    .execute(tx.conn())
    .await?;

    Ok(())
}

/// Signed sum of cash entries stamped with the shift.
async fn shift_activity(tx: &mut LedgerTx, shift_id: &str) -> EngineResult<Money> {
    let cents: i64 =
        sqlx::query_scalar("SELECT COALESCE(SUM(delta), 0) FROM cash_ledger WHERE shift_id = ?1")
            .bind(shift_id)
            .fetch_one(tx.conn())
            .await?;
    Ok(Money::from_cents(cents))
}

fn require_open(shift: &Shift, operation: &str) -> EngineResult<()> {
    if !shift.is_open() {
        return Err(LedgerError::InvalidShiftState {
            shift_id: shift.id.clone(),
            status: shift.status.as_str().to_string(),
            operation: operation.to_string(),
        }
        .into());
    }
    Ok(())
}

fn require_owner(shift: &Shift, user_id: &str, operation: &str) -> EngineResult<()> {
    if shift.user_id != user_id {
        return Err(LedgerError::InvalidShiftState {
            shift_id: shift.id.clone(),
            status: shift.status.as_str().to_string(),
            operation: format!("{operation} (not the owning user)"),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cash::CashMovement;
    use crate::error::EngineError;
    use crate::pool::{DbConfig, Engine};
    use tally_core::{Reference, ReferenceKind};

    async fn engine() -> Engine {
        Engine::new(DbConfig::in_memory(), TenantConfig::new("t-1"))
            .await
            .unwrap()
    }

    fn cash_sale(cents: i64, user: &str) -> CashMovement {
        CashMovement::new(
            "b-1",
            MovementKind::Sale,
            Money::from_cents(cents),
            Reference::new(ReferenceKind::Order, "o-1"),
            user,
        )
    }

    #[tokio::test]
    async fn test_second_open_rejected() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let first = shifts
            .open_shift("b-1", "u-1", Money::from_cents(10_000))
            .await
            .unwrap();

        let err = shifts
            .open_shift("b-1", "u-1", Money::from_cents(0))
            .await
            .unwrap_err();
        match err {
            EngineError::Domain(LedgerError::ShiftAlreadyOpen { shift_id, .. }) => {
                assert_eq!(shift_id, first.id);
            }
            other => panic!("expected ShiftAlreadyOpen, got {other:?}"),
        }

        // Same user in a different branch is a different register.
        assert!(shifts
            .open_shift("b-2", "u-1", Money::from_cents(0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_close_reconciles_against_ledger() {
        // Opening 500.00, two cash sales of 200.00 and 150.00:
        // counting 850.00 reconciles exactly.
        let engine = engine().await;
        let shifts = engine.shifts();
        let cash = engine.cash();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::from_cents(50_000))
            .await
            .unwrap();
        cash.record(cash_sale(20_000, "u-1")).await.unwrap();
        cash.record(cash_sale(15_000, "u-1")).await.unwrap();

        let closed = shifts
            .close_shift(&shift.id, "u-1", Money::from_cents(85_000), None)
            .await
            .unwrap();

        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.expected_balance, Some(Money::from_cents(85_000)));
        assert_eq!(closed.difference, Some(Money::zero()));
        assert!(closed.closed_at.is_some());
    }

    #[tokio::test]
    async fn test_close_records_shortfall() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::from_cents(50_000))
            .await
            .unwrap();
        engine.cash().record(cash_sale(10_000, "u-1")).await.unwrap();

        // Drawer is short by 5.00; recorded, not rejected.
        let closed = shifts
            .close_shift(&shift.id, "u-1", Money::from_cents(59_500), None)
            .await
            .unwrap();
        assert_eq!(closed.difference, Some(Money::from_cents(-500)));
    }

    #[tokio::test]
    async fn test_close_twice_rejected() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::zero())
            .await
            .unwrap();
        shifts
            .close_shift(&shift.id, "u-1", Money::zero(), None)
            .await
            .unwrap();

        let err = shifts
            .close_shift(&shift.id, "u-1", Money::zero(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidShiftState { .. })
        ));
    }

    #[tokio::test]
    async fn test_only_owner_closes() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::zero())
            .await
            .unwrap();

        let err = shifts
            .close_shift(&shift.id, "u-2", Money::zero(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidShiftState { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_close() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::from_cents(10_000))
            .await
            .unwrap();

        let closed = shifts
            .force_close(&shift.id, "admin-1", "cashier left site", None)
            .await
            .unwrap();

        assert_eq!(closed.status, ShiftStatus::ForceClosed);
        assert_eq!(closed.force_closed_by_user_id.as_deref(), Some("admin-1"));
        assert_eq!(
            closed.force_close_reason.as_deref(),
            Some("cashier left site")
        );
        // No counted balance: difference unknown, expected still derived.
        assert_eq!(closed.closing_balance, None);
        assert_eq!(closed.difference, None);
        assert_eq!(closed.expected_balance, Some(Money::from_cents(10_000)));

        // Terminal: force-closing again fails.
        let err = shifts
            .force_close(&shift.id, "admin-1", "again", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidShiftState { .. })
        ));
    }

    #[tokio::test]
    async fn test_force_close_requires_reason() {
        let engine = engine().await;
        let shift = engine
            .shifts()
            .open_shift("b-1", "u-1", Money::zero())
            .await
            .unwrap();

        let err = engine
            .shifts()
            .force_close(&shift.id, "admin-1", "  ", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_handover_continues_register() {
        let engine = engine().await;
        let shifts = engine.shifts();
        let cash = engine.cash();

        let first = shifts
            .open_shift("b-1", "u-1", Money::from_cents(50_000))
            .await
            .unwrap();
        cash.record(cash_sale(10_000, "u-1")).await.unwrap();

        let successor = shifts
            .handover(&first.id, "u-1", "u-2", Money::from_cents(60_000), None)
            .await
            .unwrap();

        // Predecessor closed with handover bookkeeping.
        let closed = shifts.get(&first.id).await.unwrap();
        assert_eq!(closed.status, ShiftStatus::Closed);
        assert_eq!(closed.handed_over_to_user_id.as_deref(), Some("u-2"));
        assert_eq!(closed.handover_balance, Some(Money::from_cents(60_000)));
        assert_eq!(closed.difference, Some(Money::zero()));

        // Successor carries the balance forward under the new owner.
        assert_eq!(successor.status, ShiftStatus::Open);
        assert_eq!(successor.user_id, "u-2");
        assert_eq!(successor.opening_balance, Money::from_cents(60_000));
        assert_eq!(successor.handed_over_from_user_id.as_deref(), Some("u-1"));

        // New activity reconciles against the successor only.
        cash.record(cash_sale(5_000, "u-2")).await.unwrap();
        let closed = shifts
            .close_shift(&successor.id, "u-2", Money::from_cents(65_000), None)
            .await
            .unwrap();
        assert_eq!(closed.difference, Some(Money::zero()));
    }

    #[tokio::test]
    async fn test_handover_to_self_rejected() {
        let engine = engine().await;
        let shift = engine
            .shifts()
            .open_shift("b-1", "u-1", Money::zero())
            .await
            .unwrap();

        let err = engine
            .shifts()
            .handover(&shift.id, "u-1", "u-1", Money::zero(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidShiftState { .. })
        ));
    }

    #[tokio::test]
    async fn test_summary_groups_by_kind() {
        let engine = engine().await;
        let shifts = engine.shifts();
        let cash = engine.cash();

        let shift = shifts
            .open_shift("b-1", "u-1", Money::from_cents(10_000))
            .await
            .unwrap();
        cash.record(cash_sale(2_000, "u-1")).await.unwrap();
        cash.record(cash_sale(3_000, "u-1")).await.unwrap();
        cash.record(
            CashMovement::new(
                "b-1",
                MovementKind::Expense,
                Money::from_cents(-1_000),
                Reference::manual(),
                "u-1",
            )
            .with_reason("window cleaner"),
        )
        .await
        .unwrap();

        let summary = shifts.summary(&shift.id).await.unwrap();
        assert_eq!(summary.entry_count, 3);
        assert_eq!(summary.cash_activity, Money::from_cents(4_000));
        assert_eq!(summary.expected_balance, Money::from_cents(14_000));

        let sales = summary
            .totals
            .iter()
            .find(|t| t.kind == MovementKind::Sale)
            .unwrap();
        assert_eq!(sales.total, Money::from_cents(5_000));
        assert_eq!(sales.count, 2);
    }

    #[tokio::test]
    async fn test_find_stale_open() {
        let engine = engine().await;
        let shifts = engine.shifts();

        let fresh = shifts
            .open_shift("b-1", "u-1", Money::zero())
            .await
            .unwrap();
        let warning = shifts
            .open_shift("b-1", "u-2", Money::zero())
            .await
            .unwrap();
        let critical = shifts
            .open_shift("b-1", "u-3", Money::zero())
            .await
            .unwrap();

        // Backdate the stale ones past the 12h/24h defaults.
        for (id, hours) in [(&warning.id, 13), (&critical.id, 30)] {
            sqlx::query("UPDATE shifts SET opened_at = ?2 WHERE id = ?1")
                .bind(id)
                .bind(Utc::now() - chrono::Duration::hours(hours))
                .execute(engine.pool())
                .await
                .unwrap();
        }

        let stale = shifts.find_stale_open().await.unwrap();
        assert_eq!(stale.len(), 2);
        assert!(stale.iter().all(|s| s.shift.id != fresh.id));

        let warn = stale.iter().find(|s| s.shift.id == warning.id).unwrap();
        assert_eq!(warn.level, StalenessLevel::Warning);
        let crit = stale.iter().find(|s| s.shift.id == critical.id).unwrap();
        assert_eq!(crit.level, StalenessLevel::Critical);
    }
}
