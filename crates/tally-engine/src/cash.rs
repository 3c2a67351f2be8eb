//! # Cash Ledger
//!
//! Per-branch running cash-balance journal.
//!
//! Same append discipline as the stock ledger (validate → read → floor check
//! → guarded insert), with two differences:
//!
//! - the subject is the branch alone, and deltas are Money cents
//! - sale and refund entries require an open shift for the acting user in
//!   that branch, and every entry recorded while such a shift exists is
//!   stamped with its id so shift reconciliation can sum exactly the
//!   activity it owns
//!
//! Decreasing kinds (Withdrawal, Refund, Expense, SupplierPayment,
//! Transfer-out) may overdraw the register only when
//! `TenantConfig::allow_negative_cash` permits it; the default policy
//! rejects with [`LedgerError::CashRegisterInsufficientBalance`]. Whether a
//! transfer-out may ever exceed the balance is deliberately
//! configuration-driven, not hard-coded.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::{LedgerTx, TransactionCoordinator};
use crate::error::EngineResult;
use tally_core::chain::{self, LedgerDomain};
use tally_core::{
    validation, HistoryPage, LedgerEntry, LedgerError, Money, MovementKind, Reference,
    TenantConfig,
};

// =============================================================================
// Movement Request
// =============================================================================

/// A requested cash movement, before validation.
#[derive(Debug, Clone)]
pub struct CashMovement {
    pub branch_id: String,
    pub kind: MovementKind,
    /// Signed amount: positive puts cash in the register, negative takes it
    /// out.
    pub amount: Money,
    pub reference: Reference,
    pub reason: Option<String>,
    pub actor_user_id: String,
}

impl CashMovement {
    pub fn new(
        branch_id: impl Into<String>,
        kind: MovementKind,
        amount: Money,
        reference: Reference,
        actor_user_id: impl Into<String>,
    ) -> Self {
        CashMovement {
            branch_id: branch_id.into(),
            kind,
            amount,
            reference,
            reason: None,
            actor_user_id: actor_user_id.into(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// =============================================================================
// Cash Ledger
// =============================================================================

/// Append-only cash journal for every branch register.
#[derive(Debug, Clone)]
pub struct CashLedger {
    pool: SqlitePool,
    tenant: TenantConfig,
}

impl CashLedger {
    pub fn new(pool: SqlitePool, tenant: TenantConfig) -> Self {
        CashLedger { pool, tenant }
    }

    /// Validates and appends a movement inside the caller's scope.
    pub async fn record_movement(
        &self,
        scope: &mut LedgerTx,
        movement: CashMovement,
    ) -> EngineResult<LedgerEntry> {
        let delta = movement.amount.cents();
        validation::validate_movement(
            LedgerDomain::Cash,
            movement.kind,
            delta,
            movement.reason.as_deref(),
        )?;

        // Sales and refunds only happen at a manned register; everything
        // else is stamped with the open shift when one exists.
        let shift_id =
            open_shift_id(scope, &movement.branch_id, &movement.actor_user_id).await?;
        if shift_id.is_none()
            && matches!(movement.kind, MovementKind::Sale | MovementKind::Refund)
        {
            return Err(LedgerError::NoActiveShift {
                branch_id: movement.branch_id.clone(),
                user_id: movement.actor_user_id.clone(),
            }
            .into());
        }

        let balance_before = balance_on(scope.conn(), &movement.branch_id).await?;
        let balance_after =
            chain::next_balance(balance_before, delta).map_err(LedgerError::Validation)?;

        if chain::breaches_floor(delta, balance_after, self.tenant.allow_negative_cash) {
            return Err(LedgerError::CashRegisterInsufficientBalance {
                branch_id: movement.branch_id.clone(),
                requested: -delta,
                available: balance_before,
            }
            .into());
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO cash_ledger (
                id, tenant_id, branch_id, kind, delta,
                balance_before, balance_after, reference_kind, reference_id,
                shift_id, reason, actor_user_id, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            WHERE COALESCE(
                (SELECT balance_after FROM cash_ledger
                 WHERE branch_id = ?3
                 ORDER BY seq DESC LIMIT 1),
                0
            ) = ?6
            "#,
        )
        .bind(&id)
        .bind(&self.tenant.tenant_id)
        .bind(&movement.branch_id)
        .bind(movement.kind)
        .bind(delta)
        .bind(balance_before)
        .bind(balance_after)
        .bind(movement.reference.kind)
        .bind(&movement.reference.id)
        .bind(&shift_id)
        .bind(&movement.reason)
        .bind(&movement.actor_user_id)
        .bind(now)
        .execute(scope.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::ConcurrentModification {
                subject: format!("cash {}", movement.branch_id),
            }
            .into());
        }

        debug!(
            branch_id = %movement.branch_id,
            kind = movement.kind.as_str(),
            amount = %movement.amount,
            balance_after,
            "Cash movement recorded"
        );

        Ok(LedgerEntry {
            id,
            seq: result.last_insert_rowid(),
            tenant_id: self.tenant.tenant_id.clone(),
            branch_id: movement.branch_id,
            product_id: None,
            kind: movement.kind,
            delta,
            balance_before,
            balance_after,
            reference_kind: movement.reference.kind,
            reference_id: movement.reference.id,
            shift_id,
            reason: movement.reason,
            actor_user_id: movement.actor_user_id,
            created_at: now,
        })
    }

    /// Convenience: records a single movement in its own transaction scope.
    pub async fn record(&self, movement: CashMovement) -> EngineResult<LedgerEntry> {
        let coordinator = TransactionCoordinator::new(self.pool.clone());
        let ledger = self.clone();
        coordinator
            .with_transaction(move |tx| {
                Box::pin(async move { ledger.record_movement(tx, movement).await })
            })
            .await
    }

    /// Current register balance: the last entry's `balance_after`, or zero.
    pub async fn current_balance(&self, branch_id: &str) -> EngineResult<Money> {
        let cents = balance_on(&self.pool, branch_id).await?;
        Ok(Money::from_cents(cents))
    }

    /// Read-only, paged history for one branch, in insertion order.
    pub async fn history(
        &self,
        branch_id: &str,
        page: HistoryPage,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT seq, id, tenant_id, branch_id, kind, delta,
                   balance_before, balance_after, reference_kind, reference_id,
                   shift_id, reason, actor_user_id, created_at
            FROM cash_ledger
            WHERE branch_id = ?1
            ORDER BY seq
            LIMIT ?2 OFFSET ?3
            "#,
        )
        .bind(branch_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Latest `balance_after` for a branch on any executor (pool or scope).
async fn balance_on<'e, E>(executor: E, branch_id: &str) -> EngineResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT balance_after FROM cash_ledger
        WHERE branch_id = ?1
        ORDER BY seq DESC LIMIT 1
        "#,
    )
    .bind(branch_id)
    .fetch_optional(executor)
    .await?;

    Ok(balance.unwrap_or(0))
}

/// Id of the open shift for (branch, user), if any.
async fn open_shift_id(
    scope: &mut LedgerTx,
    branch_id: &str,
    user_id: &str,
) -> EngineResult<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT id FROM shifts WHERE branch_id = ?1 AND user_id = ?2 AND status = 'open'",
    )
    .bind(branch_id)
    .bind(user_id)
    .fetch_optional(scope.conn())
    .await?;

    Ok(id)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::pool::{DbConfig, Engine};
    use tally_core::ReferenceKind;

    async fn engine(tenant: TenantConfig) -> Engine {
        Engine::new(DbConfig::in_memory(), tenant).await.unwrap()
    }

    fn deposit(cents: i64) -> CashMovement {
        CashMovement::new(
            "b-1",
            MovementKind::Deposit,
            Money::from_cents(cents),
            Reference::manual(),
            "u-1",
        )
        .with_reason("float top-up")
    }

    fn withdrawal(cents: i64) -> CashMovement {
        CashMovement::new(
            "b-1",
            MovementKind::Withdrawal,
            Money::from_cents(-cents),
            Reference::manual(),
            "u-1",
        )
        .with_reason("bank drop")
    }

    #[tokio::test]
    async fn test_deposit_withdrawal_chain() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let cash = engine.cash();

        cash.record(deposit(50_000)).await.unwrap();
        let entry = cash.record(withdrawal(20_000)).await.unwrap();

        assert_eq!(entry.balance_before, 50_000);
        assert_eq!(entry.balance_after, 30_000);
        assert_eq!(
            cash.current_balance("b-1").await.unwrap(),
            Money::from_cents(30_000)
        );
    }

    #[tokio::test]
    async fn test_overdraw_rejected_by_default() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let cash = engine.cash();

        cash.record(deposit(10_000)).await.unwrap();
        let err = cash.record(withdrawal(15_000)).await.unwrap_err();

        match err {
            EngineError::Domain(LedgerError::CashRegisterInsufficientBalance {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 15_000);
                assert_eq!(available, 10_000);
            }
            other => panic!("expected CashRegisterInsufficientBalance, got {other:?}"),
        }

        assert_eq!(
            cash.current_balance("b-1").await.unwrap(),
            Money::from_cents(10_000)
        );
    }

    #[tokio::test]
    async fn test_transfer_out_overdraw_is_policy_driven() {
        // Default policy: transfer-out cannot overdraw the register.
        let strict = engine(TenantConfig::new("t-1")).await;
        let movement = CashMovement::new(
            "b-1",
            MovementKind::Transfer,
            Money::from_cents(-5_000),
            Reference::new(ReferenceKind::Transfer, "tr-1"),
            "u-1",
        );
        let err = strict.cash().record(movement.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::CashRegisterInsufficientBalance { .. })
        ));

        // Permissive tenant: the same movement overdraws.
        let permissive = engine(TenantConfig::new("t-1").allow_negative_cash(true)).await;
        let entry = permissive.cash().record(movement).await.unwrap();
        assert_eq!(entry.balance_after, -5_000);
    }

    #[tokio::test]
    async fn test_sale_requires_open_shift() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let sale = CashMovement::new(
            "b-1",
            MovementKind::Sale,
            Money::from_cents(2_000),
            Reference::new(ReferenceKind::Order, "o-1"),
            "u-1",
        );

        let err = engine.cash().record(sale.clone()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::NoActiveShift { .. })
        ));

        // With a shift open, the same sale lands and is stamped with it.
        let shift = engine
            .shifts()
            .open_shift("b-1", "u-1", Money::from_cents(50_000))
            .await
            .unwrap();
        let entry = engine.cash().record(sale).await.unwrap();
        assert_eq!(entry.shift_id.as_deref(), Some(shift.id.as_str()));
    }

    #[tokio::test]
    async fn test_non_sale_entries_stamped_when_shift_open() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let shift = engine
            .shifts()
            .open_shift("b-1", "u-1", Money::from_cents(10_000))
            .await
            .unwrap();

        let entry = engine.cash().record(deposit(5_000)).await.unwrap();
        assert_eq!(entry.shift_id.as_deref(), Some(shift.id.as_str()));
    }

    #[tokio::test]
    async fn test_composite_sale_aborts_whole_scope_on_stock_failure() {
        // "Complete order" = stock leg + cash leg in one scope. When the
        // stock check fails after the cash entry already landed in the
        // scope, nothing may survive.
        let engine = engine(TenantConfig::new("t-1")).await;
        engine
            .shifts()
            .open_shift("b-1", "u-1", Money::from_cents(50_000))
            .await
            .unwrap();

        let cash = engine.cash();
        let stock = engine.stock();
        let result = engine
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    cash.record_movement(
                        tx,
                        CashMovement::new(
                            "b-1",
                            MovementKind::Sale,
                            Money::from_cents(2_000),
                            Reference::new(ReferenceKind::Order, "o-1"),
                            "u-1",
                        ),
                    )
                    .await?;

                    // No stock was ever received: this leg fails.
                    stock
                        .record_movement(
                            tx,
                            crate::stock::StockMovement::new(
                                "b-1",
                                "p-1",
                                MovementKind::Sale,
                                -2,
                                Reference::new(ReferenceKind::Order, "o-1"),
                                "u-1",
                            ),
                        )
                        .await
                })
            })
            .await;

        assert!(matches!(
            result,
            Err(EngineError::Domain(LedgerError::InsufficientStock { .. }))
        ));

        // The cash entry that succeeded inside the scope was rolled back.
        assert_eq!(
            engine.cash().current_balance("b-1").await.unwrap(),
            Money::zero()
        );
        assert!(engine
            .cash()
            .history("b-1", HistoryPage::first())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_history_keeps_branches_separate() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let cash = engine.cash();

        cash.record(deposit(1_000)).await.unwrap();
        let mut other = deposit(2_000);
        other.branch_id = "b-2".to_string();
        cash.record(other).await.unwrap();

        let history = cash.history("b-1", HistoryPage::first()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].delta, 1_000);
        assert!(history[0].product_id.is_none());
    }
}
