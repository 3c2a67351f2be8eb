//! # Stock Ledger
//!
//! Per (branch, product) running-quantity journal.
//!
//! ## Append Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  record_movement(tx, movement)                                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  validate kind/sign/reason (pure, tally-core)                           │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  read latest balance_after for (branch, product)   ── 0 if none         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  floor check: decreasing movement below zero?                           │
//! │       ├── policy forbids ──► InsufficientStock, nothing written         │
//! │       ▼                                                                 │
//! │  guarded INSERT ... SELECT ... WHERE latest balance == what we read     │
//! │       ├── 0 rows ──► ConcurrentModification (lost the race, retryable)  │
//! │       └── 1 row  ──► entry appended, chain intact                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The guard re-checks the chain head inside the INSERT itself, so two
//! writers that both read the same stale balance can never both land: the
//! loser's insert matches zero rows and surfaces a retryable error.

use chrono::Utc;
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::{LedgerTx, TransactionCoordinator};
use crate::error::EngineResult;
use tally_core::chain::{self, LedgerDomain};
use tally_core::{
    validation, HistoryPage, LedgerEntry, LedgerError, MovementKind, Reference, TenantConfig,
};

// =============================================================================
// Movement Request
// =============================================================================

/// A requested stock movement, before validation.
#[derive(Debug, Clone)]
pub struct StockMovement {
    pub branch_id: String,
    pub product_id: String,
    pub kind: MovementKind,
    /// Signed quantity: negative takes stock out, positive puts it back.
    pub delta: i64,
    pub reference: Reference,
    pub reason: Option<String>,
    pub actor_user_id: String,
}

impl StockMovement {
    pub fn new(
        branch_id: impl Into<String>,
        product_id: impl Into<String>,
        kind: MovementKind,
        delta: i64,
        reference: Reference,
        actor_user_id: impl Into<String>,
    ) -> Self {
        StockMovement {
            branch_id: branch_id.into(),
            product_id: product_id.into(),
            kind,
            delta,
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
// Stock Ledger
// =============================================================================

/// Append-only quantity journal for every (branch, product) subject.
#[derive(Debug, Clone)]
pub struct StockLedger {
    pool: SqlitePool,
    tenant: TenantConfig,
}

impl StockLedger {
    pub fn new(pool: SqlitePool, tenant: TenantConfig) -> Self {
        StockLedger { pool, tenant }
    }

    /// Validates and appends a movement inside the caller's scope.
    ///
    /// Decreasing movements that would drive the balance negative fail with
    /// [`LedgerError::InsufficientStock`] when the tenant forbids negative
    /// stock, and write nothing. Receiving is increasing by definition and
    /// is never blocked by the policy.
    pub async fn record_movement(
        &self,
        scope: &mut LedgerTx,
        movement: StockMovement,
    ) -> EngineResult<LedgerEntry> {
        validation::validate_movement(
            LedgerDomain::Stock,
            movement.kind,
            movement.delta,
            movement.reason.as_deref(),
        )?;

        let balance_before =
            balance_on(scope.conn(), &movement.branch_id, &movement.product_id).await?;
        let balance_after = chain::next_balance(balance_before, movement.delta)
            .map_err(LedgerError::Validation)?;

        if chain::breaches_floor(
            movement.delta,
            balance_after,
            self.tenant.allow_negative_stock,
        ) {
            return Err(LedgerError::InsufficientStock {
                product_id: movement.product_id.clone(),
                requested: -movement.delta,
                available: balance_before,
            }
            .into());
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        // The WHERE clause re-checks the chain head at insert time: if
        // another writer appended since our read, zero rows match and the
        // caller gets a retryable conflict instead of a corrupted chain.
        let result = sqlx::query(
            r#"
            INSERT INTO stock_ledger (
                id, tenant_id, branch_id, product_id, kind, delta,
                balance_before, balance_after, reference_kind, reference_id,
                reason, actor_user_id, created_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            WHERE COALESCE(
                (SELECT balance_after FROM stock_ledger
                 WHERE branch_id = ?3 AND product_id = ?4
                 ORDER BY seq DESC LIMIT 1),
                0
            ) = ?7
            "#,
        )
        .bind(&id)
        .bind(&self.tenant.tenant_id)
        .bind(&movement.branch_id)
        .bind(&movement.product_id)
        .bind(movement.kind)
        .bind(movement.delta)
        .bind(balance_before)
        .bind(balance_after)
        .bind(movement.reference.kind)
        .bind(&movement.reference.id)
        .bind(&movement.reason)
        .bind(&movement.actor_user_id)
        .bind(now)
        .execute(scope.conn())
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::ConcurrentModification {
                subject: format!("stock {}/{}", movement.branch_id, movement.product_id),
            }
            .into());
        }

        debug!(
            branch_id = %movement.branch_id,
            product_id = %movement.product_id,
            kind = movement.kind.as_str(),
            delta = movement.delta,
            balance_after,
            "Stock movement recorded"
        );

        Ok(LedgerEntry {
            id,
            seq: result.last_insert_rowid(),
            tenant_id: self.tenant.tenant_id.clone(),
            branch_id: movement.branch_id,
            product_id: Some(movement.product_id),
            kind: movement.kind,
            delta: movement.delta,
            balance_before,
            balance_after,
            reference_kind: movement.reference.kind,
            reference_id: movement.reference.id,
            shift_id: None,
            reason: movement.reason,
            actor_user_id: movement.actor_user_id,
            created_at: now,
        })
    }

    /// Convenience: records a single movement in its own transaction scope.
    pub async fn record(&self, movement: StockMovement) -> EngineResult<LedgerEntry> {
        let coordinator = TransactionCoordinator::new(self.pool.clone());
        let ledger = self.clone();
        coordinator
            .with_transaction(move |tx| {
                Box::pin(async move { ledger.record_movement(tx, movement).await })
            })
            .await
    }

    /// Current quantity on hand: the last entry's `balance_after`, or 0.
    pub async fn current_balance(&self, branch_id: &str, product_id: &str) -> EngineResult<i64> {
        balance_on(&self.pool, branch_id, product_id).await
    }

    /// Read-only, paged history for one subject, in insertion order.
    pub async fn history(
        &self,
        branch_id: &str,
        product_id: &str,
        page: HistoryPage,
    ) -> EngineResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            r#"
            SELECT seq, id, tenant_id, branch_id, product_id, kind, delta,
                   balance_before, balance_after, reference_kind, reference_id,
                   reason, actor_user_id, created_at
            FROM stock_ledger
            WHERE branch_id = ?1 AND product_id = ?2
            ORDER BY seq
            LIMIT ?3 OFFSET ?4
            "#,
        )
        .bind(branch_id)
        .bind(product_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

/// Latest `balance_after` for a subject on any executor (pool or scope).
async fn balance_on<'e, E>(executor: E, branch_id: &str, product_id: &str) -> EngineResult<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT balance_after FROM stock_ledger
        WHERE branch_id = ?1 AND product_id = ?2
        ORDER BY seq DESC LIMIT 1
        "#,
    )
    .bind(branch_id)
    .bind(product_id)
    .fetch_optional(executor)
    .await?;

    Ok(balance.unwrap_or(0))
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::pool::{DbConfig, Engine};
    use tally_core::{chain as core_chain, ReferenceKind};

    async fn engine(tenant: TenantConfig) -> Engine {
        Engine::new(DbConfig::in_memory(), tenant).await.unwrap()
    }

    fn receiving(qty: i64) -> StockMovement {
        StockMovement::new(
            "b-1",
            "p-1",
            MovementKind::Receiving,
            qty,
            Reference::new(ReferenceKind::PurchaseInvoice, "inv-1"),
            "u-1",
        )
    }

    fn sale(qty: i64) -> StockMovement {
        StockMovement::new(
            "b-1",
            "p-1",
            MovementKind::Sale,
            -qty,
            Reference::new(ReferenceKind::Order, "o-1"),
            "u-1",
        )
    }

    #[tokio::test]
    async fn test_balances_chain_across_movements() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let stock = engine.stock();

        stock.record(receiving(10)).await.unwrap();
        let entry = stock.record(sale(3)).await.unwrap();

        assert_eq!(entry.balance_before, 10);
        assert_eq!(entry.balance_after, 7);
        assert_eq!(stock.current_balance("b-1", "p-1").await.unwrap(), 7);

        let history = stock
            .history("b-1", "p-1", HistoryPage::first())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(core_chain::verify(&history).is_ok());
    }

    #[tokio::test]
    async fn test_unknown_subject_balance_is_zero() {
        let engine = engine(TenantConfig::new("t-1")).await;
        assert_eq!(
            engine.stock().current_balance("b-9", "p-9").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_oversell_rejected_and_nothing_written() {
        // Branch has 10 units; selling 12 must fail and leave 10.
        let engine = engine(TenantConfig::new("t-1")).await;
        let stock = engine.stock();

        stock.record(receiving(10)).await.unwrap();

        let err = stock.record(sale(12)).await.unwrap_err();
        match err {
            EngineError::Domain(LedgerError::InsufficientStock {
                requested,
                available,
                ..
            }) => {
                assert_eq!(requested, 12);
                assert_eq!(available, 10);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }

        assert_eq!(stock.current_balance("b-1", "p-1").await.unwrap(), 10);
        let history = stock
            .history("b-1", "p-1", HistoryPage::first())
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_stock_allowed_by_policy() {
        let engine = engine(TenantConfig::new("t-1").allow_negative_stock(true)).await;
        let stock = engine.stock();

        stock.record(receiving(2)).await.unwrap();
        let entry = stock.record(sale(5)).await.unwrap();

        assert_eq!(entry.balance_after, -3);
        assert_eq!(stock.current_balance("b-1", "p-1").await.unwrap(), -3);
    }

    #[tokio::test]
    async fn test_cash_only_kind_rejected() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let movement = StockMovement::new(
            "b-1",
            "p-1",
            MovementKind::Deposit,
            5,
            Reference::manual(),
            "u-1",
        )
        .with_reason("float");

        let err = engine.stock().record(movement).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_adjustment_requires_reason() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let movement = StockMovement::new(
            "b-1",
            "p-1",
            MovementKind::Adjustment,
            5,
            Reference::manual(),
            "u-1",
        );

        let err = engine.stock().record(movement).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_history_pages_in_insertion_order() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let stock = engine.stock();

        stock.record(receiving(5)).await.unwrap();
        stock.record(sale(1)).await.unwrap();
        stock.record(sale(2)).await.unwrap();

        let first = stock
            .history("b-1", "p-1", HistoryPage::new(2, 0))
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].delta, 5);
        assert_eq!(first[1].delta, -1);

        let rest = stock
            .history("b-1", "p-1", HistoryPage::new(2, 2))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].delta, -2);
        assert_eq!(rest[0].balance_after, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_last_unit_sale_has_one_winner() {
        // Two cashiers race for the last unit: exactly one sale may land.
        // In-memory SQLite is single-connection, so this needs a real file
        // with a multi-connection pool.
        let path = std::env::temp_dir().join(format!("tally-test-{}.db", uuid::Uuid::new_v4()));
        let engine = Engine::new(
            DbConfig::new(&path).max_connections(4),
            TenantConfig::new("t-1"),
        )
        .await
        .unwrap();
        let stock = engine.stock();

        stock.record(receiving(1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let stock = stock.clone();
            handles.push(tokio::spawn(async move {
                crate::coordinator::retry_on_conflict(3, || {
                    let stock = stock.clone();
                    async move { stock.record(sale(1)).await }
                })
                .await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(entry) => {
                    successes += 1;
                    assert_eq!(entry.balance_after, 0);
                }
                Err(err) => {
                    // The loser sees the stock gone, or (if retries ran out
                    // mid-race) the conflict itself.
                    assert!(
                        matches!(
                            err,
                            EngineError::Domain(LedgerError::InsufficientStock { .. })
                                | EngineError::Domain(LedgerError::ConcurrentModification { .. })
                                | EngineError::Db(crate::error::DbError::Busy)
                        ),
                        "unexpected loser error: {err:?}"
                    );
                }
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(stock.current_balance("b-1", "p-1").await.unwrap(), 0);

        let history = stock
            .history("b-1", "p-1", HistoryPage::first())
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(core_chain::verify(&history).is_ok());

        engine.close().await;
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(path.with_extension("db-wal"));
        let _ = std::fs::remove_file(path.with_extension("db-shm"));
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let stock = engine.stock();

        stock.record(receiving(10)).await.unwrap();
        let mut other = receiving(4);
        other.branch_id = "b-2".to_string();
        stock.record(other).await.unwrap();

        assert_eq!(stock.current_balance("b-1", "p-1").await.unwrap(), 10);
        assert_eq!(stock.current_balance("b-2", "p-1").await.unwrap(), 4);
    }
}
