//! # Transaction Coordinator
//!
//! The atomic boundary for composite ledger operations.
//!
//! ## Scope Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │              One business operation = one scope                         │
//! │                                                                         │
//! │  with_transaction(|tx| ...)                                             │
//! │       │ BEGIN                                                           │
//! │       ▼                                                                 │
//! │  StockLedger.record_movement(tx, ...)   ── Sale leg                     │
//! │  CashLedger.record_movement(tx, ...)    ── payment leg                  │
//! │       │                                                                 │
//! │       ├── all Ok ──────────► COMMIT (everything lands)                  │
//! │       └── any Err ─────────► ROLLBACK (nothing lands)                   │
//! │                                                                         │
//! │  There is no partial commit. An aborted inner step unwinds the whole    │
//! │  scope, not just its own writes.                                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## No Nested Transactions
//! The scope is an explicit [`LedgerTx`] handle, not ambient state. A
//! composite operation passes its handle down; inner steps run via
//! [`TransactionCoordinator::with_transaction_in`], which joins the existing
//! scope instead of beginning a nested transaction. Only the outer scope
//! ever commits or rolls back.
//!
//! Composite operations that touch both ledgers write stock before cash, in
//! that fixed order, so concurrent orders over the same subjects cannot
//! deadlock each other.

use std::future::Future;
use std::pin::Pin;

use sqlx::sqlite::SqliteConnection;
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, warn};

use crate::error::{DbError, EngineError, EngineResult};

// =============================================================================
// Scope Handle
// =============================================================================

/// An open transaction scope.
///
/// Created only by [`TransactionCoordinator::with_transaction`]; holding a
/// `&mut LedgerTx` is proof of being inside exactly one scope. Ledger
/// operations take this handle, so a write outside any scope does not
/// compile.
pub struct LedgerTx {
    tx: Transaction<'static, Sqlite>,
}

impl LedgerTx {
    /// The scope's connection, for executing queries.
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut self.tx
    }
}

/// Boxed future returned by scope closures.
///
/// Borrows the scope for `'t`, so the closure can use the handle without
/// lifetime gymnastics at every call site.
pub type TxFuture<'t, T> = Pin<Box<dyn Future<Output = EngineResult<T>> + Send + 't>>;

// =============================================================================
// Coordinator
// =============================================================================

/// Wraps the pool's transaction primitives so a business operation's writes
/// are all-or-nothing.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    pool: SqlitePool,
}

impl TransactionCoordinator {
    pub fn new(pool: SqlitePool) -> Self {
        TransactionCoordinator { pool }
    }

    /// Begins a fresh transaction, runs `work`, commits on success and rolls
    /// back on any failure raised inside `work`.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let entry = coordinator
    ///     .with_transaction(|tx| {
    ///         Box::pin(async move { stock.record_movement(tx, movement).await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, F>(&self, work: F) -> EngineResult<T>
    where
        F: for<'t> FnOnce(&'t mut LedgerTx) -> TxFuture<'t, T>,
    {
        let tx = self.pool.begin().await.map_err(DbError::from)?;
        let mut scope = LedgerTx { tx };
        debug!("transaction scope opened");

        match work(&mut scope).await {
            Ok(value) => {
                scope.tx.commit().await.map_err(DbError::from)?;
                debug!("transaction scope committed");
                Ok(value)
            }
            Err(err) => {
                // Rollback failure is secondary; the original error is what
                // the caller needs to see.
                if let Err(rb_err) = scope.tx.rollback().await {
                    warn!(error = %rb_err, "rollback failed after aborted scope");
                }
                debug!(error = %err, "transaction scope rolled back");
                Err(err)
            }
        }
    }

    /// Runs `work` inside an already-open scope.
    ///
    /// This is the reentrancy rule made explicit: no nested transaction is
    /// begun, and the outer caller retains commit/rollback authority. An
    /// error here aborts the entire outer scope.
    pub async fn with_transaction_in<'t, T, F>(
        &self,
        outer: &'t mut LedgerTx,
        work: F,
    ) -> EngineResult<T>
    where
        F: FnOnce(&'t mut LedgerTx) -> TxFuture<'t, T>,
    {
        work(outer).await
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Re-runs a whole operation when it lost an optimistic race, bounded by
/// `attempts`.
///
/// Safe only because a retryable failure guarantees nothing was persisted:
/// the failed scope rolled back in full. Any other error propagates
/// immediately.
pub async fn retry_on_conflict<T, F, Fut>(attempts: u32, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < attempts => {
                debug!(attempt, error = %err, "retrying after optimistic conflict");
                attempt += 1;
            }
            other => return other,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use tally_core::LedgerError;

    async fn scratch_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE scratch (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM scratch")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_commit_on_success() {
        let pool = scratch_pool().await;
        let coordinator = TransactionCoordinator::new(pool.clone());

        coordinator
            .with_transaction(|tx| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO scratch (label) VALUES ('a')")
                        .execute(tx.conn())
                        .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        assert_eq!(count(&pool).await, 1);
    }

    #[tokio::test]
    async fn test_rollback_on_error() {
        let pool = scratch_pool().await;
        let coordinator = TransactionCoordinator::new(pool.clone());

        let result: EngineResult<()> = coordinator
            .with_transaction(|tx| {
                Box::pin(async move {
                    sqlx::query("INSERT INTO scratch (label) VALUES ('doomed')")
                        .execute(tx.conn())
                        .await?;
                    Err(EngineError::Domain(LedgerError::ConcurrentModification {
                        subject: "test".to_string(),
                    }))
                })
            })
            .await;

        assert!(result.is_err());
        // The insert that succeeded inside the scope must not survive.
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_inner_failure_unwinds_outer_scope() {
        let pool = scratch_pool().await;
        let coordinator = TransactionCoordinator::new(pool.clone());
        let inner = coordinator.clone();

        let result: EngineResult<()> = coordinator
            .with_transaction(|tx| {
                let inner = inner.clone();
                Box::pin(async move {
                    sqlx::query("INSERT INTO scratch (label) VALUES ('outer')")
                        .execute(tx.conn())
                        .await?;

                    // Inner step joins the same scope; its failure aborts
                    // everything including the outer insert.
                    inner
                        .with_transaction_in(tx, |tx| {
                            Box::pin(async move {
                                sqlx::query("INSERT INTO scratch (label) VALUES ('inner')")
                                    .execute(tx.conn())
                                    .await?;
                                Err::<(), _>(EngineError::Db(DbError::Busy))
                            })
                        })
                        .await
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(count(&pool).await, 0);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_bounded() {
        let mut calls = 0u32;
        let result: EngineResult<()> = retry_on_conflict(3, || {
            calls += 1;
            async move {
                Err(EngineError::Domain(LedgerError::ConcurrentModification {
                    subject: "always".to_string(),
                }))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_retry_passes_through_non_retryable() {
        let mut calls = 0u32;
        let result: EngineResult<()> = retry_on_conflict(3, || {
            calls += 1;
            async move {
                Err(EngineError::Domain(LedgerError::NoActiveShift {
                    branch_id: "b-1".to_string(),
                    user_id: "u-1".to_string(),
                }))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
