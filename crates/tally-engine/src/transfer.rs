//! # Transfer Workflow
//!
//! Inter-branch stock transfers under approval control.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_transfer          approve              receive                 │
//! │  ───────────────► Pending ────────► Approved ────────► Completed        │
//! │  (advisory stock     │    (source       │     (destination             │
//! │   check, no ledger   │     leg: -qty)   │      leg: +qty)              │
//! │   write)             │                  │                               │
//! │                      │ cancel           │ cancel (reverses the          │
//! │                      ▼                  ▼         source leg: +qty)     │
//! │                  Cancelled          Cancelled                           │
//! │                                                                         │
//! │  Completed and Cancelled are terminal. Every ledger leg references      │
//! │  the transfer id, so both sides of a move trace to one entity.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The approve-time deduction runs under the coordinator: if the source
//! branch cannot cover the quantity the whole approval aborts and the
//! transfer stays Pending.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::coordinator::{LedgerTx, TransactionCoordinator};
use crate::error::{DbError, EngineResult};
use crate::stock::{StockLedger, StockMovement};
use tally_core::{
    validation, ActorContext, InventoryTransfer, LedgerError, MovementKind, Reference,
    ReferenceKind, TenantConfig, TransferStatus,
};

// =============================================================================
// Request
// =============================================================================

/// A requested inter-branch transfer.
#[derive(Debug, Clone)]
pub struct CreateTransfer {
    pub from_branch_id: String,
    pub to_branch_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub reason: Option<String>,
}

// =============================================================================
// Workflow
// =============================================================================

/// Drives the transfer state machine and its two stock-ledger legs.
#[derive(Debug, Clone)]
pub struct TransferWorkflow {
    pool: SqlitePool,
    tenant: TenantConfig,
}

impl TransferWorkflow {
    pub fn new(pool: SqlitePool, tenant: TenantConfig) -> Self {
        TransferWorkflow { pool, tenant }
    }

    fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.pool.clone())
    }

    fn stock(&self) -> StockLedger {
        StockLedger::new(self.pool.clone(), self.tenant.clone())
    }

    /// Creates a Pending transfer. No ledger write happens yet; the stock
    /// check here is advisory so an obviously impossible request fails fast,
    /// and approval re-checks under the transaction.
    pub async fn create_transfer(
        &self,
        actor: &ActorContext,
        request: CreateTransfer,
    ) -> EngineResult<InventoryTransfer> {
        validation::validate_transfer_request(
            &request.from_branch_id,
            &request.to_branch_id,
            request.quantity,
        )?;
        validation::validate_required("product_id", &request.product_id)?;

        let available = self
            .stock()
            .current_balance(&request.from_branch_id, &request.product_id)
            .await?;
        if available < request.quantity && !self.tenant.allow_negative_stock {
            return Err(LedgerError::InsufficientStock {
                product_id: request.product_id,
                requested: request.quantity,
                available,
            }
            .into());
        }

        let workflow = self.clone();
        let actor_user = actor.user_id.clone();

        let transfer = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let transfer_number = next_transfer_number(tx, &workflow.tenant.tenant_id).await?;
                    let transfer = InventoryTransfer {
                        id: Uuid::new_v4().to_string(),
                        tenant_id: workflow.tenant.tenant_id.clone(),
                        transfer_number,
                        from_branch_id: request.from_branch_id,
                        to_branch_id: request.to_branch_id,
                        product_id: request.product_id,
                        quantity: request.quantity,
                        status: TransferStatus::Pending,
                        reason: request.reason,
                        created_by_user_id: actor_user,
                        created_at: Utc::now(),
                        approved_by_user_id: None,
                        approved_at: None,
                        received_by_user_id: None,
                        received_at: None,
                        cancelled_by_user_id: None,
                        cancelled_at: None,
                        cancellation_reason: None,
                    };
                    insert_transfer(tx, &transfer).await?;
                    Ok(transfer)
                })
            })
            .await?;

        info!(
            transfer_id = %transfer.id,
            number = %transfer.transfer_number,
            from = %transfer.from_branch_id,
            to = %transfer.to_branch_id,
            quantity = transfer.quantity,
            "Transfer created"
        );
        self.audit(actor, "transfer.created", &transfer).await;
        Ok(transfer)
    }

    /// Approves a Pending transfer, deducting the quantity from the source
    /// branch. Insufficient stock aborts the whole approval: the transfer
    /// stays Pending and no entry survives.
    pub async fn approve(
        &self,
        actor: &ActorContext,
        transfer_id: &str,
    ) -> EngineResult<InventoryTransfer> {
        let workflow = self.clone();
        let transfer_id = transfer_id.to_string();
        let approver = actor.user_id.clone();

        let transfer = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let transfer = load_transfer(tx, &transfer_id).await?;
                    require_status(&transfer, TransferStatus::Pending, "approve")?;

                    // Source leg first; this is where insufficient stock
                    // surfaces and aborts everything.
                    workflow
                        .stock()
                        .record_movement(
                            tx,
                            StockMovement::new(
                                &transfer.from_branch_id,
                                &transfer.product_id,
                                MovementKind::Transfer,
                                -transfer.quantity,
                                Reference::new(ReferenceKind::Transfer, &transfer.id),
                                &approver,
                            ),
                        )
                        .await?;

                    let now = Utc::now();
                    transition(
                        tx,
                        &transfer.id,
                        TransferStatus::Pending,
                        "status = 'approved', approved_by_user_id = ?3, approved_at = ?4",
                        &approver,
                        now,
                    )
                    .await?;

                    Ok(InventoryTransfer {
                        status: TransferStatus::Approved,
                        approved_by_user_id: Some(approver),
                        approved_at: Some(now),
                        ..transfer
                    })
                })
            })
            .await?;

        info!(transfer_id = %transfer.id, "Transfer approved, source stock deducted");
        self.audit(actor, "transfer.approved", &transfer).await;
        Ok(transfer)
    }

    /// Receives an Approved transfer at the destination branch, crediting
    /// the quantity there and completing the workflow.
    pub async fn receive(
        &self,
        actor: &ActorContext,
        transfer_id: &str,
    ) -> EngineResult<InventoryTransfer> {
        let workflow = self.clone();
        let transfer_id = transfer_id.to_string();
        let receiver = actor.user_id.clone();

        let transfer = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let transfer = load_transfer(tx, &transfer_id).await?;
                    require_status(&transfer, TransferStatus::Approved, "receive")?;

                    workflow
                        .stock()
                        .record_movement(
                            tx,
                            StockMovement::new(
                                &transfer.to_branch_id,
                                &transfer.product_id,
                                MovementKind::Transfer,
                                transfer.quantity,
                                Reference::new(ReferenceKind::Transfer, &transfer.id),
                                &receiver,
                            ),
                        )
                        .await?;

                    let now = Utc::now();
                    transition(
                        tx,
                        &transfer.id,
                        TransferStatus::Approved,
                        "status = 'completed', received_by_user_id = ?3, received_at = ?4",
                        &receiver,
                        now,
                    )
                    .await?;

                    Ok(InventoryTransfer {
                        status: TransferStatus::Completed,
                        received_by_user_id: Some(receiver),
                        received_at: Some(now),
                        ..transfer
                    })
                })
            })
            .await?;

        info!(transfer_id = %transfer.id, "Transfer completed");
        self.audit(actor, "transfer.completed", &transfer).await;
        Ok(transfer)
    }

    /// Cancels a Pending or Approved transfer.
    ///
    /// An Approved transfer already deducted the source branch, so
    /// cancellation records a compensating increasing entry before the
    /// status flips; a Pending one has no ledger effect to undo.
    pub async fn cancel(
        &self,
        actor: &ActorContext,
        transfer_id: &str,
        reason: &str,
    ) -> EngineResult<InventoryTransfer> {
        validation::validate_reason(Some(reason))?;

        let workflow = self.clone();
        let transfer_id = transfer_id.to_string();
        let canceller = actor.user_id.clone();
        let reason = reason.to_string();

        let transfer = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let transfer = load_transfer(tx, &transfer_id).await?;

                    let from_status = match transfer.status {
                        TransferStatus::Pending => TransferStatus::Pending,
                        TransferStatus::Approved => {
                            // Reverse the source deduction.
                            workflow
                                .stock()
                                .record_movement(
                                    tx,
                                    StockMovement::new(
                                        &transfer.from_branch_id,
                                        &transfer.product_id,
                                        MovementKind::Transfer,
                                        transfer.quantity,
                                        Reference::new(ReferenceKind::Transfer, &transfer.id),
                                        &canceller,
                                    ),
                                )
                                .await?;
                            TransferStatus::Approved
                        }
                        _ => {
                            return Err(LedgerError::InvalidTransferState {
                                transfer_id: transfer.id,
                                status: transfer.status.as_str().to_string(),
                                operation: "cancel".to_string(),
                            }
                            .into());
                        }
                    };

                    let now = Utc::now();
                    let result = sqlx::query(
                        r#"
                        UPDATE inventory_transfers SET
                            status = 'cancelled',
                            cancelled_by_user_id = ?3,
                            cancelled_at = ?4,
                            cancellation_reason = ?5
                        WHERE id = ?1 AND status = ?2
                        "#,
                    )
                    .bind(&transfer.id)
                    .bind(from_status)
                    .bind(&canceller)
                    .bind(now)
                    .bind(&reason)
                    .execute(tx.conn())
                    .await?;

                    if result.rows_affected() == 0 {
                        return Err(LedgerError::ConcurrentModification {
                            subject: format!("transfer {}", transfer.id),
                        }
                        .into());
                    }

                    Ok(InventoryTransfer {
                        status: TransferStatus::Cancelled,
                        cancelled_by_user_id: Some(canceller),
                        cancelled_at: Some(now),
                        cancellation_reason: Some(reason),
                        ..transfer
                    })
                })
            })
            .await?;

        info!(transfer_id = %transfer.id, "Transfer cancelled");
        self.audit(actor, "transfer.cancelled", &transfer).await;
        Ok(transfer)
    }

    /// Fetches a transfer by id.
    pub async fn get(&self, transfer_id: &str) -> EngineResult<InventoryTransfer> {
        let transfer = sqlx::query_as::<_, InventoryTransfer>(SELECT_TRANSFER)
            .bind(transfer_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Transfer", transfer_id))?;
        Ok(transfer)
    }

    /// All transfers in a given state for this tenant, oldest first.
    pub async fn list_by_status(
        &self,
        status: TransferStatus,
    ) -> EngineResult<Vec<InventoryTransfer>> {
        let transfers = sqlx::query_as::<_, InventoryTransfer>(
            &format!("{SELECT_TRANSFER_BASE} WHERE tenant_id = ?1 AND status = ?2 ORDER BY created_at"),
        )
        .bind(&self.tenant.tenant_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(transfers)
    }

    async fn audit(&self, actor: &ActorContext, action: &str, transfer: &InventoryTransfer) {
        AuditLog::new(self.pool.clone())
            .record(AuditEvent {
                action: action.to_string(),
                entity_type: "inventory_transfer".to_string(),
                entity_id: transfer.id.clone(),
                old_values: None,
                new_values: serde_json::to_value(transfer).ok(),
                actor_user_id: actor.user_id.clone(),
            })
            .await;
    }
}

// =============================================================================
// Shared Queries
// =============================================================================

const SELECT_TRANSFER_BASE: &str = r#"
    SELECT id, tenant_id, transfer_number, from_branch_id, to_branch_id,
           product_id, quantity, status, reason,
           created_by_user_id, created_at,
           approved_by_user_id, approved_at,
           received_by_user_id, received_at,
           cancelled_by_user_id, cancelled_at, cancellation_reason
    FROM inventory_transfers
"#;

const SELECT_TRANSFER: &str = r#"
    SELECT id, tenant_id, transfer_number, from_branch_id, to_branch_id,
           product_id, quantity, status, reason,
           created_by_user_id, created_at,
           approved_by_user_id, approved_at,
           received_by_user_id, received_at,
           cancelled_by_user_id, cancelled_at, cancellation_reason
    FROM inventory_transfers
    WHERE id = ?1
"#;

async fn load_transfer(tx: &mut LedgerTx, transfer_id: &str) -> EngineResult<InventoryTransfer> {
    let transfer = sqlx::query_as::<_, InventoryTransfer>(SELECT_TRANSFER)
        .bind(transfer_id)
        .fetch_optional(tx.conn())
        .await?
        .ok_or_else(|| DbError::not_found("Transfer", transfer_id))?;
    Ok(transfer)
}

async fn insert_transfer(tx: &mut LedgerTx, transfer: &InventoryTransfer) -> EngineResult<()> {
    debug!(transfer_id = %transfer.id, number = %transfer.transfer_number, "Inserting transfer");

    sqlx::query(
        r#"
        INSERT INTO inventory_transfers (
            id, tenant_id, transfer_number, from_branch_id, to_branch_id,
            product_id, quantity, status, reason,
            created_by_user_id, created_at,
            approved_by_user_id, approved_at,
            received_by_user_id, received_at,
            cancelled_by_user_id, cancelled_at, cancellation_reason
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9,
            ?10, ?11,
            ?12, ?13,
            ?14, ?15,
            ?16, ?17, ?18
        )
        "#,
    )
    .bind(&transfer.id)
    .bind(&transfer.tenant_id)
    .bind(&transfer.transfer_number)
    .bind(&transfer.from_branch_id)
    .bind(&transfer.to_branch_id)
    .bind(&transfer.product_id)
    .bind(transfer.quantity)
    .bind(transfer.status)
    .bind(&transfer.reason)
    .bind(&transfer.created_by_user_id)
    .bind(transfer.created_at)
    .bind(&transfer.approved_by_user_id)
    .bind(transfer.approved_at)
    .bind(&transfer.received_by_user_id)
    .bind(transfer.received_at)
    .bind(&transfer.cancelled_by_user_id)
    .bind(transfer.cancelled_at)
    .bind(&transfer.cancellation_reason)
    .execute(tx.conn())
    .await?;

    Ok(())
}

/// Status-guarded transition; losing the guard means another writer moved
/// the transfer first.
async fn transition(
    tx: &mut LedgerTx,
    transfer_id: &str,
    from: TransferStatus,
    set_clause: &str,
    user_id: &str,
    at: chrono::DateTime<Utc>,
) -> EngineResult<()> {
    let sql = format!("UPDATE inventory_transfers SET {set_clause} WHERE id = ?1 AND status = ?2");
    let result = sqlx::query(&sql)
        .bind(transfer_id)
        .bind(from)
        .bind(user_id)
        .bind(at)
        .execute(tx.conn())
        .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::ConcurrentModification {
            subject: format!("transfer {transfer_id}"),
        }
        .into());
    }
    Ok(())
}

/// Next tenant-scoped transfer number: `TRF-YYYYMMDD-NNNN`.
async fn next_transfer_number(tx: &mut LedgerTx, tenant_id: &str) -> EngineResult<String> {
    let date_part = Utc::now().format("%Y%m%d").to_string();
    let prefix = format!("TRF-{date_part}-%");

    let today: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM inventory_transfers WHERE tenant_id = ?1 AND transfer_number LIKE ?2",
    )
    .bind(tenant_id)
    .bind(&prefix)
    .fetch_one(tx.conn())
    .await?;

    // The unique index on (tenant_id, transfer_number) catches a race on
    // the counter; the enclosing scope then rolls back.
    Ok(format!("TRF-{date_part}-{:04}", today + 1))
}

fn require_status(
    transfer: &InventoryTransfer,
    expected: TransferStatus,
    operation: &str,
) -> EngineResult<()> {
    if transfer.status != expected {
        return Err(LedgerError::InvalidTransferState {
            transfer_id: transfer.id.clone(),
            status: transfer.status.as_str().to_string(),
            operation: operation.to_string(),
        }
        .into());
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
