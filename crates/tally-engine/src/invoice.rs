//! # Purchase Invoice Workflow
//!
//! Supplier invoice lifecycle: draft editing, confirmation into the stock
//! ledger, payment application, and post-confirmation returns.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create_invoice        confirm           add_payment                   │
//! │  ──────────────► Draft ────────► Confirmed ───────────► PartiallyPaid   │
//! │                    │   (Receiving    │                       │          │
//! │                    │    entry per    │                       ▼          │
//! │                    │    line item)   │                     Paid         │
//! │             cancel │                 │ return_items                     │
//! │                    ▼                 ▼ (compensating Return entries)    │
//! │                Cancelled    PartiallyReturned / Returned                │
//! │                                                                         │
//! │  Draft invoices are freely editable. Confirmation freezes line items;   │
//! │  afterwards only payments and returns may touch the invoice.            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cash payments additionally drive a SupplierPayment entry on the branch
//! register inside the same scope: a register that cannot cover the payment
//! aborts the whole payment, invoice untouched.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLog};
use crate::cash::{CashLedger, CashMovement};
use crate::coordinator::{LedgerTx, TransactionCoordinator};
use crate::error::{DbError, EngineResult};
use crate::stock::{StockLedger, StockMovement};
use tally_core::{
    validation, ActorContext, InvoiceItem, InvoicePayment, InvoiceStatus, LedgerError, Money,
    MovementKind, PaymentMethod, PurchaseInvoice, Reference, ReferenceKind, TenantConfig,
    ValidationError,
};

// =============================================================================
// Requests
// =============================================================================

/// A new draft invoice.
#[derive(Debug, Clone)]
pub struct CreateInvoice {
    /// Branch that will receive the goods.
    pub branch_id: String,
    pub supplier_id: String,
    /// Supplied by the vendor document; generated when absent.
    pub invoice_number: Option<String>,
    /// Vendor document date; defaults to now.
    pub invoice_date: Option<DateTime<Utc>>,
    pub items: Vec<NewInvoiceItem>,
}

/// A line item on a draft invoice.
#[derive(Debug, Clone)]
pub struct NewInvoiceItem {
    pub product_id: String,
    pub quantity: i64,
    pub purchase_price: Money,
}

/// A quantity being sent back to the supplier.
#[derive(Debug, Clone)]
pub struct ReturnItem {
    pub product_id: String,
    pub quantity: i64,
}

// =============================================================================
// Workflow
// =============================================================================

/// Drives the purchase invoice state machine, its Receiving/Return stock
/// legs, and payment application.
#[derive(Debug, Clone)]
pub struct PurchaseInvoiceWorkflow {
    pool: SqlitePool,
    tenant: TenantConfig,
}

impl PurchaseInvoiceWorkflow {
    pub fn new(pool: SqlitePool, tenant: TenantConfig) -> Self {
        PurchaseInvoiceWorkflow { pool, tenant }
    }

    fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.pool.clone())
    }

    fn stock(&self) -> StockLedger {
        StockLedger::new(self.pool.clone(), self.tenant.clone())
    }

    fn cash(&self) -> CashLedger {
        CashLedger::new(self.pool.clone(), self.tenant.clone())
    }

    /// Creates a Draft invoice with any initial line items. No ledger effect.
    pub async fn create_invoice(
        &self,
        actor: &ActorContext,
        request: CreateInvoice,
    ) -> EngineResult<PurchaseInvoice> {
        validation::validate_required("branch_id", &request.branch_id)?;
        validation::validate_required("supplier_id", &request.supplier_id)?;
        for item in &request.items {
            validate_item(item)?;
        }

        let workflow = self.clone();
        let actor_user = actor.user_id.clone();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let now = Utc::now();
                    let invoice_number = match request.invoice_number {
                        Some(number) => number,
                        None => next_invoice_number(tx, &workflow.tenant.tenant_id).await?,
                    };

                    let id = Uuid::new_v4().to_string();
                    let invoice = PurchaseInvoice {
                        id: id.clone(),
                        tenant_id: workflow.tenant.tenant_id.clone(),
                        branch_id: request.branch_id,
                        invoice_number,
                        supplier_id: request.supplier_id,
                        invoice_date: request.invoice_date.unwrap_or(now),
                        status: InvoiceStatus::Draft,
                        subtotal: Money::zero(),
                        tax_amount: Money::zero(),
                        total: Money::zero(),
                        amount_paid: Money::zero(),
                        amount_due: Money::zero(),
                        created_by_user_id: actor_user,
                        created_at: now,
                        confirmed_by_user_id: None,
                        confirmed_at: None,
                        updated_at: now,
                    };
                    insert_invoice(tx, &invoice).await?;

                    for item in request.items {
                        insert_item(tx, &id, &item, now).await?;
                    }

                    recompute_totals(tx, &id, &workflow.tenant).await?;
                    load_invoice(tx, &id).await
                })
            })
            .await?;

        info!(
            invoice_id = %invoice.id,
            number = %invoice.invoice_number,
            supplier = %invoice.supplier_id,
            total = %invoice.total,
            "Purchase invoice created"
        );
        self.audit(actor, "invoice.created", &invoice).await;
        Ok(invoice)
    }

    /// Adds a line item to a Draft invoice and recomputes totals.
    pub async fn add_item(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
        item: NewInvoiceItem,
    ) -> EngineResult<PurchaseInvoice> {
        validate_item(&item)?;

        let workflow = self.clone();
        let invoice_id = invoice_id.to_string();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;
                    require_editable(&invoice)?;

                    insert_item(tx, &invoice.id, &item, Utc::now()).await?;
                    recompute_totals(tx, &invoice.id, &workflow.tenant).await?;
                    load_invoice(tx, &invoice.id).await
                })
            })
            .await?;

        self.audit(actor, "invoice.item_added", &invoice).await;
        Ok(invoice)
    }

    /// Removes a line item from a Draft invoice and recomputes totals.
    pub async fn remove_item(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
        item_id: &str,
    ) -> EngineResult<PurchaseInvoice> {
        let workflow = self.clone();
        let invoice_id = invoice_id.to_string();
        let item_id = item_id.to_string();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;
                    require_editable(&invoice)?;

                    let result = sqlx::query(
                        "DELETE FROM purchase_invoice_items WHERE id = ?1 AND invoice_id = ?2",
                    )
                    .bind(&item_id)
                    .bind(&invoice.id)
                    .execute(tx.conn())
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(DbError::not_found("Invoice item", &item_id).into());
                    }

                    recompute_totals(tx, &invoice.id, &workflow.tenant).await?;
                    load_invoice(tx, &invoice.id).await
                })
            })
            .await?;

        self.audit(actor, "invoice.item_removed", &invoice).await;
        Ok(invoice)
    }

    /// Confirms a Draft invoice: one Receiving entry per line item lands on
    /// the branch's stock ledger and the line items freeze.
    ///
    /// Receiving is increasing by definition and is never blocked by the
    /// negative-stock policy.
    pub async fn confirm(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
    ) -> EngineResult<PurchaseInvoice> {
        let workflow = self.clone();
        let invoice_id = invoice_id.to_string();
        let confirmer = actor.user_id.clone();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;
                    require_editable(&invoice)?;

                    let items = load_items(tx, &invoice.id).await?;
                    if items.is_empty() {
                        return Err(ValidationError::Required {
                            field: "items".to_string(),
                        }
                        .into());
                    }

                    for item in &items {
                        workflow
                            .stock()
                            .record_movement(
                                tx,
                                StockMovement::new(
                                    &invoice.branch_id,
                                    &item.product_id,
                                    MovementKind::Receiving,
                                    item.quantity,
                                    Reference::new(ReferenceKind::PurchaseInvoice, &invoice.id),
                                    &confirmer,
                                ),
                            )
                            .await?;
                    }

                    let now = Utc::now();
                    let result = sqlx::query(
                        r#"
                        UPDATE purchase_invoices SET
                            status = 'confirmed',
                            confirmed_by_user_id = ?2,
                            confirmed_at = ?3,
                            updated_at = ?3
                        WHERE id = ?1 AND status = 'draft'
                        "#,
                    )
                    .bind(&invoice.id)
                    .bind(&confirmer)
                    .bind(now)
                    .execute(tx.conn())
                    .await?;
                    if result.rows_affected() == 0 {
                        return Err(LedgerError::ConcurrentModification {
                            subject: format!("invoice {}", invoice.id),
                        }
                        .into());
                    }

                    Ok(PurchaseInvoice {
                        status: InvoiceStatus::Confirmed,
                        confirmed_by_user_id: Some(confirmer),
                        confirmed_at: Some(now),
                        updated_at: now,
                        ..invoice
                    })
                })
            })
            .await?;

        info!(
            invoice_id = %invoice.id,
            total = %invoice.total,
            "Invoice confirmed, stock received"
        );
        self.audit(actor, "invoice.confirmed", &invoice).await;
        Ok(invoice)
    }

    /// Applies a payment and recomputes `amount_paid`/`amount_due`.
    ///
    /// Becomes Paid when the balance hits zero, else PartiallyPaid. A cash
    /// payment drives a SupplierPayment register entry in the same scope.
    pub async fn add_payment(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
        amount: Money,
        method: PaymentMethod,
        reference_number: Option<String>,
    ) -> EngineResult<PurchaseInvoice> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount {
                reason: format!("payment must be positive, got {amount}"),
            }
            .into());
        }

        let workflow = self.clone();
        let invoice_id = invoice_id.to_string();
        let payer = actor.user_id.clone();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;

                    if invoice.status == InvoiceStatus::Paid {
                        return Err(LedgerError::InvalidPaymentAmount {
                            reason: "invoice is already fully paid".to_string(),
                        }
                        .into());
                    }
                    if !invoice.status.accepts_payments() {
                        return Err(LedgerError::InvoiceNotEditable {
                            invoice_id: invoice.id,
                            status: invoice.status.as_str().to_string(),
                        }
                        .into());
                    }
                    if amount > invoice.amount_due {
                        return Err(LedgerError::InvalidPaymentAmount {
                            reason: format!(
                                "payment {amount} exceeds amount due {}",
                                invoice.amount_due
                            ),
                        }
                        .into());
                    }

                    let now = Utc::now();
                    sqlx::query(
                        r#"
                        INSERT INTO purchase_invoice_payments (
                            id, invoice_id, amount, method,
                            reference_number, paid_by_user_id, paid_at
                        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                        "#,
                    )
                    .bind(Uuid::new_v4().to_string())
                    .bind(&invoice.id)
                    .bind(amount)
                    .bind(method)
                    .bind(&reference_number)
                    .bind(&payer)
                    .bind(now)
                    .execute(tx.conn())
                    .await?;

                    // Cash leaves through the register; the ledger enforces
                    // the overdraw policy and aborts everything on refusal.
                    if method == PaymentMethod::Cash {
                        workflow
                            .cash()
                            .record_movement(
                                tx,
                                CashMovement::new(
                                    &invoice.branch_id,
                                    MovementKind::SupplierPayment,
                                    -amount,
                                    Reference::new(ReferenceKind::PurchaseInvoice, &invoice.id),
                                    &payer,
                                ),
                            )
                            .await?;
                    }

                    let amount_paid = invoice.amount_paid + amount;
                    let amount_due = invoice.total - amount_paid;
                    let status = if amount_due.is_zero() {
                        match invoice.status {
                            InvoiceStatus::PartiallyReturned => InvoiceStatus::PartiallyReturned,
                            _ => InvoiceStatus::Paid,
                        }
                    } else {
                        match invoice.status {
                            InvoiceStatus::PartiallyReturned => InvoiceStatus::PartiallyReturned,
                            _ => InvoiceStatus::PartiallyPaid,
                        }
                    };

                    sqlx::query(
                        r#"
                        UPDATE purchase_invoices SET
                            status = ?2, amount_paid = ?3, amount_due = ?4, updated_at = ?5
                        WHERE id = ?1
                        "#,
                    )
                    .bind(&invoice.id)
                    .bind(status)
                    .bind(amount_paid)
                    .bind(amount_due)
                    .bind(now)
                    .execute(tx.conn())
                    .await?;

                    Ok(PurchaseInvoice {
                        status,
                        amount_paid,
                        amount_due,
                        updated_at: now,
                        ..invoice
                    })
                })
            })
            .await?;

        info!(
            invoice_id = %invoice.id,
            paid = %invoice.amount_paid,
            due = %invoice.amount_due,
            status = invoice.status.as_str(),
            "Invoice payment applied"
        );
        self.audit(actor, "invoice.payment_added", &invoice).await;
        Ok(invoice)
    }

    /// Returns received quantity to the supplier with compensating Return
    /// entries, mirroring the transfer-cancellation reversal pattern.
    pub async fn return_items(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
        returns: Vec<ReturnItem>,
        reason: &str,
    ) -> EngineResult<PurchaseInvoice> {
        validation::validate_reason(Some(reason))?;
        if returns.is_empty() {
            return Err(ValidationError::Required {
                field: "returns".to_string(),
            }
            .into());
        }
        for item in &returns {
            validation::validate_quantity(item.quantity)?;
        }

        let workflow = self.clone();
        let invoice_id = invoice_id.to_string();
        let returner = actor.user_id.clone();
        let reason = reason.to_string();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;
                    require_returnable(&invoice)?;

                    let items = load_items(tx, &invoice.id).await?;
                    for request in &returns {
                        let item = items
                            .iter()
                            .find(|i| i.product_id == request.product_id)
                            .ok_or_else(|| {
                                DbError::not_found("Invoice item", &request.product_id)
                            })?;

                        let remaining = item.quantity - item.returned_quantity;
                        if request.quantity > remaining {
                            return Err(ValidationError::OutOfRange {
                                field: format!("return quantity for {}", request.product_id),
                                min: 1,
                                max: remaining,
                            }
                            .into());
                        }

                        workflow
                            .stock()
                            .record_movement(
                                tx,
                                StockMovement::new(
                                    &invoice.branch_id,
                                    &request.product_id,
                                    MovementKind::Return,
                                    -request.quantity,
                                    Reference::new(ReferenceKind::PurchaseInvoice, &invoice.id),
                                    &returner,
                                )
                                .with_reason(&reason),
                            )
                            .await?;

                        sqlx::query(
                            r#"
                            UPDATE purchase_invoice_items
                            SET returned_quantity = returned_quantity + ?3
                            WHERE id = ?1 AND invoice_id = ?2
                            "#,
                        )
                        .bind(&item.id)
                        .bind(&invoice.id)
                        .bind(request.quantity)
                        .execute(tx.conn())
                        .await?;
                    }

                    let outstanding: i64 = sqlx::query_scalar(
                        r#"
                        SELECT COALESCE(SUM(quantity - returned_quantity), 0)
                        FROM purchase_invoice_items
                        WHERE invoice_id = ?1
                        "#,
                    )
                    .bind(&invoice.id)
                    .fetch_one(tx.conn())
                    .await?;

                    let status = if outstanding == 0 {
                        InvoiceStatus::Returned
                    } else {
                        InvoiceStatus::PartiallyReturned
                    };
                    let now = Utc::now();

                    sqlx::query(
                        "UPDATE purchase_invoices SET status = ?2, updated_at = ?3 WHERE id = ?1",
                    )
                    .bind(&invoice.id)
                    .bind(status)
                    .bind(now)
                    .execute(tx.conn())
                    .await?;

                    Ok(PurchaseInvoice {
                        status,
                        updated_at: now,
                        ..invoice
                    })
                })
            })
            .await?;

        info!(
            invoice_id = %invoice.id,
            status = invoice.status.as_str(),
            "Invoice items returned to supplier"
        );
        self.audit(actor, "invoice.returned", &invoice).await;
        Ok(invoice)
    }

    /// Cancels a Draft invoice. Confirmed invoices cannot be cancelled; they
    /// are unwound through `return_items`.
    pub async fn cancel(
        &self,
        actor: &ActorContext,
        invoice_id: &str,
    ) -> EngineResult<PurchaseInvoice> {
        let invoice_id = invoice_id.to_string();

        let invoice = self
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    let invoice = load_invoice(tx, &invoice_id).await?;
                    require_editable(&invoice)?;

                    let now = Utc::now();
                    sqlx::query(
                        r#"
                        UPDATE purchase_invoices SET status = 'cancelled', updated_at = ?2
                        WHERE id = ?1 AND status = 'draft'
                        "#,
                    )
                    .bind(&invoice.id)
                    .bind(now)
                    .execute(tx.conn())
                    .await?;

                    Ok(PurchaseInvoice {
                        status: InvoiceStatus::Cancelled,
                        updated_at: now,
                        ..invoice
                    })
                })
            })
            .await?;

        info!(invoice_id = %invoice.id, "Invoice cancelled");
        self.audit(actor, "invoice.cancelled", &invoice).await;
        Ok(invoice)
    }

    /// Fetches an invoice header by id.
    pub async fn get(&self, invoice_id: &str) -> EngineResult<PurchaseInvoice> {
        let invoice = sqlx::query_as::<_, PurchaseInvoice>(SELECT_INVOICE)
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;
        Ok(invoice)
    }

    /// Line items for an invoice, in insertion order.
    pub async fn items(&self, invoice_id: &str) -> EngineResult<Vec<InvoiceItem>> {
        let items = sqlx::query_as::<_, InvoiceItem>(
            r#"
            SELECT id, invoice_id, product_id, quantity, purchase_price,
                   returned_quantity, created_at
            FROM purchase_invoice_items
            WHERE invoice_id = ?1
            ORDER BY created_at, id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Payments applied to an invoice, in application order.
    pub async fn payments(&self, invoice_id: &str) -> EngineResult<Vec<InvoicePayment>> {
        let payments = sqlx::query_as::<_, InvoicePayment>(
            r#"
            SELECT id, invoice_id, amount, method, reference_number,
                   paid_by_user_id, paid_at
            FROM purchase_invoice_payments
            WHERE invoice_id = ?1
            ORDER BY paid_at, id
            "#,
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn audit(&self, actor: &ActorContext, action: &str, invoice: &PurchaseInvoice) {
        AuditLog::new(self.pool.clone())
            .record(AuditEvent {
                action: action.to_string(),
                entity_type: "purchase_invoice".to_string(),
                entity_id: invoice.id.clone(),
                old_values: None,
                new_values: serde_json::to_value(invoice).ok(),
                actor_user_id: actor.user_id.clone(),
            })
            .await;
    }
}

// =============================================================================
// Shared Queries & Checks
// =============================================================================

const SELECT_INVOICE: &str = r#"
    SELECT id, tenant_id, branch_id, invoice_number, supplier_id,
           invoice_date, status, subtotal, tax_amount, total,
           amount_paid, amount_due,
           created_by_user_id, created_at,
           confirmed_by_user_id, confirmed_at, updated_at
    FROM purchase_invoices
    WHERE id = ?1
"#;

async fn load_invoice(tx: &mut LedgerTx, invoice_id: &str) -> EngineResult<PurchaseInvoice> {
    let invoice = sqlx::query_as::<_, PurchaseInvoice>(SELECT_INVOICE)
        .bind(invoice_id)
        .fetch_optional(tx.conn())
        .await?
        .ok_or_else(|| DbError::not_found("Invoice", invoice_id))?;
    Ok(invoice)
}

async fn load_items(tx: &mut LedgerTx, invoice_id: &str) -> EngineResult<Vec<InvoiceItem>> {
    let items = sqlx::query_as::<_, InvoiceItem>(
        r#"
        SELECT id, invoice_id, product_id, quantity, purchase_price,
               returned_quantity, created_at
        FROM purchase_invoice_items
        WHERE invoice_id = ?1
        ORDER BY created_at, id
        "#,
    )
    .bind(invoice_id)
    .fetch_all(tx.conn())
    .await?;
    Ok(items)
}

async fn insert_invoice(tx: &mut LedgerTx, invoice: &PurchaseInvoice) -> EngineResult<()> {
    debug!(invoice_id = %invoice.id, number = %invoice.invoice_number, "Inserting invoice");

    sqlx::query(
        r#"
        INSERT INTO purchase_invoices (
            id, tenant_id, branch_id, invoice_number, supplier_id,
            invoice_date, status, subtotal, tax_amount, total,
            amount_paid, amount_due,
            created_by_user_id, created_at,
            confirmed_by_user_id, confirmed_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, ?5,
            ?6, ?7, ?8, ?9, ?10,
            ?11, ?12,
            ?13, ?14,
            ?15, ?16, ?17
        )
        "#,
    )
    .bind(&invoice.id)
    .bind(&invoice.tenant_id)
    .bind(&invoice.branch_id)
    .bind(&invoice.invoice_number)
    .bind(&invoice.supplier_id)
    .bind(invoice.invoice_date)
    .bind(invoice.status)
    .bind(invoice.subtotal)
    .bind(invoice.tax_amount)
    .bind(invoice.total)
    .bind(invoice.amount_paid)
    .bind(invoice.amount_due)
    .bind(&invoice.created_by_user_id)
    .bind(invoice.created_at)
    .bind(&invoice.confirmed_by_user_id)
    .bind(invoice.confirmed_at)
    .bind(invoice.updated_at)
    .execute(tx.conn())
    .await?;

    Ok(())
}

async fn insert_item(
    tx: &mut LedgerTx,
    invoice_id: &str,
    item: &NewInvoiceItem,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    sqlx::query(
        r#"
        INSERT INTO purchase_invoice_items (
            id, invoice_id, product_id, quantity, purchase_price,
            returned_quantity, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(invoice_id)
    .bind(&item.product_id)
    .bind(item.quantity)
    .bind(item.purchase_price)
    .bind(now)
    .execute(tx.conn())
    .await?;

    Ok(())
}

/// Recomputes subtotal/tax/total/amount_due from the item and payment rows.
async fn recompute_totals(
    tx: &mut LedgerTx,
    invoice_id: &str,
    tenant: &TenantConfig,
) -> EngineResult<()> {
    let subtotal_cents: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(quantity * purchase_price), 0)
        FROM purchase_invoice_items
        WHERE invoice_id = ?1
        "#,
    )
    .bind(invoice_id)
    .fetch_one(tx.conn())
    .await?;

    let paid_cents: i64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount), 0) FROM purchase_invoice_payments WHERE invoice_id = ?1",
    )
    .bind(invoice_id)
    .fetch_one(tx.conn())
    .await?;

    let subtotal = Money::from_cents(subtotal_cents);
    let tax_amount = subtotal.calculate_tax(tenant.effective_tax_rate());
    let total = subtotal + tax_amount;
    let amount_paid = Money::from_cents(paid_cents);

    sqlx::query(
        r#"
        UPDATE purchase_invoices SET
            subtotal = ?2, tax_amount = ?3, total = ?4,
            amount_paid = ?5, amount_due = ?6, updated_at = ?7
        WHERE id = ?1
        "#,
    )
    .bind(invoice_id)
    .bind(subtotal)
    .bind(tax_amount)
    .bind(total)
    .bind(amount_paid)
    .bind(total - amount_paid)
    .bind(Utc::now())
    .execute(tx.conn())
    .await?;

    Ok(())
}

/// Next tenant-scoped invoice number: `PINV-YYYYMMDD-NNNN`.
async fn next_invoice_number(tx: &mut LedgerTx, tenant_id: &str) -> EngineResult<String> {
    let date_part = Utc::now().format("%Y%m%d").to_string();
    let prefix = format!("PINV-{date_part}-%");

    let today: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM purchase_invoices WHERE tenant_id = ?1 AND invoice_number LIKE ?2",
    )
    .bind(tenant_id)
    .bind(&prefix)
    .fetch_one(tx.conn())
    .await?;

    Ok(format!("PINV-{date_part}-{:04}", today + 1))
}

fn validate_item(item: &NewInvoiceItem) -> EngineResult<()> {
    validation::validate_required("product_id", &item.product_id)?;
    validation::validate_quantity(item.quantity)?;
    if item.purchase_price.is_negative() {
        return Err(ValidationError::MustBePositive {
            field: "purchase_price".to_string(),
        }
        .into());
    }
    Ok(())
}

fn require_editable(invoice: &PurchaseInvoice) -> EngineResult<()> {
    if !invoice.status.is_editable() {
        return Err(LedgerError::InvoiceNotEditable {
            invoice_id: invoice.id.clone(),
            status: invoice.status.as_str().to_string(),
        }
        .into());
    }
    Ok(())
}

fn require_returnable(invoice: &PurchaseInvoice) -> EngineResult<()> {
    let returnable = matches!(
        invoice.status,
        InvoiceStatus::Confirmed
            | InvoiceStatus::PartiallyPaid
            | InvoiceStatus::Paid
            | InvoiceStatus::PartiallyReturned
    );
    if !returnable {
        return Err(LedgerError::InvoiceNotEditable {
            invoice_id: invoice.id.clone(),
            status: invoice.status.as_str().to_string(),
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
    use tally_core::HistoryPage;

    async fn engine(tenant: TenantConfig) -> Engine {
        Engine::new(DbConfig::in_memory(), tenant).await.unwrap()
    }

    fn actor() -> ActorContext {
        ActorContext::new("t-1", "b-1", "u-1")
    }

    fn two_line_request() -> CreateInvoice {
        CreateInvoice {
            branch_id: "b-1".to_string(),
            supplier_id: "sup-1".to_string(),
            invoice_number: None,
            invoice_date: None,
            items: vec![
                NewInvoiceItem {
                    product_id: "p-1".to_string(),
                    quantity: 10,
                    purchase_price: Money::from_cents(250),
                },
                NewInvoiceItem {
                    product_id: "p-2".to_string(),
                    quantity: 4,
                    purchase_price: Money::from_cents(1_000),
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_draft_totals_with_tax() {
        // Subtotal 65.00, 8.25% tax = 5.36 (rounded), total 70.36.
        let engine = engine(TenantConfig::new("t-1").tax_rate_bps(825)).await;
        let invoice = engine
            .invoices()
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();

        assert_eq!(invoice.status, InvoiceStatus::Draft);
        assert!(invoice.invoice_number.starts_with("PINV-"));
        assert_eq!(invoice.subtotal, Money::from_cents(6_500));
        assert_eq!(invoice.tax_amount, Money::from_cents(536));
        assert_eq!(invoice.total, Money::from_cents(7_036));
        assert_eq!(invoice.amount_due, invoice.total);
    }

    #[tokio::test]
    async fn test_draft_edits_recompute_totals() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        assert_eq!(invoice.total, Money::from_cents(6_500));

        let invoice = invoices
            .add_item(
                &actor(),
                &invoice.id,
                NewInvoiceItem {
                    product_id: "p-3".to_string(),
                    quantity: 1,
                    purchase_price: Money::from_cents(500),
                },
            )
            .await
            .unwrap();
        assert_eq!(invoice.total, Money::from_cents(7_000));

        let items = invoices.items(&invoice.id).await.unwrap();
        let p2 = items.iter().find(|i| i.product_id == "p-2").unwrap();
        let invoice = invoices
            .remove_item(&actor(), &invoice.id, &p2.id)
            .await
            .unwrap();
        assert_eq!(invoice.total, Money::from_cents(3_000));
    }

    #[tokio::test]
    async fn test_confirm_receives_stock() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let confirmed = invoices.confirm(&actor(), &invoice.id).await.unwrap();

        assert_eq!(confirmed.status, InvoiceStatus::Confirmed);
        assert_eq!(
            engine.stock().current_balance("b-1", "p-1").await.unwrap(),
            10
        );
        assert_eq!(
            engine.stock().current_balance("b-1", "p-2").await.unwrap(),
            4
        );

        let history = engine
            .stock()
            .history("b-1", "p-1", HistoryPage::first())
            .await
            .unwrap();
        assert_eq!(history[0].kind, MovementKind::Receiving);
        assert_eq!(history[0].reference_id.as_deref(), Some(invoice.id.as_str()));

        // Line items are frozen now.
        let err = invoices
            .add_item(
                &actor(),
                &invoice.id,
                NewInvoiceItem {
                    product_id: "p-9".to_string(),
                    quantity: 1,
                    purchase_price: Money::from_cents(100),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvoiceNotEditable { .. })
        ));

        // And confirmation is one-shot.
        assert!(invoices.confirm(&actor(), &invoice.id).await.is_err());
    }

    #[tokio::test]
    async fn test_confirm_empty_draft_rejected() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let mut request = two_line_request();
        request.items.clear();

        let invoice = engine
            .invoices()
            .create_invoice(&actor(), request)
            .await
            .unwrap();
        let err = engine
            .invoices()
            .confirm(&actor(), &invoice.id)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_lifecycle() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let invoice = invoices.confirm(&actor(), &invoice.id).await.unwrap();

        // Partial payment by bank transfer.
        let invoice = invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(4_000),
                PaymentMethod::BankTransfer,
                Some("SLIP-17".to_string()),
            )
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.amount_paid, Money::from_cents(4_000));
        assert_eq!(invoice.amount_due, Money::from_cents(2_500));

        // Overpay rejected.
        let err = invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(3_000),
                PaymentMethod::BankTransfer,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidPaymentAmount { .. })
        ));

        // Settle the rest.
        let invoice = invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(2_500),
                PaymentMethod::BankTransfer,
                None,
            )
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Paid);
        assert!(invoice.amount_due.is_zero());

        // Paid invoices take no further payments.
        let err = invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(1),
                PaymentMethod::Cash,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvalidPaymentAmount { .. })
        ));

        assert_eq!(invoices.payments(&invoice.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_cash_payment_drives_register() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        engine
            .cash()
            .record(
                CashMovement::new(
                    "b-1",
                    MovementKind::Deposit,
                    Money::from_cents(10_000),
                    Reference::manual(),
                    "u-1",
                )
                .with_reason("float"),
            )
            .await
            .unwrap();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let invoice = invoices.confirm(&actor(), &invoice.id).await.unwrap();

        invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(6_500),
                PaymentMethod::Cash,
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            engine.cash().current_balance("b-1").await.unwrap(),
            Money::from_cents(3_500)
        );
        let cash_history = engine
            .cash()
            .history("b-1", HistoryPage::first())
            .await
            .unwrap();
        let payment_entry = cash_history.last().unwrap();
        assert_eq!(payment_entry.kind, MovementKind::SupplierPayment);
        assert_eq!(
            payment_entry.reference_id.as_deref(),
            Some(invoice.id.as_str())
        );
    }

    #[tokio::test]
    async fn test_cash_payment_aborts_when_register_cannot_cover() {
        // Register holds 10.00; a 65.00 cash payment must abort entirely:
        // no payment row, no status change, no cash entry.
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        engine
            .cash()
            .record(
                CashMovement::new(
                    "b-1",
                    MovementKind::Deposit,
                    Money::from_cents(1_000),
                    Reference::manual(),
                    "u-1",
                )
                .with_reason("float"),
            )
            .await
            .unwrap();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let invoice = invoices.confirm(&actor(), &invoice.id).await.unwrap();

        let err = invoices
            .add_payment(
                &actor(),
                &invoice.id,
                Money::from_cents(6_500),
                PaymentMethod::Cash,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::CashRegisterInsufficientBalance { .. })
        ));

        let reloaded = invoices.get(&invoice.id).await.unwrap();
        assert_eq!(reloaded.status, InvoiceStatus::Confirmed);
        assert!(reloaded.amount_paid.is_zero());
        assert!(invoices.payments(&invoice.id).await.unwrap().is_empty());
        assert_eq!(
            engine.cash().current_balance("b-1").await.unwrap(),
            Money::from_cents(1_000)
        );
    }

    #[tokio::test]
    async fn test_returns_compensate_stock() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        let invoice = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let invoice = invoices.confirm(&actor(), &invoice.id).await.unwrap();
        assert_eq!(
            engine.stock().current_balance("b-1", "p-1").await.unwrap(),
            10
        );

        // Partial return of one line.
        let invoice = invoices
            .return_items(
                &actor(),
                &invoice.id,
                vec![ReturnItem {
                    product_id: "p-1".to_string(),
                    quantity: 6,
                }],
                "water damaged",
            )
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::PartiallyReturned);
        assert_eq!(
            engine.stock().current_balance("b-1", "p-1").await.unwrap(),
            4
        );

        // Returning more than remains on hand from this invoice fails.
        let err = invoices
            .return_items(
                &actor(),
                &invoice.id,
                vec![ReturnItem {
                    product_id: "p-1".to_string(),
                    quantity: 5,
                }],
                "typo",
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::Validation(_))
        ));

        // Return everything else: fully Returned.
        let invoice = invoices
            .return_items(
                &actor(),
                &invoice.id,
                vec![
                    ReturnItem {
                        product_id: "p-1".to_string(),
                        quantity: 4,
                    },
                    ReturnItem {
                        product_id: "p-2".to_string(),
                        quantity: 4,
                    },
                ],
                "full recall",
            )
            .await
            .unwrap();
        assert_eq!(invoice.status, InvoiceStatus::Returned);
        assert_eq!(
            engine.stock().current_balance("b-1", "p-1").await.unwrap(),
            0
        );
        assert_eq!(
            engine.stock().current_balance("b-1", "p-2").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_cancel_draft_only() {
        let engine = engine(TenantConfig::new("t-1")).await;
        let invoices = engine.invoices();

        let draft = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        let cancelled = invoices.cancel(&actor(), &draft.id).await.unwrap();
        assert_eq!(cancelled.status, InvoiceStatus::Cancelled);

        let other = invoices
            .create_invoice(&actor(), two_line_request())
            .await
            .unwrap();
        invoices.confirm(&actor(), &other.id).await.unwrap();
        let err = invoices.cancel(&actor(), &other.id).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Domain(LedgerError::InvoiceNotEditable { .. })
        ));
    }
}
