//! # Domain Types
//!
//! Core domain types for the Tally POS ledger & workflow engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │   LedgerEntry   │   │      Shift      │   │InventoryTransfer│        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │        │
//! │  │  seq (rowid)    │   │  opening_balance│   │  transfer_number│        │
//! │  │  kind, delta    │   │  status         │   │  status         │        │
//! │  │  balance chain  │   │  handover fields│   │  from/to branch │        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐        │
//! │  │  MovementKind   │   │  ReferenceKind  │   │ PurchaseInvoice │        │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │        │
//! │  │  Sale, Refund,  │   │  Order, Shift,  │   │  + InvoiceItem  │        │
//! │  │  Transfer, ...  │   │  Transfer, ...  │   │  + Payment rows │        │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - Business ID where one exists: (transfer_number, invoice_number) -
//!   human-readable, tenant-scoped unique

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate represented in basis points (bps).
///
/// ## Why Basis Points?
/// 1 basis point = 0.01% = 1/10000
/// 825 bps = 8.25%
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Returns the rate as a percentage (for display only).
    #[inline]
    pub fn percentage(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }

    /// Checks if tax rate is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl Default for TaxRate {
    fn default() -> Self {
        TaxRate::zero()
    }
}

// =============================================================================
// Movement Kind
// =============================================================================

/// The kind of balance-changing event a ledger entry records.
///
/// A closed set: balance-direction logic matches exhaustively over this enum,
/// so adding a kind forces every direction rule to be revisited.
///
/// Which kinds a ledger accepts, and with which delta sign, is defined in
/// [`crate::chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Baseline entry when a register or stock position is commissioned.
    Opening,
    /// Customer sale: stock out, cash in.
    Sale,
    /// Customer refund: stock back in, cash out.
    Refund,
    /// Manual correction in either direction. Requires a reason.
    Adjustment,
    /// Goods received from a supplier (purchase invoice confirmation).
    Receiving,
    /// Stock written off as damaged. Requires a reason.
    Damage,
    /// Goods returned to a supplier (invoice return).
    Return,
    /// Inter-branch transfer leg; sign distinguishes out (-) from in (+).
    Transfer,
    /// Cash put into the register outside of sales. Requires a reason.
    Deposit,
    /// Cash taken out of the register. Requires a reason.
    Withdrawal,
    /// Operating expense paid from the register. Requires a reason.
    Expense,
    /// Supplier invoice paid from the register.
    SupplierPayment,
}

impl MovementKind {
    /// Manual kinds must carry a free-text reason; everything else gets its
    /// context from the `(reference_kind, reference_id)` link.
    pub const fn requires_reason(&self) -> bool {
        matches!(
            self,
            MovementKind::Adjustment
                | MovementKind::Damage
                | MovementKind::Deposit
                | MovementKind::Withdrawal
                | MovementKind::Expense
        )
    }

    /// Stable lowercase name, matching the database representation.
    pub const fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Opening => "opening",
            MovementKind::Sale => "sale",
            MovementKind::Refund => "refund",
            MovementKind::Adjustment => "adjustment",
            MovementKind::Receiving => "receiving",
            MovementKind::Damage => "damage",
            MovementKind::Return => "return",
            MovementKind::Transfer => "transfer",
            MovementKind::Deposit => "deposit",
            MovementKind::Withdrawal => "withdrawal",
            MovementKind::Expense => "expense",
            MovementKind::SupplierPayment => "supplier_payment",
        }
    }
}

// =============================================================================
// Reference Kind
// =============================================================================

/// Polymorphic link from a ledger entry to the operation that caused it.
///
/// Entities never hold back-references to their ledger rows; the link only
/// points forward, avoiding ownership cycles. Look-ups go by query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// A customer order/sale from the order-processing layer.
    Order,
    /// A cashier shift (opening floats, reconciliation adjustments).
    Shift,
    /// An inter-branch inventory transfer.
    Transfer,
    /// A supplier purchase invoice.
    PurchaseInvoice,
    /// A manual operation with no owning entity; `reason` explains it.
    Manual,
}

/// A `(kind, id)` reference pair. `id` is None only for Manual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub id: Option<String>,
}

impl Reference {
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Reference {
            kind,
            id: Some(id.into()),
        }
    }

    /// A manual reference with no owning entity.
    pub fn manual() -> Self {
        Reference {
            kind: ReferenceKind::Manual,
            id: None,
        }
    }
}

// =============================================================================
// Ledger Entry
// =============================================================================

/// An immutable record of a balance-changing event with before/after
/// balances.
///
/// Shared by the stock ledger (`delta` is a quantity, `product_id` set) and
/// the cash ledger (`delta` is cents, `product_id` None, `shift_id` set for
/// shift-scoped activity).
///
/// ## Invariants
/// - `balance_after = balance_before + delta`
/// - per subject, ordered by `seq`, each entry's `balance_before` equals the
///   previous entry's `balance_after` (or 0 if none)
/// - entries are never updated or deleted; corrections are new entries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Authoritative insertion order within the ledger table (SQLite rowid).
    /// Timestamps are informational; `seq` breaks ties.
    pub seq: i64,

    /// Tenant this entry belongs to.
    pub tenant_id: String,

    /// Branch whose balance this entry moves.
    pub branch_id: String,

    /// Product, for stock entries. None for cash entries.
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub product_id: Option<String>,

    /// What happened.
    pub kind: MovementKind,

    /// Signed quantity (stock) or signed cents (cash).
    pub delta: i64,

    /// Running balance before this entry.
    pub balance_before: i64,

    /// Running balance after this entry. Always `balance_before + delta`.
    pub balance_after: i64,

    /// What caused this entry.
    pub reference_kind: ReferenceKind,

    /// Id of the causing entity; None for manual operations.
    pub reference_id: Option<String>,

    /// Shift this cash entry was recorded under. None for stock entries and
    /// for cash activity outside any shift.
    #[cfg_attr(feature = "sqlx", sqlx(default))]
    pub shift_id: Option<String>,

    /// Free-text reason. Required for manual kinds.
    pub reason: Option<String>,

    /// User who performed the operation.
    pub actor_user_id: String,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Shift
// =============================================================================

/// The lifecycle state of a cashier shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    /// Accepting cash activity. Exactly one per (branch, user).
    Open,
    /// Closed by the owning user with a counted balance. Terminal.
    Closed,
    /// Closed by a privileged actor (stale or abandoned shift). Terminal.
    ForceClosed,
}

impl ShiftStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Open => "open",
            ShiftStatus::Closed => "closed",
            ShiftStatus::ForceClosed => "force_closed",
        }
    }
}

/// A bounded period of cashier register activity.
///
/// Created on open; mutated only through the ShiftManager state machine;
/// never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Shift {
    pub id: String,
    pub tenant_id: String,
    pub branch_id: String,
    pub user_id: String,
    pub status: ShiftStatus,

    /// Counted cash float at open.
    pub opening_balance: Money,
    /// Counted cash at close. None until closed.
    pub closing_balance: Option<Money>,
    /// Ledger-derived balance at close: opening + signed sum of cash entries
    /// stamped with this shift. None until closed.
    pub expected_balance: Option<Money>,
    /// `closing_balance - expected_balance`. Recorded, never rejected.
    pub difference: Option<Money>,

    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,

    // Handover: this shift continues a previous user's register session, or
    // was handed over to a successor.
    pub handed_over_from_user_id: Option<String>,
    pub handed_over_to_user_id: Option<String>,
    pub handover_balance: Option<Money>,
    pub handover_at: Option<DateTime<Utc>>,

    // Force-close bookkeeping.
    pub force_closed_by_user_id: Option<String>,
    pub force_close_reason: Option<String>,
}

impl Shift {
    /// Whether the shift still accepts cash activity.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == ShiftStatus::Open
    }

    /// How long the shift has been open, up to `now`.
    pub fn open_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at
    }
}

// =============================================================================
// Inventory Transfer
// =============================================================================

/// The workflow state of an inter-branch transfer.
///
/// Transitions are one-directional:
/// `Pending -> Approved -> Completed`, or `Pending|Approved -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Created, no ledger effect yet.
    Pending,
    /// Source stock deducted, awaiting receipt at destination.
    Approved,
    /// Destination stock credited. Terminal.
    Completed,
    /// Abandoned; any source deduction has been reversed. Terminal.
    Cancelled,
}

impl TransferStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Approved => "approved",
            TransferStatus::Completed => "completed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// Completed and Cancelled transfers never change again.
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }
}

/// A two-leg stock movement between branches under approval control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryTransfer {
    pub id: String,
    pub tenant_id: String,
    /// Human-readable, unique per tenant (`TRF-YYYYMMDD-NNNN`).
    pub transfer_number: String,
    pub from_branch_id: String,
    pub to_branch_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub status: TransferStatus,
    pub reason: Option<String>,

    pub created_by_user_id: String,
    pub created_at: DateTime<Utc>,
    pub approved_by_user_id: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub received_by_user_id: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_by_user_id: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

// =============================================================================
// Purchase Invoice
// =============================================================================

/// The lifecycle state of a supplier purchase invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Freely editable; no ledger effect yet.
    Draft,
    /// Stock received; line items immutable.
    Confirmed,
    /// Fully paid.
    Paid,
    /// Some payment applied, balance outstanding.
    PartiallyPaid,
    /// Abandoned before confirmation. Terminal.
    Cancelled,
    /// All received quantity returned to the supplier.
    Returned,
    /// Some received quantity returned.
    PartiallyReturned,
}

impl InvoiceStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Confirmed => "confirmed",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Cancelled => "cancelled",
            InvoiceStatus::Returned => "returned",
            InvoiceStatus::PartiallyReturned => "partially_returned",
        }
    }

    /// Whether line items may still be edited.
    #[inline]
    pub const fn is_editable(&self) -> bool {
        matches!(self, InvoiceStatus::Draft)
    }

    /// Whether payments may be applied in this state.
    #[inline]
    pub const fn accepts_payments(&self) -> bool {
        matches!(
            self,
            InvoiceStatus::Confirmed
                | InvoiceStatus::PartiallyPaid
                | InvoiceStatus::PartiallyReturned
        )
    }
}

/// How an invoice payment was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Paid from the branch register; drives a SupplierPayment cash entry.
    Cash,
    /// Paid by bank transfer outside the register.
    BankTransfer,
    /// Paid by card outside the register.
    Card,
}

/// A supplier purchase invoice header.
///
/// Line items and payments live in their own rows (fetched separately),
/// mirroring how sales keep their items out of the sale header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PurchaseInvoice {
    pub id: String,
    pub tenant_id: String,
    /// Branch receiving the goods.
    pub branch_id: String,
    pub invoice_number: String,
    pub supplier_id: String,
    pub invoice_date: DateTime<Utc>,
    pub status: InvoiceStatus,

    pub subtotal: Money,
    pub tax_amount: Money,
    pub total: Money,
    /// Sum of applied payments.
    pub amount_paid: Money,
    /// `total - amount_paid`.
    pub amount_due: Money,

    pub created_by_user_id: String,
    pub created_at: DateTime<Utc>,
    pub confirmed_by_user_id: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// A line item on a purchase invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoiceItem {
    pub id: String,
    pub invoice_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub purchase_price: Money,
    /// Quantity sent back to the supplier after confirmation.
    pub returned_quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl InvoiceItem {
    /// Line total before tax (purchase price × quantity).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.purchase_price.multiply_quantity(self.quantity)
    }
}

/// A payment applied to a purchase invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InvoicePayment {
    pub id: String,
    pub invoice_id: String,
    pub amount: Money,
    pub method: PaymentMethod,
    /// External reference (bank slip number, card auth code).
    pub reference_number: Option<String>,
    pub paid_by_user_id: String,
    pub paid_at: DateTime<Utc>,
}

// =============================================================================
// Tenant Configuration
// =============================================================================

/// Per-tenant policy knobs the engine consults.
///
/// Resolved by the caller (tenant settings live outside this engine) and
/// handed to the engine at construction.
///
/// ## Example
/// ```rust
/// use tally_core::types::TenantConfig;
///
/// let tenant = TenantConfig::new("tenant-1")
///     .allow_negative_stock(false)
///     .tax_rate_bps(825);
/// assert!(!tenant.allow_negative_stock);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: String,

    /// Permit decreasing stock movements to drive a balance negative.
    pub allow_negative_stock: bool,

    /// Permit decreasing cash movements (including transfer-out) to overdraw
    /// a register. Policy question left open upstream; configuration-driven
    /// here, default deny.
    pub allow_negative_cash: bool,

    /// Tax rate applied to purchase invoice subtotals, in basis points.
    pub tax_rate_bps: u32,

    /// Whether tax is applied at all.
    pub is_tax_enabled: bool,

    /// Open shifts older than this are flagged as stale (warning).
    pub shift_warning_hours: i64,

    /// Open shifts older than this are flagged as stale (critical) and are
    /// force-close candidates.
    pub shift_critical_hours: i64,
}

impl TenantConfig {
    /// Default policy: deny negative balances, no tax, 12h/24h staleness.
    pub fn new(tenant_id: impl Into<String>) -> Self {
        TenantConfig {
            tenant_id: tenant_id.into(),
            allow_negative_stock: false,
            allow_negative_cash: false,
            tax_rate_bps: 0,
            is_tax_enabled: false,
            shift_warning_hours: 12,
            shift_critical_hours: 24,
        }
    }

    pub fn allow_negative_stock(mut self, allow: bool) -> Self {
        self.allow_negative_stock = allow;
        self
    }

    pub fn allow_negative_cash(mut self, allow: bool) -> Self {
        self.allow_negative_cash = allow;
        self
    }

    pub fn tax_rate_bps(mut self, bps: u32) -> Self {
        self.tax_rate_bps = bps;
        self.is_tax_enabled = bps > 0;
        self
    }

    pub fn shift_staleness_hours(mut self, warning: i64, critical: i64) -> Self {
        self.shift_warning_hours = warning;
        self.shift_critical_hours = critical;
        self
    }

    /// The configured tax rate, or zero when tax is disabled.
    pub fn effective_tax_rate(&self) -> TaxRate {
        if self.is_tax_enabled {
            TaxRate::from_bps(self.tax_rate_bps)
        } else {
            TaxRate::zero()
        }
    }
}

// =============================================================================
// Actor Context
// =============================================================================

/// Who is performing an operation, resolved by the caller's auth layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorContext {
    pub tenant_id: String,
    pub branch_id: String,
    pub user_id: String,
}

impl ActorContext {
    pub fn new(
        tenant_id: impl Into<String>,
        branch_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        ActorContext {
            tenant_id: tenant_id.into(),
            branch_id: branch_id.into(),
            user_id: user_id.into(),
        }
    }
}

// =============================================================================
// History Paging
// =============================================================================

/// Page window for ledger history reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HistoryPage {
    pub limit: i64,
    pub offset: i64,
}

impl HistoryPage {
    pub const fn new(limit: i64, offset: i64) -> Self {
        HistoryPage { limit, offset }
    }

    /// First page with the default window.
    pub const fn first() -> Self {
        HistoryPage {
            limit: 50,
            offset: 0,
        }
    }
}

impl Default for HistoryPage {
    fn default() -> Self {
        HistoryPage::first()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
