//! # tally-engine: Ledger & Workflow Engine for Tally POS
//!
//! The transactional heart of the system: append-only cash and stock
//! ledgers, the shift lifecycle, inter-branch transfers, supplier purchase
//! invoices, and the atomic transaction boundary tying them together.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Data Flow                              │
//! │                                                                         │
//! │  Order processing / refunds / reporting / API layer                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │                  tally-engine (THIS CRATE)                      │    │
//! │  │                                                                 │    │
//! │  │   ┌────────────┐  ┌────────────┐  ┌─────────────────────────┐   │    │
//! │  │   │StockLedger │  │ CashLedger │  │ TransactionCoordinator  │   │    │
//! │  │   │  append +  │  │  append +  │  │  with_transaction(work) │   │    │
//! │  │   │  balances  │  │  shifts    │  │  all-or-nothing scopes  │   │    │
//! │  │   └────────────┘  └────────────┘  └─────────────────────────┘   │    │
//! │  │                                                                 │    │
//! │  │   ┌────────────┐  ┌──────────────┐  ┌───────────────────────┐   │    │
//! │  │   │ShiftManager│  │ Transfer     │  │ PurchaseInvoice       │   │    │
//! │  │   │ lifecycle  │  │ Workflow     │  │ Workflow              │   │    │
//! │  │   └────────────┘  └──────────────┘  └───────────────────────┘   │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │               SQLite (WAL, pooled, embedded migrations)         │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, [`pool::DbConfig`], and the [`pool::Engine`] handle
//! - [`coordinator`] - Transaction scopes and conflict retry
//! - [`stock`] / [`cash`] - The two append-only ledgers
//! - [`shift`] - Cashier shift lifecycle and reconciliation
//! - [`transfer`] - Inter-branch transfer workflow
//! - [`invoice`] - Supplier purchase-invoice workflow
//! - [`audit`] - Best-effort write-after audit trail
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Engine error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_engine::{DbConfig, Engine};
//! use tally_core::TenantConfig;
//!
//! let engine = Engine::new(DbConfig::new("./tally.db"), TenantConfig::new("t-1")).await?;
//!
//! // Simple operations manage their own scope:
//! let shift = engine.shifts().open_shift("branch-1", "user-1", opening).await?;
//!
//! // Composite operations share one scope and commit or roll back together:
//! engine.coordinator().with_transaction(|tx| Box::pin(async move {
//!     stock.record_movement(tx, sale_leg).await?;
//!     cash.record_movement(tx, payment_leg).await?;
//!     Ok(())
//! })).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod cash;
pub mod coordinator;
pub mod error;
pub mod invoice;
pub mod migrations;
pub mod pool;
pub mod shift;
pub mod stock;
pub mod transfer;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult, EngineError, EngineResult};
pub use pool::{DbConfig, Engine};

pub use audit::{AuditEvent, AuditLog, AuditRecord};
pub use cash::{CashLedger, CashMovement};
pub use coordinator::{retry_on_conflict, LedgerTx, TransactionCoordinator, TxFuture};
pub use invoice::{
    CreateInvoice, NewInvoiceItem, PurchaseInvoiceWorkflow, ReturnItem,
};
pub use shift::{KindTotal, ShiftManager, ShiftSummary, StaleShift, StalenessLevel};
pub use stock::{StockLedger, StockMovement};
pub use transfer::{CreateTransfer, TransferWorkflow};
