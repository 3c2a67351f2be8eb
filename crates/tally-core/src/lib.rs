//! # tally-core: Pure Business Logic for Tally POS
//!
//! This crate is the **heart** of the Tally POS ledger engine. It contains
//! all business rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Tally POS Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐    │
//! │  │        Order processing / refunds / reporting / API layer       │    │
//! │  │                      (outside this workspace)                   │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │                 tally-engine (Ledger Engine)                    │    │
//! │  │   StockLedger · CashLedger · ShiftManager · Transfers ·         │    │
//! │  │   PurchaseInvoices · TransactionCoordinator · Audit             │    │
//! │  └─────────────────────────────┬───────────────────────────────────┘    │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐    │
//! │  │               ★ tally-core (THIS CRATE) ★                       │    │
//! │  │                                                                 │    │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐    │    │
//! │  │   │   types   │  │   money   │  │   chain   │  │ validation│    │    │
//! │  │   │LedgerEntry│  │   Money   │  │ balances  │  │   rules   │    │    │
//! │  │   │   Shift   │  │  TaxCalc  │  │   signs   │  │  checks   │    │    │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘    │    │
//! │  │                                                                 │    │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS            │    │
//! │  └─────────────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (LedgerEntry, Shift, InventoryTransfer, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`chain`] - Balance-chain math and movement direction rules
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - same input = same output
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Integer Money**: All monetary values are in cents (i64) to avoid float errors
//! 4. **Explicit Errors**: All errors are typed, never strings or panics
//! 5. **Closed Enums**: Movement kinds and statuses are closed sets with
//!    exhaustive matches, never open-ended subclassing

// =============================================================================
// Module Declarations
// =============================================================================

pub mod chain;
pub mod error;
pub mod money;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use tally_core::Money` instead of
// `use tally_core::money::Money`

pub use error::{CoreResult, LedgerError, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default tenant ID for single-tenant deployments.
///
/// The schema carries tenant_id everywhere for multi-tenant partitioning,
/// but a single-register install has no tenant directory to resolve against.
pub const DEFAULT_TENANT_ID: &str = "00000000-0000-0000-0000-000000000001";

/// Maximum absolute delta of a single ledger movement (quantity or cents).
///
/// ## Business Reason
/// Catches fat-finger entries (e.g. scanning a barcode into the quantity
/// field) before they poison a balance chain.
pub const MAX_MOVEMENT_QUANTITY: i64 = 1_000_000_000;

/// Maximum length of a free-text reason on manual movements.
pub const MAX_REASON_LEN: usize = 500;
