//! # Database Pool Management
//!
//! Connection pool creation and the top-level [`Engine`] handle.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Engine Startup                                     │
//! │                                                                         │
//! │  DbConfig::new(path) ← Configure pool settings                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Engine::new(config, tenant).await ← Create pool + run migrations       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────┐                            │
//! │  │            SqlitePool                   │                            │
//! │  │  ┌─────┐ ┌─────┐ ┌─────┐ ┌─────┐        │  (max_connections)         │
//! │  │  │Conn1│ │Conn2│ │Conn3│ │Conn4│ ...    │                            │
//! │  │  └─────┘ └─────┘ └─────┘ └─────┘        │                            │
//! │  └─────────────────────────────────────────┘                            │
//! │       │                                                                 │
//! │       │ Concurrent request handlers                                     │
//! │       ▼                                                                 │
//! │  engine.stock() / engine.cash() / engine.shifts() / ...                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL (Write-Ahead Logging) mode is enabled for:
//! - Better concurrent read performance
//! - Readers don't block writers
//! - Better crash recovery

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::audit::AuditLog;
use crate::cash::CashLedger;
use crate::coordinator::TransactionCoordinator;
use crate::error::{DbError, DbResult};
use crate::invoice::PurchaseInvoiceWorkflow;
use crate::migrations;
use crate::shift::ShiftManager;
use crate::stock::StockLedger;
use crate::transfer::TransferWorkflow;
use tally_core::TenantConfig;

// =============================================================================
// Configuration
// =============================================================================

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/path/to/tally.db")
///     .max_connections(5)
///     .min_connections(1);
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5 (sufficient for a single branch service)
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection timeout duration.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    /// The file is created if it doesn't exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            run_migrations: true,
        }
    }

    /// Sets the maximum number of connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Sets the minimum number of connections.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Sets the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets whether to run migrations on connect.
    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// ## Usage
    /// ```rust,ignore
    /// let engine = Engine::new(DbConfig::in_memory(), TenantConfig::new("t-1")).await?;
    /// // Database is isolated, perfect for tests
    /// ```
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Main engine handle providing access to ledgers, workflows, and the
/// transaction coordinator.
///
/// Cheap to clone: all accessors hand out lightweight values over the shared
/// pool, so request handlers grab what they need per call.
///
/// ## Usage
/// ```rust,ignore
/// let engine = Engine::new(DbConfig::new("./tally.db"), tenant).await?;
///
/// let shift = engine.shifts().open_shift("branch-1", "user-1", opening).await?;
/// let balance = engine.stock().current_balance("branch-1", "prod-1").await?;
/// ```
#[derive(Debug, Clone)]
pub struct Engine {
    /// The SQLite connection pool.
    pool: SqlitePool,
    /// Policy knobs for the tenant this engine instance serves.
    tenant: TenantConfig,
}

impl Engine {
    /// Creates a new engine over a pooled SQLite database.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite for ledger workloads:
    ///    - WAL mode for concurrent reads
    ///    - NORMAL synchronous (balance of safety/speed)
    ///    - Foreign keys enabled
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig, tenant: TenantConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            tenant = %tenant.tenant_id,
            "Initializing ledger engine"
        );

        // sqlite://path with mode=rwc creates the file if not exists
        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            // WAL mode: readers don't block writers, writers don't block readers
            .journal_mode(SqliteJournalMode::Wal)
            // NORMAL synchronous: safe from corruption, may lose last
            // transaction on power loss
            .synchronous(SqliteSynchronous::Normal)
            // SQLite ships with foreign keys off for backwards compatibility
            .foreign_keys(true)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let engine = Engine { pool, tenant };

        if config.run_migrations {
            engine.run_migrations().await?;
        }

        Ok(engine)
    }

    /// Runs database migrations. Idempotent; called by `new()` unless
    /// disabled in config.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    ///
    /// For advanced queries not covered by the engine surface. Prefer the
    /// typed accessors when available.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// The tenant policy this engine enforces.
    pub fn tenant(&self) -> &TenantConfig {
        &self.tenant
    }

    /// Returns the transaction coordinator for composite operations.
    pub fn coordinator(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(self.pool.clone())
    }

    /// Returns the stock ledger.
    pub fn stock(&self) -> StockLedger {
        StockLedger::new(self.pool.clone(), self.tenant.clone())
    }

    /// Returns the cash ledger.
    pub fn cash(&self) -> CashLedger {
        CashLedger::new(self.pool.clone(), self.tenant.clone())
    }

    /// Returns the shift manager.
    pub fn shifts(&self) -> ShiftManager {
        ShiftManager::new(self.pool.clone(), self.tenant.clone())
    }

    /// Returns the inter-branch transfer workflow.
    pub fn transfers(&self) -> TransferWorkflow {
        TransferWorkflow::new(self.pool.clone(), self.tenant.clone())
    }

    /// Returns the supplier purchase-invoice workflow.
    pub fn invoices(&self) -> PurchaseInvoiceWorkflow {
        PurchaseInvoiceWorkflow::new(self.pool.clone(), self.tenant.clone())
    }

    /// Returns the best-effort audit trail.
    pub fn audit(&self) -> AuditLog {
        AuditLog::new(self.pool.clone())
    }

    /// Closes the database connection pool.
    ///
    /// After calling close, all engine operations will fail.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
