//! # Demo Day Seeder
//!
//! Populates a database with a sample trading day for development:
//! stock arrives on a supplier invoice, a cashier works a shift with sales
//! and an expense, some stock transfers to a second branch, and the shift
//! closes reconciled.
//!
//! ## Usage
//! ```bash
//! # Default database (./data/tally.db)
//! cargo run -p tally-engine --bin seed
//!
//! # Specify database path
//! cargo run -p tally-engine --bin seed -- --db ./tmp/demo.db
//! ```

use std::env;

use tally_core::{
    ActorContext, Money, MovementKind, PaymentMethod, Reference, ReferenceKind, TenantConfig,
    DEFAULT_TENANT_ID,
};
use tally_engine::{
    CashMovement, CreateInvoice, CreateTransfer, DbConfig, Engine, NewInvoiceItem, StockMovement,
};
use tracing::info;

const MAIN_BRANCH: &str = "branch-main";
const SECOND_BRANCH: &str = "branch-east";
const CASHIER: &str = "user-cashier";
const MANAGER: &str = "user-manager";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db_path = parse_db_path();
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tenant = TenantConfig::new(DEFAULT_TENANT_ID).tax_rate_bps(825);
    let engine = Engine::new(DbConfig::new(&db_path), tenant).await?;

    let manager = ActorContext::new(DEFAULT_TENANT_ID, MAIN_BRANCH, MANAGER);

    // Goods arrive: supplier invoice, confirmed into the stock ledger.
    let invoice = engine
        .invoices()
        .create_invoice(
            &manager,
            CreateInvoice {
                branch_id: MAIN_BRANCH.to_string(),
                supplier_id: "supplier-acme".to_string(),
                invoice_number: None,
                invoice_date: None,
                items: vec![
                    NewInvoiceItem {
                        product_id: "prod-cola".to_string(),
                        quantity: 48,
                        purchase_price: Money::from_cents(60),
                    },
                    NewInvoiceItem {
                        product_id: "prod-chips".to_string(),
                        quantity: 24,
                        purchase_price: Money::from_cents(110),
                    },
                ],
            },
        )
        .await?;
    let invoice = engine.invoices().confirm(&manager, &invoice.id).await?;
    info!(number = %invoice.invoice_number, total = %invoice.total, "Stock received");

    // First instalment to the supplier, by bank transfer.
    let invoice = engine
        .invoices()
        .add_payment(
            &manager,
            &invoice.id,
            Money::from_cents(3_000),
            PaymentMethod::BankTransfer,
            Some("SLIP-4471".to_string()),
        )
        .await?;
    info!(paid = %invoice.amount_paid, due = %invoice.amount_due, "Supplier instalment paid");

    // The cashier opens with a counted float.
    let shift = engine
        .shifts()
        .open_shift(MAIN_BRANCH, CASHIER, Money::from_cents(50_000))
        .await?;

    // A few cash sales: stock leg and cash leg share one scope each.
    let sales: &[(&str, i64, i64)] = &[
        ("prod-cola", 3, 450),
        ("prod-chips", 2, 500),
        ("prod-cola", 6, 900),
    ];
    for (order_no, (product, qty, price_cents)) in sales.iter().enumerate() {
        let order_id = format!("order-{}", order_no + 1);
        let stock = engine.stock();
        let cash = engine.cash();
        let stock_leg = StockMovement::new(
            MAIN_BRANCH,
            *product,
            MovementKind::Sale,
            -*qty,
            Reference::new(ReferenceKind::Order, &order_id),
            CASHIER,
        );
        let cash_leg = CashMovement::new(
            MAIN_BRANCH,
            MovementKind::Sale,
            Money::from_cents(*price_cents),
            Reference::new(ReferenceKind::Order, &order_id),
            CASHIER,
        );
        engine
            .coordinator()
            .with_transaction(move |tx| {
                Box::pin(async move {
                    stock.record_movement(tx, stock_leg).await?;
                    cash.record_movement(tx, cash_leg).await?;
                    Ok(())
                })
            })
            .await?;
    }

    // Petty cash out.
    engine
        .cash()
        .record(
            CashMovement::new(
                MAIN_BRANCH,
                MovementKind::Expense,
                Money::from_cents(-1_200),
                Reference::manual(),
                CASHIER,
            )
            .with_reason("window cleaner"),
        )
        .await?;

    // Some cola heads to the east branch.
    let transfer = engine
        .transfers()
        .create_transfer(
            &manager,
            CreateTransfer {
                from_branch_id: MAIN_BRANCH.to_string(),
                to_branch_id: SECOND_BRANCH.to_string(),
                product_id: "prod-cola".to_string(),
                quantity: 12,
                reason: Some("east branch restock".to_string()),
            },
        )
        .await?;
    engine.transfers().approve(&manager, &transfer.id).await?;
    engine.transfers().receive(&manager, &transfer.id).await?;
    info!(number = %transfer.transfer_number, "Transfer completed");

    // Count the drawer and close: 500.00 + 18.50 in sales - 12.00 expense.
    let closed = engine
        .shifts()
        .close_shift(&shift.id, CASHIER, Money::from_cents(50_650), None)
        .await?;
    info!(
        expected = %closed.expected_balance.unwrap_or_default(),
        difference = %closed.difference.unwrap_or_default(),
        "Shift closed"
    );

    let summary = engine.shifts().summary(&shift.id).await?;
    for kind_total in &summary.totals {
        info!(
            kind = kind_total.kind.as_str(),
            total = %kind_total.total,
            count = kind_total.count,
            "Shift activity"
        );
    }

    info!(
        cola_main = engine
            .stock()
            .current_balance(MAIN_BRANCH, "prod-cola")
            .await?,
        cola_east = engine
            .stock()
            .current_balance(SECOND_BRANCH, "prod-cola")
            .await?,
        register = %engine.cash().current_balance(MAIN_BRANCH).await?,
        "Seed complete"
    );

    Ok(())
}

/// Parses `--db <path>` from the command line.
fn parse_db_path() -> String {
    let args: Vec<String> = env::args().collect();
    for window in args.windows(2) {
        if window[0] == "--db" {
            return window[1].clone();
        }
    }
    "./data/tally.db".to_string()
}
