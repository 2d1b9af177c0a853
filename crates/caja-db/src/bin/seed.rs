//! # Seed Data Generator
//!
//! Populates a development database with registers and sales.
//!
//! ## Usage
//! ```bash
//! # Three branches, 20 sales each (default)
//! cargo run -p caja-db --bin seed
//!
//! # Custom amounts
//! cargo run -p caja-db --bin seed -- --branches 5 --sales 50
//!
//! # Specify database path
//! cargo run -p caja-db --bin seed -- --db ./data/caja.db
//! ```
//!
//! ## Generated Data
//! For every branch `BR-001`, `BR-002`, ...:
//! - one closed register from "yesterday" with a small variance
//! - one open register with `--sales` sales spread across payment methods
//!
//! Branches that already have registers are skipped.

use std::env;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use caja_core::{OpenRegisterRequest, PaymentMethod, RecordSaleRequest};
use caja_db::{Database, DbConfig, RegisterCloseUpdate};

/// Opening floats in cents, picked per branch.
const OPENING_FLOATS: &[i64] = &[5_000, 10_000, 15_000, 20_000];

/// Variances applied to the seeded closed register (cents).
const VARIANCES: &[i64] = &[0, -500, 250, -1_000, 0];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,caja=debug,sqlx=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();

    let mut branches: usize = 3;
    let mut sales_per_branch: usize = 20;
    let mut db_path = String::from("./caja_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--branches" | "-b" => {
                if i + 1 < args.len() {
                    branches = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--sales" | "-s" => {
                if i + 1 < args.len() {
                    sales_per_branch = args[i + 1].parse().unwrap_or(20);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Caja Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -b, --branches <N>  Number of branches to seed (default: 3)");
                println!("  -s, --sales <N>     Sales on each open register (default: 20)");
                println!("  -d, --db <PATH>     Database file path (default: ./caja_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, branches, sales_per_branch, "Seeding database");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    for branch_idx in 0..branches {
        let branch_id = format!("BR-{:03}", branch_idx + 1);

        if db.registers().count_for_branch(&branch_id).await? > 0 {
            warn!(branch_id = %branch_id, "Branch already has registers, skipping");
            continue;
        }

        seed_closed_register(&db, &branch_id, branch_idx).await?;
        seed_open_register(&db, &branch_id, branch_idx, sales_per_branch).await?;
    }

    info!("Seed complete");
    db.close().await;
    Ok(())
}

/// Opens, sells and closes one register so history has an entry.
async fn seed_closed_register(
    db: &Database,
    branch_id: &str,
    seed: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let register = db
        .registers()
        .open(&OpenRegisterRequest {
            branch_id: branch_id.to_string(),
            opening_float_cents: OPENING_FLOATS[seed % OPENING_FLOATS.len()],
            opened_by_user_id: "seed-cashier".to_string(),
            notes: Some("Seeded shift".to_string()),
        })
        .await?;

    for n in 0..5 {
        db.sales().record(&sale_request(&register.id, seed * 100 + n)).await?;
    }

    let fresh = db
        .registers()
        .get_by_id(&register.id)
        .await?
        .ok_or("seeded register disappeared")?;

    let expected = fresh.opening_float_cents + fresh.total_sales_cents;
    let variance = VARIANCES[seed % VARIANCES.len()];
    let final_count = (expected + variance).max(0);

    let closed = db
        .registers()
        .close(&RegisterCloseUpdate {
            register_id: fresh.id.clone(),
            expected_version: fresh.version,
            expected_cash_cents: expected,
            final_count_cents: final_count,
            variance_cents: final_count - expected,
            closed_by_user_id: "seed-supervisor".to_string(),
            notes: None,
        })
        .await?;

    info!(
        branch_id = %branch_id,
        register_id = %closed.id,
        variance = ?closed.variance_cents,
        "Seeded closed register"
    );
    Ok(())
}

/// Opens the branch's current register and records sample sales.
async fn seed_open_register(
    db: &Database,
    branch_id: &str,
    seed: usize,
    sales: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let register = db
        .registers()
        .open(&OpenRegisterRequest {
            branch_id: branch_id.to_string(),
            opening_float_cents: OPENING_FLOATS[(seed + 1) % OPENING_FLOATS.len()],
            opened_by_user_id: "seed-cashier".to_string(),
            notes: None,
        })
        .await?;

    for n in 0..sales {
        if let Err(e) = db.sales().record(&sale_request(&register.id, seed * 1000 + n)).await {
            warn!(register_id = %register.id, error = %e, "Failed to record seed sale");
        }
    }

    info!(branch_id = %branch_id, register_id = %register.id, sales, "Seeded open register");
    Ok(())
}

/// Deterministic sale: $1.99 - $49.99 across all payment methods.
fn sale_request(register_id: &str, seed: usize) -> RecordSaleRequest {
    let amount_cents = 199 + ((seed * 37) % 4_800) as i64;
    let payment_method = PaymentMethod::ALL[seed % PaymentMethod::ALL.len()];

    RecordSaleRequest {
        register_id: register_id.to_string(),
        amount_cents,
        payment_method,
        reference: Some(format!("T-{:06}", seed)),
    }
}
