//! # Register Sale Repository
//!
//! Sales recorded against a register.
//!
//! ```text
//! record() ── tx ──► bump register version (only if open) ──► INSERT sale
//! void()   ── tx ──► bump register version (only if open) ──► mark sale voided
//! ```
//!
//! Bumping the version first takes SQLite's write lock before anything is
//! read, so a concurrent close sees either the sale or a newer version. The
//! running total is read under that lock, so the `MAX_AMOUNT_CENTS` check
//! cannot race another sale.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use caja_core::validation::validate_register_total;
use caja_core::{PaymentBreakdown, PaymentMethod, RecordSaleRequest, RegisterSale, SaleStatus};

use crate::error::{DbError, DbResult};
use crate::repository::register::fetch_register;

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    register_id: String,
    amount_cents: i64,
    payment_method: PaymentMethod,
    status: SaleStatus,
    reference: Option<String>,
    recorded_at: DateTime<Utc>,
    voided_at: Option<DateTime<Utc>>,
}

impl From<SaleRow> for RegisterSale {
    fn from(row: SaleRow) -> Self {
        RegisterSale {
            id: row.id,
            register_id: row.register_id,
            amount_cents: row.amount_cents,
            payment_method: row.payment_method,
            status: row.status,
            reference: row.reference,
            recorded_at: row.recorded_at,
            voided_at: row.voided_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BreakdownRow {
    payment_method: PaymentMethod,
    total_cents: i64,
    count: i64,
}

/// Per-method totals of the non-voided sales of a register.
pub(crate) async fn fetch_breakdown<'e, E>(
    executor: E,
    register_id: &str,
) -> DbResult<Vec<PaymentBreakdown>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<BreakdownRow> = sqlx::query_as(
        r#"
        SELECT
            payment_method,
            SUM(amount_cents) AS total_cents,
            COUNT(*) AS count
        FROM register_sales
        WHERE register_id = ?1 AND status = 'completed'
        GROUP BY payment_method
        "#,
    )
    .bind(register_id)
    .fetch_all(executor)
    .await?;

    let mut breakdown: Vec<PaymentBreakdown> = rows
        .into_iter()
        .map(|row| PaymentBreakdown {
            method: row.payment_method,
            total_cents: row.total_cents,
            count: row.count,
        })
        .collect();
    breakdown.sort_by_key(|b| b.method);

    Ok(breakdown)
}

/// Repository for register sale operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Records a sale against an open register.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no such register
    /// * `DbError::InvalidState` - register is closed
    /// * `DbError::Rejected` - the sale would push the total past `MAX_AMOUNT_CENTS`
    pub async fn record(&self, req: &RecordSaleRequest) -> DbResult<RegisterSale> {
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE cash_registers SET version = version + 1 WHERE id = ?1 AND status = 'open'",
        )
        .bind(&req.register_id)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(match fetch_register(&mut *tx, &req.register_id).await? {
                None => DbError::not_found("Register", &req.register_id),
                Some(r) => DbError::invalid_state("Register", &req.register_id, r.status.to_string()),
            });
        }

        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount_cents), 0) FROM register_sales WHERE register_id = ?1 AND status = 'completed'",
        )
        .bind(&req.register_id)
        .fetch_one(&mut *tx)
        .await?;
        // Dropping the transaction rolls the version bump back.
        validate_register_total(total, req.amount_cents)?;

        let sale = RegisterSale {
            id: Uuid::new_v4().to_string(),
            register_id: req.register_id.clone(),
            amount_cents: req.amount_cents,
            payment_method: req.payment_method,
            status: SaleStatus::Completed,
            reference: req.reference.clone(),
            recorded_at: Utc::now(),
            voided_at: None,
        };

        debug!(
            sale_id = %sale.id,
            register_id = %sale.register_id,
            amount = sale.amount_cents,
            "Recording register sale"
        );

        sqlx::query(
            r#"
            INSERT INTO register_sales (
                id, register_id, amount_cents, payment_method,
                status, reference, recorded_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.register_id)
        .bind(sale.amount_cents)
        .bind(sale.payment_method)
        .bind(sale.status)
        .bind(sale.reference.as_deref())
        .bind(sale.recorded_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sale)
    }

    /// Voids a sale of an open register.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - register missing, or sale not part of it
    /// * `DbError::InvalidState` - register closed, or sale already voided
    pub async fn void(&self, register_id: &str, sale_id: &str) -> DbResult<RegisterSale> {
        let mut tx = self.pool.begin().await?;

        let bumped = sqlx::query(
            "UPDATE cash_registers SET version = version + 1 WHERE id = ?1 AND status = 'open'",
        )
        .bind(register_id)
        .execute(&mut *tx)
        .await?;

        if bumped.rows_affected() == 0 {
            return Err(match fetch_register(&mut *tx, register_id).await? {
                None => DbError::not_found("Register", register_id),
                Some(r) => DbError::invalid_state("Register", register_id, r.status.to_string()),
            });
        }

        let now = Utc::now();
        let voided = sqlx::query(
            r#"
            UPDATE register_sales SET
                status = 'voided',
                voided_at = ?3
            WHERE id = ?1 AND register_id = ?2 AND status = 'completed'
            "#,
        )
        .bind(sale_id)
        .bind(register_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if voided.rows_affected() == 0 {
            let existing = fetch_sale(&mut *tx, sale_id).await?;
            return Err(match existing {
                Some(sale) if sale.register_id == register_id && sale.is_voided() => {
                    DbError::invalid_state("Sale", sale_id, "voided")
                }
                _ => DbError::not_found("Sale", sale_id),
            });
        }

        let sale = fetch_sale(&mut *tx, sale_id)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", sale_id))?;

        tx.commit().await?;

        debug!(sale_id = %sale_id, register_id = %register_id, "Register sale voided");
        Ok(sale)
    }

    /// Lists every sale of a register (voided included), oldest first.
    pub async fn list_for_register(&self, register_id: &str) -> DbResult<Vec<RegisterSale>> {
        let rows: Vec<SaleRow> = sqlx::query_as(
            r#"
            SELECT id, register_id, amount_cents, payment_method,
                   status, reference, recorded_at, voided_at
            FROM register_sales
            WHERE register_id = ?1
            ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .bind(register_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(RegisterSale::from).collect())
    }

    /// Per-method totals of the non-voided sales of a register.
    pub async fn breakdown(&self, register_id: &str) -> DbResult<Vec<PaymentBreakdown>> {
        fetch_breakdown(&self.pool, register_id).await
    }
}

async fn fetch_sale<'e, E>(executor: E, sale_id: &str) -> DbResult<Option<RegisterSale>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<SaleRow> = sqlx::query_as(
        r#"
        SELECT id, register_id, amount_cents, payment_method,
               status, reference, recorded_at, voided_at
        FROM register_sales
        WHERE id = ?1
        "#,
    )
    .bind(sale_id)
    .fetch_optional(executor)
    .await?;

    Ok(row.map(RegisterSale::from))
}

// =============================================================================
// Unit Tests
// =============================================================================
