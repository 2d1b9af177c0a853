//! # Register Repository
//!
//! Database operations for cash registers.
//!
//! ## Register Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Register Lifecycle                                 │
//! │                                                                         │
//! │  1. OPEN                                                               │
//! │     └── open() → INSERT, partial unique index rejects a 2nd open       │
//! │                                                                         │
//! │  2. SELL (SaleRepository)                                              │
//! │     └── record() / void() → version = version + 1                      │
//! │                                                                         │
//! │  3. CLOSE                                                              │
//! │     └── close() → UPDATE ... WHERE status = 'open' AND version = ?     │
//! │                                                                         │
//! │  4. (OPTIONAL) DELETE / ANNOTATE                                       │
//! │     └── delete_closed() → only status = 'closed'                       │
//! │     └── update_notes()  → allowed in any state                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `total_sales_cents` is never stored: every SELECT aggregates the
//! non-voided rows of `register_sales`.

use chrono::{DateTime, Utc};
use sqlx::{Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use caja_core::{
    CashRegister, OpenRegisterRequest, PaymentBreakdown, RegisterHistoryQuery, RegisterStatus,
};

use crate::error::{DbError, DbResult};
use crate::repository::sale::fetch_breakdown;

/// Register columns plus the pulled sales total.
macro_rules! register_select {
    () => {
        r#"
        SELECT
            r.id,
            r.branch_id,
            r.status,
            r.opening_float_cents,
            COALESCE((
                SELECT SUM(s.amount_cents)
                FROM register_sales s
                WHERE s.register_id = r.id AND s.status = 'completed'
            ), 0) AS total_sales_cents,
            r.expected_cash_cents,
            r.final_count_cents,
            r.variance_cents,
            r.opened_by_user_id,
            r.closed_by_user_id,
            r.notes,
            r.opened_at,
            r.closed_at,
            r.version
        FROM cash_registers r
        "#
    };
}

#[derive(Debug, sqlx::FromRow)]
struct RegisterRow {
    id: String,
    branch_id: String,
    status: RegisterStatus,
    opening_float_cents: i64,
    total_sales_cents: i64,
    expected_cash_cents: Option<i64>,
    final_count_cents: Option<i64>,
    variance_cents: Option<i64>,
    opened_by_user_id: String,
    closed_by_user_id: Option<String>,
    notes: Option<String>,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    version: i64,
}

impl From<RegisterRow> for CashRegister {
    fn from(row: RegisterRow) -> Self {
        CashRegister {
            id: row.id,
            branch_id: row.branch_id,
            status: row.status,
            opening_float_cents: row.opening_float_cents,
            total_sales_cents: row.total_sales_cents,
            expected_cash_cents: row.expected_cash_cents,
            final_count_cents: row.final_count_cents,
            variance_cents: row.variance_cents,
            opened_by_user_id: row.opened_by_user_id,
            closed_by_user_id: row.closed_by_user_id,
            notes: row.notes,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            version: row.version,
        }
    }
}

/// Values frozen onto a register when it closes.
///
/// `expected_version` is the version the caller computed the figures from;
/// the update only applies if the row still carries it.
#[derive(Debug, Clone)]
pub struct RegisterCloseUpdate {
    pub register_id: String,
    pub expected_version: i64,
    pub expected_cash_cents: i64,
    pub final_count_cents: i64,
    pub variance_cents: i64,
    pub closed_by_user_id: String,
    pub notes: Option<String>,
}

/// Fetches one register by id on any executor (pool or open transaction).
pub(crate) async fn fetch_register<'e, E>(executor: E, id: &str) -> DbResult<Option<CashRegister>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<RegisterRow> = sqlx::query_as(concat!(register_select!(), " WHERE r.id = ?1"))
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(row.map(CashRegister::from))
}

/// Repository for cash register database operations.
#[derive(Debug, Clone)]
pub struct RegisterRepository {
    pool: SqlitePool,
}

impl RegisterRepository {
    /// Creates a new RegisterRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RegisterRepository { pool }
    }

    /// Opens a new register for a branch.
    ///
    /// ## Errors
    /// * `DbError::UniqueViolation` - the branch already has an open register
    pub async fn open(&self, req: &OpenRegisterRequest) -> DbResult<CashRegister> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        debug!(id = %id, branch_id = %req.branch_id, "Inserting register");

        sqlx::query(
            r#"
            INSERT INTO cash_registers (
                id, branch_id, status, opening_float_cents,
                opened_by_user_id, notes, opened_at, version
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
            "#,
        )
        .bind(&id)
        .bind(&req.branch_id)
        .bind(RegisterStatus::Open)
        .bind(req.opening_float_cents)
        .bind(&req.opened_by_user_id)
        .bind(req.notes.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, &req.branch_id),
            other => other,
        })?;

        Ok(CashRegister {
            id,
            branch_id: req.branch_id.clone(),
            status: RegisterStatus::Open,
            opening_float_cents: req.opening_float_cents,
            total_sales_cents: 0,
            expected_cash_cents: None,
            final_count_cents: None,
            variance_cents: None,
            opened_by_user_id: req.opened_by_user_id.clone(),
            closed_by_user_id: None,
            notes: req.notes.clone(),
            opened_at: now,
            closed_at: None,
            version: 1,
        })
    }

    /// Gets a register by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CashRegister>> {
        fetch_register(&self.pool, id).await
    }

    /// Gets the open register of a branch, if any.
    pub async fn get_open_for_branch(&self, branch_id: &str) -> DbResult<Option<CashRegister>> {
        let row: Option<RegisterRow> = sqlx::query_as(concat!(
            register_select!(),
            " WHERE r.branch_id = ?1 AND r.status = 'open'"
        ))
        .bind(branch_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(CashRegister::from))
    }

    /// Reads a register and its per-method breakdown from one snapshot.
    pub async fn get_with_breakdown(
        &self,
        id: &str,
    ) -> DbResult<Option<(CashRegister, Vec<PaymentBreakdown>)>> {
        let mut tx = self.pool.begin().await?;

        let Some(register) = fetch_register(&mut *tx, id).await? else {
            return Ok(None);
        };
        let breakdown = fetch_breakdown(&mut *tx, id).await?;

        tx.commit().await?;
        Ok(Some((register, breakdown)))
    }

    /// Closes a register with compare-and-swap on its version.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no such register
    /// * `DbError::InvalidState` - already closed
    /// * `DbError::VersionConflict` - still open but changed since `expected_version`
    pub async fn close(&self, update: &RegisterCloseUpdate) -> DbResult<CashRegister> {
        let now = Utc::now();

        debug!(
            id = %update.register_id,
            expected_version = update.expected_version,
            "Closing register"
        );

        let result = sqlx::query(
            r#"
            UPDATE cash_registers SET
                status = 'closed',
                expected_cash_cents = ?3,
                final_count_cents = ?4,
                variance_cents = ?5,
                closed_by_user_id = ?6,
                notes = COALESCE(?7, notes),
                closed_at = ?8,
                version = version + 1
            WHERE id = ?1 AND status = 'open' AND version = ?2
            "#,
        )
        .bind(&update.register_id)
        .bind(update.expected_version)
        .bind(update.expected_cash_cents)
        .bind(update.final_count_cents)
        .bind(update.variance_cents)
        .bind(&update.closed_by_user_id)
        .bind(update.notes.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get_by_id(&update.register_id).await? {
                None => DbError::not_found("Register", &update.register_id),
                Some(r) if r.is_closed() => {
                    DbError::invalid_state("Register", &update.register_id, "closed")
                }
                Some(_) => DbError::VersionConflict {
                    id: update.register_id.clone(),
                    expected_version: update.expected_version,
                },
            });
        }

        self.get_by_id(&update.register_id)
            .await?
            .ok_or_else(|| DbError::not_found("Register", &update.register_id))
    }

    /// Lists closed registers of a branch, newest first.
    ///
    /// ## Returns
    /// `(items, total)` where `total` counts every matching row.
    pub async fn list_closed(&self, query: &RegisterHistoryQuery) -> DbResult<(Vec<CashRegister>, u64)> {
        let limit = i64::from(query.limit);
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

        let rows: Vec<RegisterRow> = sqlx::query_as(concat!(
            register_select!(),
            r#"
            WHERE r.branch_id = ?1
              AND r.status = 'closed'
              AND (?2 IS NULL OR r.closed_at >= ?2)
              AND (?3 IS NULL OR r.closed_at <= ?3)
            ORDER BY r.closed_at DESC, r.id DESC
            LIMIT ?4 OFFSET ?5
            "#
        ))
        .bind(&query.branch_id)
        .bind(query.date_from)
        .bind(query.date_to)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM cash_registers r
            WHERE r.branch_id = ?1
              AND r.status = 'closed'
              AND (?2 IS NULL OR r.closed_at >= ?2)
              AND (?3 IS NULL OR r.closed_at <= ?3)
            "#,
        )
        .bind(&query.branch_id)
        .bind(query.date_from)
        .bind(query.date_to)
        .fetch_one(&self.pool)
        .await?;

        Ok((
            rows.into_iter().map(CashRegister::from).collect(),
            u64::try_from(total).unwrap_or(0),
        ))
    }

    /// Deletes a closed register and its sales.
    ///
    /// ## Errors
    /// * `DbError::NotFound` - no such register
    /// * `DbError::InvalidState` - register is still open
    pub async fn delete_closed(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM cash_registers WHERE id = ?1 AND status = 'closed'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(match self.get_by_id(id).await? {
                None => DbError::not_found("Register", id),
                Some(r) => DbError::invalid_state("Register", id, r.status.to_string()),
            });
        }

        debug!(id = %id, "Register deleted");
        Ok(())
    }

    /// Replaces the notes of a register (open or closed).
    pub async fn update_notes(&self, id: &str, notes: Option<&str>) -> DbResult<CashRegister> {
        let result = sqlx::query(
            "UPDATE cash_registers SET notes = ?2, version = version + 1 WHERE id = ?1",
        )
        .bind(id)
        .bind(notes)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Register", id));
        }

        self.get_by_id(id)
            .await?
            .ok_or_else(|| DbError::not_found("Register", id))
    }

    /// Counts registers of a branch (any status).
    pub async fn count_for_branch(&self, branch_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cash_registers WHERE branch_id = ?1")
            .bind(branch_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use caja_core::{PaymentMethod, RecordSaleRequest};

    async fn db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn open_req(branch: &str, float: i64) -> OpenRegisterRequest {
        OpenRegisterRequest {
            branch_id: branch.to_string(),
            opening_float_cents: float,
            opened_by_user_id: "user-1".to_string(),
            notes: None,
        }
    }

    fn close_update(reg: &CashRegister, final_count: i64) -> RegisterCloseUpdate {
        let expected = reg.opening_float_cents + reg.total_sales_cents;
        RegisterCloseUpdate {
            register_id: reg.id.clone(),
            expected_version: reg.version,
            expected_cash_cents: expected,
            final_count_cents: final_count,
            variance_cents: final_count - expected,
            closed_by_user_id: "user-2".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_second_open_for_branch_is_rejected() {
        let db = db().await;
        let repo = db.registers();

        repo.open(&open_req("B1", 10000)).await.unwrap();
        let err = repo.open(&open_req("B1", 5000)).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Other branches are independent.
        repo.open(&open_req("B2", 0)).await.unwrap();
        assert_eq!(repo.count_for_branch("B1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_totals_are_pulled_from_sales() {
        let db = db().await;
        let reg = db.registers().open(&open_req("B1", 10000)).await.unwrap();

        for amount in [15000, 10000] {
            db.sales()
                .record(&RecordSaleRequest {
                    register_id: reg.id.clone(),
                    amount_cents: amount,
                    payment_method: PaymentMethod::Cash,
                    reference: None,
                })
                .await
                .unwrap();
        }

        let fresh = db.registers().get_open_for_branch("B1").await.unwrap().unwrap();
        assert_eq!(fresh.total_sales_cents, 25000);
        assert_eq!(fresh.version, 3);
    }

    #[tokio::test]
    async fn test_close_is_compare_and_swap() {
        let db = db().await;
        let repo = db.registers();
        let reg = repo.open(&open_req("B1", 10000)).await.unwrap();

        let mut stale = close_update(&reg, 10000);
        stale.expected_version = reg.version + 5;
        assert!(matches!(
            repo.close(&stale).await,
            Err(DbError::VersionConflict { .. })
        ));

        let closed = repo.close(&close_update(&reg, 9000)).await.unwrap();
        assert_eq!(closed.status, RegisterStatus::Closed);
        assert_eq!(closed.expected_cash_cents, Some(10000));
        assert_eq!(closed.variance_cents, Some(-1000));
        assert!(closed.closed_at.is_some());

        // Second close hits the closed row, not a version mismatch.
        assert!(matches!(
            repo.close(&close_update(&reg, 9000)).await,
            Err(DbError::InvalidState { .. })
        ));

        // Branch can open again once closed.
        repo.open(&open_req("B1", 0)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_only_closed() {
        let db = db().await;
        let repo = db.registers();
        let reg = repo.open(&open_req("B1", 0)).await.unwrap();

        assert!(matches!(
            repo.delete_closed(&reg.id).await,
            Err(DbError::InvalidState { .. })
        ));
        assert!(matches!(
            repo.delete_closed("missing").await,
            Err(DbError::NotFound { .. })
        ));

        repo.close(&close_update(&reg, 0)).await.unwrap();
        repo.delete_closed(&reg.id).await.unwrap();
        assert!(repo.get_by_id(&reg.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_history_paging() {
        let db = db().await;
        let repo = db.registers();

        for _ in 0..3 {
            let reg = repo.open(&open_req("B1", 100)).await.unwrap();
            repo.close(&close_update(&reg, 100)).await.unwrap();
        }
        // Open register never shows in history.
        repo.open(&open_req("B1", 100)).await.unwrap();

        let mut query = RegisterHistoryQuery::first_page("B1");
        query.limit = 2;
        let (items, total) = repo.list_closed(&query).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(items.len(), 2);
        assert!(items[0].closed_at >= items[1].closed_at);

        query.page = 2;
        let (items, _) = repo.list_closed(&query).await.unwrap();
        assert_eq!(items.len(), 1);

        query.page = 1;
        query.date_to = Some(Utc::now() - chrono::Duration::days(1));
        let (items, total) = repo.list_closed(&query).await.unwrap();
        assert!(items.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_update_notes_on_closed_register() {
        let db = db().await;
        let repo = db.registers();
        let reg = repo.open(&open_req("B1", 0)).await.unwrap();
        let closed = repo.close(&close_update(&reg, 0)).await.unwrap();

        let annotated = repo.update_notes(&reg.id, Some("recount ok")).await.unwrap();
        assert_eq!(annotated.notes.as_deref(), Some("recount ok"));
        assert_eq!(annotated.variance_cents, closed.variance_cents);
        assert!(annotated.version > closed.version);
    }
}
