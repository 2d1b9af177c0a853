//! SQLite-backed [`RegisterStore`] over [`caja_db::Database`].

use async_trait::async_trait;

use caja_core::reconciliation::summarize;
use caja_core::{
    CashRegister, OpenRegisterRequest, Page, RecordSaleRequest, RegisterHistoryQuery,
    RegisterSale, RegisterSummary,
};
use caja_db::{Database, RegisterCloseUpdate};

use super::{CloseSubmission, RegisterStore, StoreError, StoreResult};

/// Register store persisted in the local SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteRegisterStore {
    db: Database,
}

impl SqliteRegisterStore {
    pub fn new(db: Database) -> Self {
        SqliteRegisterStore { db }
    }
}

#[async_trait]
impl RegisterStore for SqliteRegisterStore {
    async fn open_register(&self, req: &OpenRegisterRequest) -> StoreResult<CashRegister> {
        Ok(self.db.registers().open(req).await?)
    }

    async fn get_active_register(&self, branch_id: &str) -> StoreResult<Option<CashRegister>> {
        Ok(self.db.registers().get_open_for_branch(branch_id).await?)
    }

    async fn get_register(&self, register_id: &str) -> StoreResult<Option<CashRegister>> {
        Ok(self.db.registers().get_by_id(register_id).await?)
    }

    async fn get_register_summary(&self, register_id: &str) -> StoreResult<RegisterSummary> {
        let (register, breakdown) = self
            .db
            .registers()
            .get_with_breakdown(register_id)
            .await?
            .ok_or_else(|| StoreError::not_found("Register", register_id))?;

        Ok(summarize(&register, breakdown)?)
    }

    async fn record_sale(&self, req: &RecordSaleRequest) -> StoreResult<RegisterSale> {
        Ok(self.db.sales().record(req).await?)
    }

    async fn void_sale(&self, register_id: &str, sale_id: &str) -> StoreResult<RegisterSale> {
        Ok(self.db.sales().void(register_id, sale_id).await?)
    }

    async fn list_sales(&self, register_id: &str) -> StoreResult<Vec<RegisterSale>> {
        Ok(self.db.sales().list_for_register(register_id).await?)
    }

    async fn close_register(&self, close: &CloseSubmission) -> StoreResult<CashRegister> {
        let update = RegisterCloseUpdate {
            register_id: close.register_id.clone(),
            expected_version: close.expected_version,
            expected_cash_cents: close.reconciliation.expected_cash.cents(),
            final_count_cents: close.reconciliation.final_count.cents(),
            variance_cents: close.reconciliation.variance.cents(),
            closed_by_user_id: close.closed_by_user_id.clone(),
            notes: close.notes.clone(),
        };

        Ok(self.db.registers().close(&update).await?)
    }

    async fn list_register_history(
        &self,
        query: &RegisterHistoryQuery,
    ) -> StoreResult<Page<CashRegister>> {
        let (items, total) = self.db.registers().list_closed(query).await?;
        Ok(Page::new(items, query.page, query.limit, total))
    }

    async fn delete_register(&self, register_id: &str) -> StoreResult<()> {
        Ok(self.db.registers().delete_closed(register_id).await?)
    }

    async fn update_notes(
        &self,
        register_id: &str,
        notes: Option<&str>,
    ) -> StoreResult<CashRegister> {
        Ok(self.db.registers().update_notes(register_id, notes).await?)
    }
}
