//! # In-Memory Register Store
//!
//! A [`RegisterStore`] kept in process memory. It honors the same contract as
//! the SQLite store (single open per branch, pulled totals, versioned close)
//! and adds fault injection so callers can exercise timeouts, transient
//! failures and close races deterministically.
//!
//! ```text
//! call ──► enter() ──► latency sleep ──► injected failure? ──► Mutex<State>
//!            │                                 │
//!            └── counts reads / writes         └── StoreError::Unavailable
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use caja_core::reconciliation::summarize;
use caja_core::validation::validate_register_total;
use caja_core::{
    CashRegister, OpenRegisterRequest, Page, PaymentBreakdown, RecordSaleRequest,
    RegisterHistoryQuery, RegisterSale, RegisterStatus, RegisterSummary, SaleStatus,
};

use super::{CloseSubmission, RegisterStore, StoreError, StoreResult};

#[derive(Debug, Clone, Copy)]
enum CallKind {
    Read,
    Write,
}

#[derive(Debug, Default)]
struct State {
    /// Registers as stored; `total_sales_cents` is filled in on read.
    registers: HashMap<String, CashRegister>,
    sales: Vec<RegisterSale>,
    /// Sales applied right before the next close is evaluated.
    interleaved: Vec<RecordSaleRequest>,
}

impl State {
    fn total_sales(&self, register_id: &str) -> i64 {
        self.sales
            .iter()
            .filter(|s| s.register_id == register_id && s.status == SaleStatus::Completed)
            .map(|s| s.amount_cents)
            .sum()
    }

    fn materialize(&self, register: &CashRegister) -> CashRegister {
        let mut out = register.clone();
        out.total_sales_cents = self.total_sales(&register.id);
        out
    }

    fn get(&self, register_id: &str) -> Option<CashRegister> {
        self.registers.get(register_id).map(|r| self.materialize(r))
    }

    fn breakdown(&self, register_id: &str) -> Vec<PaymentBreakdown> {
        let mut by_method: Vec<PaymentBreakdown> = Vec::new();

        for sale in self
            .sales
            .iter()
            .filter(|s| s.register_id == register_id && s.status == SaleStatus::Completed)
        {
            match by_method.iter_mut().find(|b| b.method == sale.payment_method) {
                Some(entry) => {
                    entry.total_cents += sale.amount_cents;
                    entry.count += 1;
                }
                None => by_method.push(PaymentBreakdown {
                    method: sale.payment_method,
                    total_cents: sale.amount_cents,
                    count: 1,
                }),
            }
        }

        by_method.sort_by_key(|b| b.method);
        by_method
    }

    /// Register that accepts changes, or the reason it does not.
    fn open_register_mut(&mut self, register_id: &str) -> StoreResult<&mut CashRegister> {
        let register = self
            .registers
            .get_mut(register_id)
            .ok_or_else(|| StoreError::not_found("Register", register_id))?;

        if register.status != RegisterStatus::Open {
            return Err(StoreError::invalid_state(
                "Register",
                register_id,
                register.status.to_string(),
            ));
        }

        Ok(register)
    }

    fn record(&mut self, req: &RecordSaleRequest) -> StoreResult<RegisterSale> {
        self.open_register_mut(&req.register_id)?;
        validate_register_total(self.total_sales(&req.register_id), req.amount_cents)
            .map_err(StoreError::Rejected)?;
        self.open_register_mut(&req.register_id)?.version += 1;

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
        self.sales.push(sale.clone());

        Ok(sale)
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    latency_ms: AtomicU64,
    read_calls: AtomicU32,
    write_calls: AtomicU32,
}

/// Takes one unit from `counter` if any are left.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-process register store with fault injection.
#[derive(Debug, Default)]
pub struct MemoryRegisterStore {
    state: Mutex<State>,
    faults: Faults,
}

impl MemoryRegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` read calls fail with `Unavailable`.
    pub fn fail_next_reads(&self, n: u32) {
        self.faults.failing_reads.store(n, Ordering::SeqCst);
    }

    /// The next `n` write calls fail with `Unavailable`.
    pub fn fail_next_writes(&self, n: u32) {
        self.faults.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Delay applied to every call before it touches state.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.faults.latency_ms.store(ms, Ordering::SeqCst);
    }

    /// Records `req` just before the next close is evaluated, as if a sale
    /// landed between the caller's read and its close.
    pub async fn interleave_sale_before_next_close(&self, req: RecordSaleRequest) {
        self.state.lock().await.interleaved.push(req);
    }

    /// Read calls received so far (including failed ones).
    pub fn read_calls(&self) -> u32 {
        self.faults.read_calls.load(Ordering::SeqCst)
    }

    /// Write calls received so far (including failed ones).
    pub fn write_calls(&self) -> u32 {
        self.faults.write_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self, kind: CallKind, operation: &str) -> StoreResult<()> {
        let (calls, failing) = match kind {
            CallKind::Read => (&self.faults.read_calls, &self.faults.failing_reads),
            CallKind::Write => (&self.faults.write_calls, &self.faults.failing_writes),
        };
        calls.fetch_add(1, Ordering::SeqCst);

        let latency = self.faults.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if take_one(failing) {
            debug!(operation, "Injected transient failure");
            return Err(StoreError::Unavailable(format!(
                "injected failure during {operation}"
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl RegisterStore for MemoryRegisterStore {
    async fn open_register(&self, req: &OpenRegisterRequest) -> StoreResult<CashRegister> {
        self.enter(CallKind::Write, "open_register").await?;
        let mut state = self.state.lock().await;

        let already_open = state
            .registers
            .values()
            .any(|r| r.branch_id == req.branch_id && r.status == RegisterStatus::Open);
        if already_open {
            return Err(StoreError::Conflict {
                branch_id: req.branch_id.clone(),
            });
        }

        let register = CashRegister {
            id: Uuid::new_v4().to_string(),
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
            opened_at: Utc::now(),
            closed_at: None,
            version: 1,
        };
        state.registers.insert(register.id.clone(), register.clone());

        Ok(register)
    }

    async fn get_active_register(&self, branch_id: &str) -> StoreResult<Option<CashRegister>> {
        self.enter(CallKind::Read, "get_active_register").await?;
        let state = self.state.lock().await;

        Ok(state
            .registers
            .values()
            .find(|r| r.branch_id == branch_id && r.status == RegisterStatus::Open)
            .map(|r| state.materialize(r)))
    }

    async fn get_register(&self, register_id: &str) -> StoreResult<Option<CashRegister>> {
        self.enter(CallKind::Read, "get_register").await?;
        Ok(self.state.lock().await.get(register_id))
    }

    async fn get_register_summary(&self, register_id: &str) -> StoreResult<RegisterSummary> {
        self.enter(CallKind::Read, "get_register_summary").await?;
        let state = self.state.lock().await;

        let register = state
            .get(register_id)
            .ok_or_else(|| StoreError::not_found("Register", register_id))?;

        Ok(summarize(&register, state.breakdown(register_id))?)
    }

    async fn record_sale(&self, req: &RecordSaleRequest) -> StoreResult<RegisterSale> {
        self.enter(CallKind::Write, "record_sale").await?;
        self.state.lock().await.record(req)
    }

    async fn void_sale(&self, register_id: &str, sale_id: &str) -> StoreResult<RegisterSale> {
        self.enter(CallKind::Write, "void_sale").await?;
        let mut state = self.state.lock().await;

        state.open_register_mut(register_id)?;

        let sale = state
            .sales
            .iter_mut()
            .find(|s| s.id == sale_id && s.register_id == register_id)
            .ok_or_else(|| StoreError::not_found("Sale", sale_id))?;

        if sale.status == SaleStatus::Voided {
            return Err(StoreError::invalid_state("Sale", sale_id, "voided"));
        }

        sale.status = SaleStatus::Voided;
        sale.voided_at = Some(Utc::now());
        let voided = sale.clone();

        state.open_register_mut(register_id)?.version += 1;
        Ok(voided)
    }

    async fn list_sales(&self, register_id: &str) -> StoreResult<Vec<RegisterSale>> {
        self.enter(CallKind::Read, "list_sales").await?;
        let state = self.state.lock().await;

        Ok(state
            .sales
            .iter()
            .filter(|s| s.register_id == register_id)
            .cloned()
            .collect())
    }

    async fn close_register(&self, close: &CloseSubmission) -> StoreResult<CashRegister> {
        self.enter(CallKind::Write, "close_register").await?;
        let mut state = self.state.lock().await;

        for req in std::mem::take(&mut state.interleaved) {
            state.record(&req)?;
        }

        let register = state.open_register_mut(&close.register_id)?;
        if register.version != close.expected_version {
            return Err(StoreError::Stale {
                register_id: close.register_id.clone(),
                expected_version: close.expected_version,
            });
        }

        let rec = &close.reconciliation;
        register.status = RegisterStatus::Closed;
        register.expected_cash_cents = Some(rec.expected_cash.cents());
        register.final_count_cents = Some(rec.final_count.cents());
        register.variance_cents = Some(rec.variance.cents());
        register.closed_by_user_id = Some(close.closed_by_user_id.clone());
        if close.notes.is_some() {
            register.notes = close.notes.clone();
        }
        register.closed_at = Some(Utc::now());
        register.version += 1;

        state
            .get(&close.register_id)
            .ok_or_else(|| StoreError::not_found("Register", &close.register_id))
    }

    async fn list_register_history(
        &self,
        query: &RegisterHistoryQuery,
    ) -> StoreResult<Page<CashRegister>> {
        self.enter(CallKind::Read, "list_register_history").await?;
        let state = self.state.lock().await;

        let mut closed: Vec<&CashRegister> = state
            .registers
            .values()
            .filter(|r| r.branch_id == query.branch_id && r.status == RegisterStatus::Closed)
            .filter(|r| match (query.date_from, r.closed_at) {
                (Some(from), Some(at)) => at >= from,
                _ => true,
            })
            .filter(|r| match (query.date_to, r.closed_at) {
                (Some(to), Some(at)) => at <= to,
                _ => true,
            })
            .collect();

        closed.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then_with(|| b.id.cmp(&a.id)));

        let total = closed.len() as u64;
        let offset = usize::try_from(query.offset()).unwrap_or(usize::MAX);
        let items = closed
            .into_iter()
            .skip(offset)
            .take(query.limit as usize)
            .map(|r| state.materialize(r))
            .collect();

        Ok(Page::new(items, query.page, query.limit, total))
    }

    async fn delete_register(&self, register_id: &str) -> StoreResult<()> {
        self.enter(CallKind::Write, "delete_register").await?;
        let mut state = self.state.lock().await;

        let register = state
            .registers
            .get(register_id)
            .ok_or_else(|| StoreError::not_found("Register", register_id))?;

        if register.status == RegisterStatus::Open {
            return Err(StoreError::invalid_state("Register", register_id, "open"));
        }

        state.registers.remove(register_id);
        state.sales.retain(|s| s.register_id != register_id);
        Ok(())
    }

    async fn update_notes(
        &self,
        register_id: &str,
        notes: Option<&str>,
    ) -> StoreResult<CashRegister> {
        self.enter(CallKind::Write, "update_notes").await?;
        let mut state = self.state.lock().await;

        let register = state
            .registers
            .get_mut(register_id)
            .ok_or_else(|| StoreError::not_found("Register", register_id))?;
        register.notes = notes.map(str::to_string);
        register.version += 1;

        state
            .get(register_id)
            .ok_or_else(|| StoreError::not_found("Register", register_id))
    }
}
