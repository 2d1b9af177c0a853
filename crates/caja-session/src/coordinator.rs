//! # Session Coordinator
//!
//! Drives a branch's register through its lifecycle:
//!
//! ```text
//!                 open_register                 close_register
//!  CLOSED_OR_NONE ─────────────────►  OPEN  ─────────────────────►  CLOSED
//!        ▲                             │ ▲                             │
//!        │                 record_sale │ │ void_sale                   │
//!        │                             └─┘                             │
//!        └──────────── (a new register may now be opened) ◄────────────┘
//! ```
//!
//! The coordinator holds no register state of its own. Every decision is
//! made against a fresh store read, and every store call is bounded by the
//! caller's [`CallContext`].
//!
//! ## Retry Policy
//! | Operation               | Kind  | Automatic retry             |
//! |-------------------------|-------|-----------------------------|
//! | open / record / void    | write | never                       |
//! | close                   | write | re-read + recompute on race |
//! | delete / annotate       | write | never                       |
//! | summary / history / get | read  | backoff on transient errors |

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use caja_core::reconciliation::reconcile;
use caja_core::validation::{
    validate_close_request, validate_history_query, validate_id, validate_open_request,
    validate_optional_text, validate_record_sale,
};
use caja_core::{
    CashRegister, CloseRegisterRequest, OpenRegisterRequest, Page, RecordSaleRequest,
    RegisterHistoryQuery, RegisterSale, RegisterSummary, VarianceClass, MAX_NOTES_LEN,
};
use caja_db::Database;

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::guard::{call, retry_read, CallContext, CallError};
use crate::store::{CloseSubmission, RegisterStore, SqliteRegisterStore, StoreError};
use crate::tracker::{ActiveRegister, RegisterTracker};

/// Outcome of a successful close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ClosedRegister {
    /// The register as persisted, with its frozen snapshot.
    pub register: CashRegister,
    pub variance_class: VarianceClass,
}

/// Register lifecycle operations for any number of branches.
pub struct SessionCoordinator {
    store: Arc<dyn RegisterStore>,
    tracker: RegisterTracker,
    config: SessionConfig,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn RegisterStore>, config: SessionConfig) -> Self {
        let tracker = RegisterTracker::new(store.clone(), config.retry.clone());
        SessionCoordinator {
            store,
            tracker,
            config,
        }
    }

    /// Opens the configured SQLite database and builds a coordinator over it.
    pub async fn from_config(config: SessionConfig) -> SessionResult<Self> {
        const OP: &str = "open database";

        let db = Database::new(config.db_config())
            .await
            .map_err(|e| SessionError::from_store(OP, StoreError::from(e)))
            .inspect_err(|e| log_failure(OP, e))?;

        info!(path = %config.database.path.display(), "Session coordinator ready");

        Ok(Self::new(Arc::new(SqliteRegisterStore::new(db)), config))
    }

    pub fn tracker(&self) -> &RegisterTracker {
        &self.tracker
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// A context with the configured timeout and a fresh token.
    pub fn ctx(&self) -> CallContext {
        self.config.call_context()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Opens a register for `req.branch_id`.
    ///
    /// Fails `AlreadyOpen` if the branch has an open register, whether that
    /// is seen by the pre-check or reported by the store on insert.
    pub async fn open_register(
        &self,
        ctx: &CallContext,
        req: &OpenRegisterRequest,
    ) -> SessionResult<CashRegister> {
        const OP: &str = "open register";
        self.do_open(ctx, req)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_open(
        &self,
        ctx: &CallContext,
        req: &OpenRegisterRequest,
    ) -> SessionResult<CashRegister> {
        const OP: &str = "open register";

        let float = validate_open_request(req)?;

        if let ActiveRegister::Open(existing) = self.tracker.get_active(ctx, &req.branch_id).await?
        {
            return Err(SessionError::AlreadyOpen {
                branch_id: req.branch_id.clone(),
                register_id: Some(existing.id),
            });
        }

        let register = call(ctx, OP, self.store.open_register(req))
            .await
            .map_err(|e| e.into_session(OP))?;

        info!(
            register_id = %register.id,
            branch_id = %register.branch_id,
            opening_float = %float,
            opened_by = %register.opened_by_user_id,
            "Register opened"
        );

        Ok(register)
    }

    /// Records a completed sale against an open register.
    pub async fn record_sale(
        &self,
        ctx: &CallContext,
        req: &RecordSaleRequest,
    ) -> SessionResult<RegisterSale> {
        const OP: &str = "record sale";
        self.do_record_sale(ctx, req)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_record_sale(
        &self,
        ctx: &CallContext,
        req: &RecordSaleRequest,
    ) -> SessionResult<RegisterSale> {
        const OP: &str = "record sale";

        let amount = validate_record_sale(req)?;

        let sale = call(ctx, OP, self.store.record_sale(req))
            .await
            .map_err(|e| e.into_session(OP))?;

        info!(
            register_id = %sale.register_id,
            sale_id = %sale.id,
            amount = %amount,
            method = %sale.payment_method,
            "Sale recorded"
        );

        Ok(sale)
    }

    /// Voids a sale so it no longer counts toward the register's totals.
    pub async fn void_sale(
        &self,
        ctx: &CallContext,
        register_id: &str,
        sale_id: &str,
    ) -> SessionResult<RegisterSale> {
        const OP: &str = "void sale";
        self.do_void_sale(ctx, register_id, sale_id)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_void_sale(
        &self,
        ctx: &CallContext,
        register_id: &str,
        sale_id: &str,
    ) -> SessionResult<RegisterSale> {
        const OP: &str = "void sale";

        validate_id("registerId", register_id)?;
        validate_id("saleId", sale_id)?;

        let sale = call(ctx, OP, self.store.void_sale(register_id, sale_id))
            .await
            .map_err(|e| e.into_session(OP))?;

        info!(
            register_id = %register_id,
            sale_id = %sale_id,
            amount = %sale.amount(),
            "Sale voided"
        );

        Ok(sale)
    }

    /// Closes a register against the operator's final count.
    ///
    /// Totals are re-read right before computing, never taken from an
    /// earlier summary. If a sale lands between that read and the close, the
    /// store rejects the close as stale and the register is read and
    /// reconciled again, up to `close.max_attempts` rounds.
    pub async fn close_register(
        &self,
        ctx: &CallContext,
        req: &CloseRegisterRequest,
    ) -> SessionResult<ClosedRegister> {
        const OP: &str = "close register";
        self.do_close(ctx, req)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_close(
        &self,
        ctx: &CallContext,
        req: &CloseRegisterRequest,
    ) -> SessionResult<ClosedRegister> {
        const OP: &str = "close register";

        let final_count = validate_close_request(req)?;
        let max_attempts = self.config.close.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let register = self.fetch_register(ctx, OP, &req.register_id).await?;

            if !register.is_open() {
                return Err(SessionError::InvalidState {
                    operation: OP,
                    entity: "Register".to_string(),
                    id: register.id,
                    state: register.status.to_string(),
                });
            }

            let reconciliation =
                reconcile(&register, final_count).map_err(|e| SessionError::from_core(OP, e))?;

            debug!(
                register_id = %register.id,
                version = register.version,
                expected = %reconciliation.expected_cash,
                counted = %reconciliation.final_count,
                attempt,
                "Submitting close"
            );

            let submission = CloseSubmission {
                register_id: register.id.clone(),
                expected_version: register.version,
                reconciliation,
                closed_by_user_id: req.closed_by_user_id.clone(),
                notes: req.notes.clone(),
            };

            match call(ctx, OP, self.store.close_register(&submission)).await {
                Ok(closed) => {
                    info!(
                        register_id = %closed.id,
                        branch_id = %closed.branch_id,
                        expected = %reconciliation.expected_cash,
                        counted = %reconciliation.final_count,
                        variance = %reconciliation.variance,
                        class = ?reconciliation.class,
                        closed_by = %req.closed_by_user_id,
                        "Register closed"
                    );

                    return Ok(ClosedRegister {
                        register: closed,
                        variance_class: reconciliation.class,
                    });
                }
                Err(CallError::Store(StoreError::Stale {
                    register_id,
                    expected_version,
                })) => {
                    warn!(
                        register_id = %register_id,
                        expected_version,
                        attempt,
                        max_attempts,
                        "Register changed before close, recomputing"
                    );
                }
                Err(e) => return Err(e.into_session(OP)),
            }
        }

        Err(SessionError::TransientFailure {
            operation: OP,
            reason: format!(
                "register {} kept changing; gave up after {} attempts",
                req.register_id, max_attempts
            ),
        })
    }

    /// Permanently removes a closed register and its sales.
    pub async fn delete_register(&self, ctx: &CallContext, register_id: &str) -> SessionResult<()> {
        const OP: &str = "delete register";
        self.do_delete(ctx, register_id)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_delete(&self, ctx: &CallContext, register_id: &str) -> SessionResult<()> {
        const OP: &str = "delete register";

        validate_id("registerId", register_id)?;

        call(ctx, OP, self.store.delete_register(register_id))
            .await
            .map_err(|e| e.into_session(OP))?;

        info!(register_id = %register_id, "Register deleted");
        Ok(())
    }

    /// Replaces a register's notes. Allowed on open and closed registers.
    pub async fn annotate_register(
        &self,
        ctx: &CallContext,
        register_id: &str,
        notes: Option<&str>,
    ) -> SessionResult<CashRegister> {
        const OP: &str = "annotate register";
        self.do_annotate(ctx, register_id, notes)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_annotate(
        &self,
        ctx: &CallContext,
        register_id: &str,
        notes: Option<&str>,
    ) -> SessionResult<CashRegister> {
        const OP: &str = "annotate register";

        validate_id("registerId", register_id)?;
        validate_optional_text("notes", notes, MAX_NOTES_LEN)?;

        let register = call(ctx, OP, self.store.update_notes(register_id, notes))
            .await
            .map_err(|e| e.into_session(OP))?;

        info!(register_id = %register_id, "Register notes updated");
        Ok(register)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Open register of a branch, if any. See [`RegisterTracker::get_active`].
    pub async fn get_active_register(
        &self,
        ctx: &CallContext,
        branch_id: &str,
    ) -> SessionResult<ActiveRegister> {
        self.tracker
            .get_active(ctx, branch_id)
            .await
            .inspect_err(|e| log_failure("look up active register", e))
    }

    pub async fn get_register(
        &self,
        ctx: &CallContext,
        register_id: &str,
    ) -> SessionResult<CashRegister> {
        const OP: &str = "get register";

        let result = match validate_id("registerId", register_id) {
            Ok(()) => self.fetch_register(ctx, OP, register_id).await,
            Err(e) => Err(e.into()),
        };
        result.inspect_err(|e| log_failure(OP, e))
    }

    /// Advisory live totals. A later close recomputes from fresh data.
    pub async fn get_register_summary(
        &self,
        ctx: &CallContext,
        register_id: &str,
    ) -> SessionResult<RegisterSummary> {
        const OP: &str = "get register summary";
        self.do_summary(ctx, register_id)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_summary(&self, ctx: &CallContext, register_id: &str) -> SessionResult<RegisterSummary> {
        const OP: &str = "get register summary";

        validate_id("registerId", register_id)?;

        retry_read(ctx, &self.config.retry, OP, || {
            self.store.get_register_summary(register_id)
        })
        .await
        .map_err(|e| e.into_session(OP))
    }

    /// Every sale of a register, voided ones included.
    pub async fn list_sales(
        &self,
        ctx: &CallContext,
        register_id: &str,
    ) -> SessionResult<Vec<RegisterSale>> {
        const OP: &str = "list sales";
        self.do_list_sales(ctx, register_id)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_list_sales(
        &self,
        ctx: &CallContext,
        register_id: &str,
    ) -> SessionResult<Vec<RegisterSale>> {
        const OP: &str = "list sales";

        validate_id("registerId", register_id)?;

        retry_read(ctx, &self.config.retry, OP, || self.store.list_sales(register_id))
            .await
            .map_err(|e| e.into_session(OP))
    }

    /// Closed registers of a branch, most recently closed first.
    pub async fn list_register_history(
        &self,
        ctx: &CallContext,
        query: &RegisterHistoryQuery,
    ) -> SessionResult<Page<CashRegister>> {
        const OP: &str = "list register history";
        self.do_history(ctx, query)
            .await
            .inspect_err(|e| log_failure(OP, e))
    }

    async fn do_history(
        &self,
        ctx: &CallContext,
        query: &RegisterHistoryQuery,
    ) -> SessionResult<Page<CashRegister>> {
        const OP: &str = "list register history";

        validate_history_query(query)?;

        let page = retry_read(ctx, &self.config.retry, OP, || {
            self.store.list_register_history(query)
        })
        .await
        .map_err(|e| e.into_session(OP))?;

        debug!(
            branch_id = %query.branch_id,
            page = page.page,
            returned = page.items.len(),
            total = page.total,
            "Register history"
        );

        Ok(page)
    }

    /// Fresh read of one register; missing is `NotFound`.
    async fn fetch_register(
        &self,
        ctx: &CallContext,
        operation: &'static str,
        register_id: &str,
    ) -> SessionResult<CashRegister> {
        retry_read(ctx, &self.config.retry, operation, || {
            self.store.get_register(register_id)
        })
        .await
        .map_err(|e| e.into_session(operation))?
        .ok_or_else(|| SessionError::register_not_found(register_id))
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Logs a failed operation once, at the level its kind deserves.
fn log_failure(operation: &'static str, err: &SessionError) {
    match err {
        SessionError::Validation(_) | SessionError::Cancelled { .. } => {
            debug!(operation, error = %err, "Operation rejected");
        }
        SessionError::AlreadyOpen { .. }
        | SessionError::InvalidState { .. }
        | SessionError::NotFound { .. } => {
            warn!(operation, error = %err, "Operation refused");
        }
        SessionError::TransientFailure { .. } => {
            warn!(operation, error = %err, "Operation failed transiently");
        }
        SessionError::Failed { .. } => {
            error!(operation, error = %err, "Operation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegisterStore;
    use caja_core::{PaymentMethod, ValidationError};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn test_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.calls.timeout_ms = 1_000;
        config.retry.initial_backoff_ms = 1;
        config.retry.max_backoff_ms = 5;
        config
    }

    fn coordinator() -> (Arc<MemoryRegisterStore>, SessionCoordinator) {
        let store = Arc::new(MemoryRegisterStore::new());
        let coordinator = SessionCoordinator::new(store.clone(), test_config());
        (store, coordinator)
    }

    fn open_req(branch: &str, float_cents: i64) -> OpenRegisterRequest {
        OpenRegisterRequest {
            branch_id: branch.to_string(),
            opening_float_cents: float_cents,
            opened_by_user_id: "user-1".to_string(),
            notes: None,
        }
    }

    fn sale(register_id: &str, amount_cents: i64) -> RecordSaleRequest {
        RecordSaleRequest {
            register_id: register_id.to_string(),
            amount_cents,
            payment_method: PaymentMethod::Cash,
            reference: None,
        }
    }

    fn close_req(register_id: &str, final_count_cents: Option<i64>) -> CloseRegisterRequest {
        CloseRegisterRequest {
            register_id: register_id.to_string(),
            final_count_cents,
            closed_by_user_id: "user-2".to_string(),
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_open_rejects_second_register() {
        let (_, coord) = coordinator();
        let ctx = coord.ctx();

        let first = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap();
        let err = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap_err();

        assert_eq!(
            err,
            SessionError::AlreadyOpen {
                branch_id: "B1".to_string(),
                register_id: Some(first.id),
            }
        );
    }

    #[tokio::test]
    async fn test_open_validation_never_reaches_store() {
        let (store, coord) = coordinator();
        let ctx = coord.ctx();

        let err = coord.open_register(&ctx, &open_req("B1", -1)).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::MustNotBeNegative { .. })
        ));
        assert_eq!(store.read_calls() + store.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_requires_final_count() {
        let (_, coord) = coordinator();
        let ctx = coord.ctx();
        let reg = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap();

        let err = coord.close_register(&ctx, &close_req(&reg.id, None)).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Validation(ValidationError::Required {
                field: "finalCount".to_string()
            })
        );

        // Register untouched
        assert!(coord.get_register(&ctx, &reg.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_close_computes_shortage() {
        let (_, coord) = coordinator();
        let ctx = coord.ctx();
        let reg = coord.open_register(&ctx, &open_req("B1", 10_000)).await.unwrap();
        coord.record_sale(&ctx, &sale(&reg.id, 25_000)).await.unwrap();

        let closed = coord
            .close_register(&ctx, &close_req(&reg.id, Some(34_000)))
            .await
            .unwrap();

        assert_eq!(closed.variance_class, VarianceClass::Shortage);
        assert_eq!(closed.register.expected_cash_cents, Some(35_000));
        assert_eq!(closed.register.variance_cents, Some(-1_000));
    }

    #[tokio::test]
    async fn test_close_gives_up_when_register_keeps_changing() {
        let store = Arc::new(MemoryRegisterStore::new());
        let mut config = test_config();
        config.close.max_attempts = 1;
        let coord = SessionCoordinator::new(store.clone(), config);
        let ctx = coord.ctx();

        let reg = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap();
        store.interleave_sale_before_next_close(sale(&reg.id, 50)).await;

        let err = coord
            .close_register(&ctx, &close_req(&reg.id, Some(150)))
            .await
            .unwrap_err();
        assert!(err.is_retryable());

        // The interleaved sale landed, the register is still open.
        let current = coord.get_register(&ctx, &reg.id).await.unwrap();
        assert!(current.is_open());
        assert_eq!(current.total_sales_cents, 50);
    }

    #[tokio::test]
    async fn test_cancelled_close_does_not_mutate() {
        let (store, coord) = coordinator();
        let ctx = coord.ctx();
        let reg = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = CallContext::with_token(Duration::from_secs(1), token);
        let writes_before = store.write_calls();

        let err = coord
            .close_register(&cancelled, &close_req(&reg.id, Some(100)))
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::Cancelled { operation: "close register" });
        assert_eq!(store.write_calls(), writes_before);
        assert!(coord.get_register(&ctx, &reg.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn test_annotate_closed_register() {
        let (_, coord) = coordinator();
        let ctx = coord.ctx();
        let reg = coord.open_register(&ctx, &open_req("B1", 100)).await.unwrap();
        coord.close_register(&ctx, &close_req(&reg.id, Some(100))).await.unwrap();

        let annotated = coord
            .annotate_register(&ctx, &reg.id, Some("counted twice"))
            .await
            .unwrap();
        assert_eq!(annotated.notes.as_deref(), Some("counted twice"));
        assert_eq!(annotated.variance_cents, Some(0));

        let too_long = "x".repeat(MAX_NOTES_LEN + 1);
        assert!(matches!(
            coord.annotate_register(&ctx, &reg.id, Some(&too_long)).await,
            Err(SessionError::Validation(ValidationError::TooLong { .. }))
        ));
    }

    #[tokio::test]
    async fn test_get_missing_register() {
        let (_, coord) = coordinator();
        let ctx = coord.ctx();

        assert_eq!(
            coord.get_register(&ctx, "nope").await.unwrap_err(),
            SessionError::register_not_found("nope")
        );
    }
}
