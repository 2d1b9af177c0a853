//! Register lifecycle scenarios, run against both store implementations.

use std::sync::Arc;
use std::time::Duration;

use caja_core::{
    CloseRegisterRequest, OpenRegisterRequest, PaymentMethod, RecordSaleRequest,
    RegisterHistoryQuery, RegisterStatus, SaleStatus, VarianceClass, MAX_AMOUNT_CENTS,
};
use caja_session::{
    ActiveRegister, CallContext, CancellationToken, ErrorKind, MemoryRegisterStore,
    SessionConfig, SessionCoordinator, SessionError,
};

// =============================================================================
// Fixtures
// =============================================================================

fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.database.path = ":memory:".into();
    config.calls.timeout_ms = 2_000;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config
}

fn memory() -> (Arc<MemoryRegisterStore>, SessionCoordinator) {
    let store = Arc::new(MemoryRegisterStore::new());
    let coordinator = SessionCoordinator::new(store.clone(), test_config());
    (store, coordinator)
}

async fn sqlite() -> SessionCoordinator {
    SessionCoordinator::from_config(test_config())
        .await
        .expect("in-memory database")
}

fn open_req(branch: &str, float_cents: i64) -> OpenRegisterRequest {
    OpenRegisterRequest {
        branch_id: branch.to_string(),
        opening_float_cents: float_cents,
        opened_by_user_id: "cashier-1".to_string(),
        notes: None,
    }
}

fn sale(register_id: &str, amount_cents: i64, method: PaymentMethod) -> RecordSaleRequest {
    RecordSaleRequest {
        register_id: register_id.to_string(),
        amount_cents,
        payment_method: method,
        reference: None,
    }
}

fn close_req(register_id: &str, final_count_cents: i64) -> CloseRegisterRequest {
    CloseRegisterRequest {
        register_id: register_id.to_string(),
        final_count_cents: Some(final_count_cents),
        closed_by_user_id: "supervisor-1".to_string(),
        notes: None,
    }
}

// =============================================================================
// Scenarios (store-agnostic)
// =============================================================================

async fn happy_path(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B1", 10_000)).await.unwrap();
    assert_eq!(reg.status, RegisterStatus::Open);
    assert_eq!(reg.total_sales_cents, 0);

    coord
        .record_sale(&ctx, &sale(&reg.id, 15_000, PaymentMethod::Cash))
        .await
        .unwrap();
    coord
        .record_sale(&ctx, &sale(&reg.id, 10_000, PaymentMethod::Card))
        .await
        .unwrap();

    let summary = coord.get_register_summary(&ctx, &reg.id).await.unwrap();
    assert_eq!(summary.total_sales_cents, 25_000);
    assert_eq!(summary.expected_cash_cents, 35_000);
    assert_eq!(summary.sales_count, 2);
    assert_eq!(summary.breakdown_by_payment_method.len(), 2);

    let closed = coord
        .close_register(&ctx, &close_req(&reg.id, 35_000))
        .await
        .unwrap();
    assert_eq!(closed.variance_class, VarianceClass::Exact);
    assert_eq!(closed.register.status, RegisterStatus::Closed);
    assert_eq!(closed.register.expected_cash_cents, Some(35_000));
    assert_eq!(closed.register.final_count_cents, Some(35_000));
    assert_eq!(closed.register.variance_cents, Some(0));
    assert_eq!(closed.register.closed_by_user_id.as_deref(), Some("supervisor-1"));
    assert!(closed.register.closed_at.is_some());

    assert_eq!(
        coord.get_active_register(&ctx, "B1").await.unwrap(),
        ActiveRegister::NotFound
    );

    // A new register may now be opened on the branch.
    coord.open_register(&ctx, &open_req("B1", 5_000)).await.unwrap();
}

async fn shortage_and_surplus(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let short = coord.open_register(&ctx, &open_req("B-short", 10_000)).await.unwrap();
    coord
        .record_sale(&ctx, &sale(&short.id, 25_000, PaymentMethod::Cash))
        .await
        .unwrap();
    let closed = coord
        .close_register(&ctx, &close_req(&short.id, 34_000))
        .await
        .unwrap();
    assert_eq!(closed.variance_class, VarianceClass::Shortage);
    assert_eq!(closed.register.variance_cents, Some(-1_000));

    // Zero expected cash with a positive count is a surplus.
    let surplus = coord.open_register(&ctx, &open_req("B-surplus", 0)).await.unwrap();
    let closed = coord
        .close_register(&ctx, &close_req(&surplus.id, 500))
        .await
        .unwrap();
    assert_eq!(closed.variance_class, VarianceClass::Surplus);
    assert_eq!(closed.register.expected_cash_cents, Some(0));
    assert_eq!(closed.register.variance_cents, Some(500));
}

async fn closed_register_is_frozen(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B2", 1_000)).await.unwrap();
    let first = coord
        .close_register(&ctx, &close_req(&reg.id, 900))
        .await
        .unwrap();

    let err = coord
        .close_register(&ctx, &close_req(&reg.id, 1_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = coord
        .record_sale(&ctx, &sale(&reg.id, 100, PaymentMethod::Cash))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let after = coord.get_register(&ctx, &reg.id).await.unwrap();
    assert_eq!(after.final_count_cents, Some(900));
    assert_eq!(after.variance_cents, Some(-100));
    assert_eq!(after.closed_at, first.register.closed_at);
    assert_eq!(after.total_sales_cents, 0);

    // Summary of a closed register reports the frozen snapshot.
    let summary = coord.get_register_summary(&ctx, &reg.id).await.unwrap();
    assert_eq!(summary.expected_cash_cents, 1_000);
}

async fn delete_rules(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B3", 1_000)).await.unwrap();
    let err = coord.delete_register(&ctx, &reg.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert!(coord.tracker().is_open(&ctx, "B3").await.unwrap());

    coord.close_register(&ctx, &close_req(&reg.id, 1_000)).await.unwrap();
    coord.delete_register(&ctx, &reg.id).await.unwrap();

    assert_eq!(
        coord.get_register(&ctx, &reg.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        coord.delete_register(&ctx, &reg.id).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

async fn void_drops_out_of_totals(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B4", 10_000)).await.unwrap();
    let kept = coord
        .record_sale(&ctx, &sale(&reg.id, 10_000, PaymentMethod::Cash))
        .await
        .unwrap();
    let voided = coord
        .record_sale(&ctx, &sale(&reg.id, 4_000, PaymentMethod::Transfer))
        .await
        .unwrap();

    let result = coord.void_sale(&ctx, &reg.id, &voided.id).await.unwrap();
    assert_eq!(result.status, SaleStatus::Voided);
    assert!(result.voided_at.is_some());

    let again = coord.void_sale(&ctx, &reg.id, &voided.id).await.unwrap_err();
    assert_eq!(again.kind(), ErrorKind::InvalidState);

    let summary = coord.get_register_summary(&ctx, &reg.id).await.unwrap();
    assert_eq!(summary.total_sales_cents, 10_000);
    assert_eq!(summary.sales_count, 1);
    assert_eq!(summary.breakdown_by_payment_method.len(), 1);

    let sales = coord.list_sales(&ctx, &reg.id).await.unwrap();
    assert_eq!(sales.len(), 2);
    assert!(sales.iter().any(|s| s.id == kept.id && s.status == SaleStatus::Completed));

    let closed = coord
        .close_register(&ctx, &close_req(&reg.id, 20_000))
        .await
        .unwrap();
    assert_eq!(closed.register.expected_cash_cents, Some(20_000));
    assert_eq!(closed.variance_class, VarianceClass::Exact);
}

async fn history_paging(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    for i in 0..5 {
        let reg = coord.open_register(&ctx, &open_req("B5", 1_000)).await.unwrap();
        coord
            .close_register(&ctx, &close_req(&reg.id, 1_000 + i))
            .await
            .unwrap();
    }
    // Other branches and open registers stay out of the history.
    let other = coord.open_register(&ctx, &open_req("B6", 1_000)).await.unwrap();
    coord.close_register(&ctx, &close_req(&other.id, 1_000)).await.unwrap();
    coord.open_register(&ctx, &open_req("B5", 1_000)).await.unwrap();

    let mut query = RegisterHistoryQuery::first_page("B5");
    query.limit = 2;

    let first = coord.list_register_history(&ctx, &query).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages, 3);
    assert!(first.items[0].closed_at >= first.items[1].closed_at);
    assert!(first.items.iter().all(|r| r.status == RegisterStatus::Closed));

    query.page = 3;
    let last = coord.list_register_history(&ctx, &query).await.unwrap();
    assert_eq!(last.items.len(), 1);

    query.page = 0;
    let err = coord.list_register_history(&ctx, &query).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

async fn amounts_stay_in_range(coord: &SessionCoordinator) {
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B-max", 0)).await.unwrap();
    coord
        .record_sale(&ctx, &sale(&reg.id, MAX_AMOUNT_CENTS, PaymentMethod::Cash))
        .await
        .unwrap();

    // The total is already at the cap, so even one more cent is refused.
    let err = coord
        .record_sale(&ctx, &sale(&reg.id, 1, PaymentMethod::Cash))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = coord
        .record_sale(&ctx, &sale(&reg.id, i64::MAX, PaymentMethod::Cash))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = coord
        .open_register(&ctx, &open_req("B-max-float", MAX_AMOUNT_CENTS + 1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(
        coord.get_active_register(&ctx, "B-max-float").await.unwrap(),
        ActiveRegister::NotFound
    );

    let fresh = coord.get_register(&ctx, &reg.id).await.unwrap();
    assert_eq!(fresh.total_sales_cents, MAX_AMOUNT_CENTS);

    let err = coord
        .close_register(&ctx, &close_req(&reg.id, i64::MAX))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let closed = coord
        .close_register(&ctx, &close_req(&reg.id, MAX_AMOUNT_CENTS))
        .await
        .unwrap();
    assert_eq!(closed.variance_class, VarianceClass::Exact);
}

async fn concurrent_opens(coord: Arc<SessionCoordinator>) {
    let mut handles = Vec::new();
    for _ in 0..8 {
        let coord = coord.clone();
        handles.push(tokio::spawn(async move {
            let ctx = coord.ctx();
            coord.open_register(&ctx, &open_req("B-race", 1_000)).await
        }));
    }

    let mut opened = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => opened += 1,
            Err(SessionError::AlreadyOpen { branch_id, .. }) => assert_eq!(branch_id, "B-race"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(opened, 1);

    let ctx = coord.ctx();
    assert!(coord.tracker().is_open(&ctx, "B-race").await.unwrap());
}

// =============================================================================
// In-memory store
// =============================================================================

#[tokio::test]
async fn memory_happy_path() {
    happy_path(&memory().1).await;
}

#[tokio::test]
async fn memory_shortage_and_surplus() {
    shortage_and_surplus(&memory().1).await;
}

#[tokio::test]
async fn memory_closed_register_is_frozen() {
    closed_register_is_frozen(&memory().1).await;
}

#[tokio::test]
async fn memory_delete_rules() {
    delete_rules(&memory().1).await;
}

#[tokio::test]
async fn memory_void_drops_out_of_totals() {
    void_drops_out_of_totals(&memory().1).await;
}

#[tokio::test]
async fn memory_history_paging() {
    history_paging(&memory().1).await;
}

#[tokio::test]
async fn memory_amounts_stay_in_range() {
    amounts_stay_in_range(&memory().1).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn memory_concurrent_opens() {
    concurrent_opens(Arc::new(memory().1)).await;
}

// =============================================================================
// SQLite store
// =============================================================================

#[tokio::test]
async fn sqlite_happy_path() {
    happy_path(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_shortage_and_surplus() {
    shortage_and_surplus(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_closed_register_is_frozen() {
    closed_register_is_frozen(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_delete_rules() {
    delete_rules(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_void_drops_out_of_totals() {
    void_drops_out_of_totals(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_history_paging() {
    history_paging(&sqlite().await).await;
}

#[tokio::test]
async fn sqlite_amounts_stay_in_range() {
    amounts_stay_in_range(&sqlite().await).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sqlite_concurrent_opens() {
    concurrent_opens(Arc::new(sqlite().await)).await;
}

// =============================================================================
// Races, failures and cancellation (in-memory store with fault injection)
// =============================================================================

#[tokio::test]
async fn close_recomputes_when_a_sale_slips_in() {
    let (store, coord) = memory();
    let ctx = coord.ctx();

    let reg = coord.open_register(&ctx, &open_req("B1", 10_000)).await.unwrap();
    coord
        .record_sale(&ctx, &sale(&reg.id, 25_000, PaymentMethod::Cash))
        .await
        .unwrap();

    // Operator counted after the late sale; the first computed close is stale.
    store
        .interleave_sale_before_next_close(sale(&reg.id, 5_000, PaymentMethod::Cash))
        .await;

    let writes_before = store.write_calls();
    let closed = coord
        .close_register(&ctx, &close_req(&reg.id, 40_000))
        .await
        .unwrap();

    assert_eq!(closed.register.total_sales_cents, 30_000);
    assert_eq!(closed.register.expected_cash_cents, Some(40_000));
    assert_eq!(closed.variance_class, VarianceClass::Exact);
    assert_eq!(store.write_calls() - writes_before, 2);
}

#[tokio::test]
async fn reads_are_retried_writes_are_not() {
    let (store, coord) = memory();
    let ctx = coord.ctx();
    let reg = coord.open_register(&ctx, &open_req("B1", 1_000)).await.unwrap();

    store.fail_next_reads(2);
    let reads_before = store.read_calls();
    let summary = coord.get_register_summary(&ctx, &reg.id).await.unwrap();
    assert_eq!(summary.expected_cash_cents, 1_000);
    assert_eq!(store.read_calls() - reads_before, 3);

    store.fail_next_writes(1);
    let writes_before = store.write_calls();
    let err = coord
        .record_sale(&ctx, &sale(&reg.id, 500, PaymentMethod::Cash))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientFailure);
    assert!(err.is_retryable());
    assert_eq!(store.write_calls() - writes_before, 1);

    let summary = coord.get_register_summary(&ctx, &reg.id).await.unwrap();
    assert_eq!(summary.total_sales_cents, 0);
}

#[tokio::test]
async fn lookup_failure_is_not_reported_as_no_register() {
    let (store, coord) = memory();
    let ctx = coord.ctx();
    coord.open_register(&ctx, &open_req("B1", 1_000)).await.unwrap();

    store.fail_next_reads(10);
    let err = coord.get_active_register(&ctx, "B1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientFailure);

    // Opening must not proceed on an undetermined state.
    let err = coord.open_register(&ctx, &open_req("B1", 1_000)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientFailure);
}

#[tokio::test]
async fn timeout_is_a_failure_cancel_is_not() {
    let (store, coord) = memory();
    store.set_latency(Duration::from_millis(500));

    let impatient = CallContext::new(Duration::from_millis(20));
    let err = coord
        .open_register(&impatient, &open_req("B1", 1_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransientFailure);

    let token = CancellationToken::new();
    let ctx = CallContext::with_token(Duration::from_secs(5), token.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });

    let err = coord
        .open_register(&ctx, &open_req("B1", 1_000))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(!err.is_retryable());

    store.set_latency(Duration::ZERO);
    let fresh = coord.ctx();
    assert_eq!(
        coord.get_active_register(&fresh, "B1").await.unwrap(),
        ActiveRegister::NotFound
    );
}

#[tokio::test]
async fn validation_errors_reach_the_caller_unchanged() {
    let (_, coord) = memory();
    let ctx = coord.ctx();
    let reg = coord.open_register(&ctx, &open_req("B1", 1_000)).await.unwrap();

    let err = coord
        .record_sale(&ctx, &sale(&reg.id, 0, PaymentMethod::Cash))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let mut negative = close_req(&reg.id, -1);
    let err = coord.close_register(&ctx, &negative).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    negative.final_count_cents = None;
    let err = coord.close_register(&ctx, &negative).await.unwrap_err();
    assert_eq!(err.to_payload().code, ErrorKind::Validation);

    let err = coord.open_register(&ctx, &open_req("", 1_000)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}
