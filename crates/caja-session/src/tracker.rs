//! # Register State Tracker
//!
//! Answers "does this branch have an open register?" by asking the store.
//! Nothing is cached: every answer is a fresh read.
//!
//! ```text
//! get_active(branch)
//!   ├── Ok(ActiveRegister::Open(register))
//!   ├── Ok(ActiveRegister::NotFound)          ← normal outcome, not an error
//!   └── Err(TransientFailure | Cancelled | …)  ← could not determine
//! ```

use std::sync::Arc;

use tracing::debug;

use caja_core::validation::validate_id;
use caja_core::CashRegister;

use crate::config::RetrySettings;
use crate::error::SessionResult;
use crate::guard::{retry_read, CallContext};
use crate::store::RegisterStore;

/// Result of looking up a branch's open register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveRegister {
    Open(CashRegister),
    NotFound,
}

impl ActiveRegister {
    pub fn is_open(&self) -> bool {
        matches!(self, ActiveRegister::Open(_))
    }

    pub fn register(&self) -> Option<&CashRegister> {
        match self {
            ActiveRegister::Open(r) => Some(r),
            ActiveRegister::NotFound => None,
        }
    }

    pub fn into_register(self) -> Option<CashRegister> {
        match self {
            ActiveRegister::Open(r) => Some(r),
            ActiveRegister::NotFound => None,
        }
    }
}

/// Read-only view of which register (if any) is open per branch.
#[derive(Clone)]
pub struct RegisterTracker {
    store: Arc<dyn RegisterStore>,
    retry: RetrySettings,
}

impl RegisterTracker {
    pub fn new(store: Arc<dyn RegisterStore>, retry: RetrySettings) -> Self {
        RegisterTracker { store, retry }
    }

    /// Current open register of a branch.
    ///
    /// Transient failures are retried; if they persist the result is
    /// `TransientFailure`, never `NotFound`.
    pub async fn get_active(
        &self,
        ctx: &CallContext,
        branch_id: &str,
    ) -> SessionResult<ActiveRegister> {
        const OP: &str = "look up active register";

        validate_id("branchId", branch_id)?;

        let found = retry_read(ctx, &self.retry, OP, || {
            self.store.get_active_register(branch_id)
        })
        .await
        .map_err(|e| e.into_session(OP))?;

        debug!(branch_id = %branch_id, open = found.is_some(), "Active register lookup");

        Ok(match found {
            Some(register) => ActiveRegister::Open(register),
            None => ActiveRegister::NotFound,
        })
    }

    /// True if the branch has an open register right now.
    pub async fn is_open(&self, ctx: &CallContext, branch_id: &str) -> SessionResult<bool> {
        Ok(self.get_active(ctx, branch_id).await?.is_open())
    }
}

impl std::fmt::Debug for RegisterTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterTracker")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegisterStore;
    use caja_core::OpenRegisterRequest;
    use std::time::Duration;

    fn retry(max_attempts: u32) -> RetrySettings {
        RetrySettings {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn test_no_register_is_not_an_error() {
        let store = Arc::new(MemoryRegisterStore::new());
        let tracker = RegisterTracker::new(store, retry(1));
        let ctx = CallContext::new(Duration::from_secs(1));

        assert_eq!(tracker.get_active(&ctx, "B1").await.unwrap(), ActiveRegister::NotFound);
        assert!(!tracker.is_open(&ctx, "B1").await.unwrap());
    }

    #[tokio::test]
    async fn test_open_register_is_found() {
        let store = Arc::new(MemoryRegisterStore::new());
        store
            .open_register(&OpenRegisterRequest {
                branch_id: "B1".into(),
                opening_float_cents: 100,
                opened_by_user_id: "u1".into(),
                notes: None,
            })
            .await
            .unwrap();

        let tracker = RegisterTracker::new(store, retry(1));
        let ctx = CallContext::new(Duration::from_secs(1));
        assert!(tracker.is_open(&ctx, "B1").await.unwrap());
        assert!(!tracker.is_open(&ctx, "B2").await.unwrap());
    }

    #[tokio::test]
    async fn test_persistent_failure_is_not_not_found() {
        let store = Arc::new(MemoryRegisterStore::new());
        store.fail_next_reads(10);

        let tracker = RegisterTracker::new(store.clone(), retry(3));
        let ctx = CallContext::new(Duration::from_secs(1));

        let err = tracker.get_active(&ctx, "B1").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.read_calls(), 3);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let store = Arc::new(MemoryRegisterStore::new());
        store.fail_next_reads(1);

        let tracker = RegisterTracker::new(store.clone(), retry(3));
        let ctx = CallContext::new(Duration::from_secs(1));

        assert_eq!(tracker.get_active(&ctx, "B1").await.unwrap(), ActiveRegister::NotFound);
        assert_eq!(store.read_calls(), 2);
    }
}
