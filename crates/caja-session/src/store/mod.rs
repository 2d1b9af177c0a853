//! # Register Store
//!
//! The collaborator that owns register state. The coordinator never keeps
//! its own copy of "is a register open": it asks the store every time.
//!
//! ## Implementations
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        dyn RegisterStore                                │
//! │                                                                         │
//! │   ┌─────────────────────────┐        ┌─────────────────────────────┐   │
//! │   │  SqliteRegisterStore    │        │  MemoryRegisterStore        │   │
//! │   │  (sqlite.rs)            │        │  (memory.rs)                │   │
//! │   │                         │        │                             │   │
//! │   │  caja_db::Database      │        │  tokio::sync::Mutex<state>  │   │
//! │   │  unique index + CAS     │        │  fault injection for tests  │   │
//! │   └─────────────────────────┘        └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Contract
//! - `open_register` fails [`StoreError::Conflict`] if the branch already has
//!   an open register; the check and insert are atomic.
//! - `total_sales_cents` on every returned register is aggregated from the
//!   non-voided sales at read time.
//! - `close_register` applies only if the register is open AND still carries
//!   `expected_version`; otherwise `InvalidState` (closed) or `Stale` (changed).
//! - `record_sale` fails [`StoreError::Rejected`] without side effects when
//!   the sale would push the register total past `MAX_AMOUNT_CENTS`.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use caja_core::{
    CashRegister, CoreError, OpenRegisterRequest, Page, RecordSaleRequest, Reconciliation,
    RegisterHistoryQuery, RegisterSale, RegisterSummary, ValidationError,
};
use caja_db::DbError;

pub use memory::MemoryRegisterStore;
pub use sqlite::SqliteRegisterStore;

// =============================================================================
// Store Errors
// =============================================================================

/// Outcomes a store call can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The branch already has an open register.
    #[error("Branch {branch_id} already has an open register")]
    Conflict { branch_id: String },

    #[error("{entity} {id} is {state}")]
    InvalidState {
        entity: String,
        id: String,
        state: String,
    },

    /// Compare-and-swap lost: the register changed since it was read.
    #[error("Register {register_id} changed since version {expected_version}")]
    Stale {
        register_id: String,
        expected_version: i64,
    },

    /// The write would break an amount bound checked under the store's lock.
    #[error("{0}")]
    Rejected(ValidationError),

    /// Temporary failure; the same call may succeed later.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Permanent failure inside the store.
    #[error("Store failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        StoreError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            state: state.into(),
        }
    }

    /// True only for [`StoreError::Unavailable`].
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Convert database errors to store outcomes.
///
/// ## Error Mapping
/// ```text
/// DbError::NotFound          → StoreError::NotFound
/// DbError::UniqueViolation   → StoreError::Conflict
/// DbError::InvalidState      → StoreError::InvalidState
/// DbError::VersionConflict   → StoreError::Stale
/// DbError::Rejected          → StoreError::Rejected
/// DbError (busy, pool, io)   → StoreError::Unavailable
/// Other                      → StoreError::Backend
/// ```
impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        if err.is_transient() {
            return StoreError::Unavailable(err.to_string());
        }

        match err {
            DbError::NotFound { entity, id } => StoreError::NotFound { entity, id },
            DbError::UniqueViolation { value, .. } => StoreError::Conflict { branch_id: value },
            DbError::InvalidState { entity, id, state } => {
                StoreError::InvalidState { entity, id, state }
            }
            DbError::VersionConflict {
                id,
                expected_version,
            } => StoreError::Stale {
                register_id: id,
                expected_version,
            },
            DbError::Rejected(v) => StoreError::Rejected(v),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

impl From<CoreError> for StoreError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidState {
                register_id,
                status,
                ..
            } => StoreError::invalid_state("Register", register_id, status.to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

/// Result type for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

// =============================================================================
// Close Submission
// =============================================================================

/// A close computed from a register at `expected_version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseSubmission {
    pub register_id: String,
    pub expected_version: i64,
    pub reconciliation: Reconciliation,
    pub closed_by_user_id: String,
    pub notes: Option<String>,
}

// =============================================================================
// Store Trait
// =============================================================================

/// Persistence collaborator for register sessions.
#[async_trait]
pub trait RegisterStore: Send + Sync {
    /// Creates an open register; `Conflict` if the branch has one open.
    async fn open_register(&self, req: &OpenRegisterRequest) -> StoreResult<CashRegister>;

    /// The open register of a branch, if any.
    async fn get_active_register(&self, branch_id: &str) -> StoreResult<Option<CashRegister>>;

    async fn get_register(&self, register_id: &str) -> StoreResult<Option<CashRegister>>;

    /// Live totals for an open register, frozen totals for a closed one.
    async fn get_register_summary(&self, register_id: &str) -> StoreResult<RegisterSummary>;

    async fn record_sale(&self, req: &RecordSaleRequest) -> StoreResult<RegisterSale>;

    async fn void_sale(&self, register_id: &str, sale_id: &str) -> StoreResult<RegisterSale>;

    /// Every sale of a register, voided included, oldest first.
    async fn list_sales(&self, register_id: &str) -> StoreResult<Vec<RegisterSale>>;

    /// Compare-and-swap close.
    async fn close_register(&self, close: &CloseSubmission) -> StoreResult<CashRegister>;

    async fn list_register_history(
        &self,
        query: &RegisterHistoryQuery,
    ) -> StoreResult<Page<CashRegister>>;

    /// Deletes a closed register; `InvalidState` if it is open.
    async fn delete_register(&self, register_id: &str) -> StoreResult<()>;

    async fn update_notes(&self, register_id: &str, notes: Option<&str>)
        -> StoreResult<CashRegister>;
}
