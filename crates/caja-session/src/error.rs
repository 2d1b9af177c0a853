//! # Session Error Types
//!
//! What callers of the coordinator see.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Session Error Categories                            │
//! │                                                                         │
//! │  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────┐  │
//! │  │  Caller input    │  │  Lifecycle       │  │  Collaborator        │  │
//! │  │                  │  │                  │  │                      │  │
//! │  │  Validation      │  │  AlreadyOpen     │  │  TransientFailure ↻  │  │
//! │  │                  │  │  InvalidState    │  │  Cancelled           │  │
//! │  │                  │  │  NotFound        │  │  Failed              │  │
//! │  └──────────────────┘  └──────────────────┘  └──────────────────────┘  │
//! │                                                                         │
//! │  ↻ = the only retryable kind, and only reads are retried automatically │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! "No active register" is not an error: see [`crate::tracker::ActiveRegister`].

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use caja_core::{CoreError, ValidationError};

use crate::store::StoreError;

/// Result type alias for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors returned by the session coordinator and tracker.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Caller input violates a precondition. Never coerced.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The branch already has an open register.
    #[error("Branch {branch_id} already has an open register; close it before opening another")]
    AlreadyOpen {
        branch_id: String,
        register_id: Option<String>,
    },

    /// Operation attempted in the wrong lifecycle state.
    #[error("Cannot {operation}: {entity} {id} is {state}")]
    InvalidState {
        operation: &'static str,
        entity: String,
        id: String,
        state: String,
    },

    /// The requested register (or sale) does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The store did not answer in time or reported a temporary failure.
    ///
    /// For writes the outcome is unknown: re-query the active register
    /// before trying again.
    #[error("Could not complete {operation}: {reason}")]
    TransientFailure {
        operation: &'static str,
        reason: String,
    },

    /// The caller cancelled the operation.
    #[error("Cancelled by caller: {operation}")]
    Cancelled { operation: &'static str },

    /// Permanent failure.
    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },
}

// =============================================================================
// Error Kind & Payload
// =============================================================================

/// Machine-readable error category for the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    AlreadyOpen,
    InvalidState,
    NotFound,
    TransientFailure,
    Cancelled,
    Failed,
}

/// Serializable error shape for the front end.
///
/// ## Example JSON
/// ```json
/// {
///   "code": "ALREADY_OPEN",
///   "message": "Branch B1 already has an open register; close it before opening another"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorPayload {
    pub code: ErrorKind,
    pub message: String,
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Validation(_) => ErrorKind::Validation,
            SessionError::AlreadyOpen { .. } => ErrorKind::AlreadyOpen,
            SessionError::InvalidState { .. } => ErrorKind::InvalidState,
            SessionError::NotFound { .. } => ErrorKind::NotFound,
            SessionError::TransientFailure { .. } => ErrorKind::TransientFailure,
            SessionError::Cancelled { .. } => ErrorKind::Cancelled,
            SessionError::Failed { .. } => ErrorKind::Failed,
        }
    }

    /// Returns true if the same request may succeed later.
    ///
    /// Only reads are retried automatically; for writes this tells the
    /// caller to re-check state and then decide.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::TransientFailure { .. })
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.kind(),
            message: self.to_string(),
        }
    }

    /// Maps a store outcome in the context of `operation`.
    ///
    /// `Stale` only reaches here if a caller outside the close loop lost a
    /// race; it is reported as transient so the caller re-reads.
    pub fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => SessionError::NotFound { entity, id },
            StoreError::Conflict { branch_id } => SessionError::AlreadyOpen {
                branch_id,
                register_id: None,
            },
            StoreError::InvalidState { entity, id, state } => SessionError::InvalidState {
                operation,
                entity,
                id,
                state,
            },
            StoreError::Stale { register_id, .. } => SessionError::TransientFailure {
                operation,
                reason: format!("register {register_id} changed during the operation"),
            },
            StoreError::Rejected(v) => SessionError::Validation(v),
            StoreError::Unavailable(reason) => SessionError::TransientFailure { operation, reason },
            StoreError::Backend(reason) => SessionError::Failed { operation, reason },
        }
    }

    /// Maps a calculator error in the context of `operation`.
    pub fn from_core(operation: &'static str, err: CoreError) -> Self {
        match err {
            CoreError::InvalidState {
                register_id,
                status,
                ..
            } => SessionError::InvalidState {
                operation,
                entity: "Register".to_string(),
                id: register_id,
                state: status.to_string(),
            },
            CoreError::Validation(v) => SessionError::Validation(v),
            other => SessionError::Failed {
                operation,
                reason: other.to_string(),
            },
        }
    }

    pub(crate) fn register_not_found(id: impl Into<String>) -> Self {
        SessionError::NotFound {
            entity: "Register".to_string(),
            id: id.into(),
        }
    }
}
