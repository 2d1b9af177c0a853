//! # caja-session: Register Sessions for Caja
//!
//! This crate drives the cash register lifecycle of each branch (open,
//! record sales, close with reconciliation) on top of a [`RegisterStore`].
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Session Layer Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                 SessionCoordinator (coordinator.rs)              │  │
//! │  │                                                                  │  │
//! │  │  open_register · record_sale · void_sale · close_register       │  │
//! │  │  summary · history · delete · annotate                           │  │
//! │  └───────┬───────────────────────┬──────────────────────┬───────────┘  │
//! │          ▼                       ▼                      ▼              │
//! │  ┌────────────────┐  ┌──────────────────────┐  ┌───────────────────┐   │
//! │  │ RegisterTracker│  │   Call guards        │  │ caja_core         │   │
//! │  │ (tracker.rs)   │  │   (guard.rs)         │  │ reconciliation    │   │
//! │  │                │  │                      │  │                   │   │
//! │  │ Open register  │  │ timeout + cancel     │  │ expected cash     │   │
//! │  │ per branch,    │  │ backoff for reads    │  │ variance, class   │   │
//! │  │ fresh reads    │  │                      │  │                   │   │
//! │  └───────┬────────┘  └──────────┬───────────┘  └───────────────────┘   │
//! │          └──────────────┬───────┘                                      │
//! │                         ▼                                              │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                  dyn RegisterStore (store/)                      │  │
//! │  │        SqliteRegisterStore  │  MemoryRegisterStore               │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Session configuration (database, timeouts, retry, close)
//! - [`coordinator`] - Lifecycle operations
//! - [`error`] - Session error taxonomy and front-end payloads
//! - [`guard`] - Per-call timeout, cancellation and read retry
//! - [`store`] - The store trait plus SQLite and in-memory implementations
//! - [`tracker`] - Active register lookup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use caja_session::{SessionConfig, SessionCoordinator};
//! use caja_core::{OpenRegisterRequest, CloseRegisterRequest};
//!
//! let config = SessionConfig::load_or_default(None);
//! let coordinator = SessionCoordinator::from_config(config).await?;
//! let ctx = coordinator.ctx();
//!
//! let register = coordinator.open_register(&ctx, &OpenRegisterRequest {
//!     branch_id: "B1".into(),
//!     opening_float_cents: 10_000,
//!     opened_by_user_id: "u-7".into(),
//!     notes: None,
//! }).await?;
//!
//! let closed = coordinator.close_register(&ctx, &CloseRegisterRequest {
//!     register_id: register.id.clone(),
//!     final_count_cents: Some(10_000),
//!     closed_by_user_id: "u-7".into(),
//!     notes: None,
//! }).await?;
//! println!("Variance: {:?}", closed.variance_class);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod coordinator;
pub mod error;
pub mod guard;
pub mod store;
pub mod tracker;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{
    CallSettings, CloseSettings, ConfigError, DatabaseSettings, RetrySettings, SessionConfig,
};
pub use coordinator::{ClosedRegister, SessionCoordinator};
pub use error::{ErrorKind, ErrorPayload, SessionError, SessionResult};
pub use guard::{CallContext, CallError};
pub use store::{
    CloseSubmission, MemoryRegisterStore, RegisterStore, SqliteRegisterStore, StoreError,
    StoreResult,
};
pub use tracker::{ActiveRegister, RegisterTracker};

// Callers build contexts from their own tokens.
pub use tokio_util::sync::CancellationToken;
