//! # caja-core: Pure Business Logic for Cash Register Sessions
//!
//! This crate is the **heart** of Caja. It contains the register data model,
//! money arithmetic and reconciliation math as pure functions with zero I/O
//! dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Caja Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                caja-session (Tracker + Coordinator)             │   │
//! │  │    open_register, record_sale, close_register, ...              │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ caja-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌──────────────┐ ┌──────────┐  │   │
//! │  │   │   types   │  │   money   │  │reconciliation│ │validation│  │   │
//! │  │   │ Register  │  │   Money   │  │ expected     │ │  rules   │  │   │
//! │  │   │ Sale      │  │  (cents)  │  │ variance     │ │  checks  │  │   │
//! │  │   └───────────┘  └───────────┘  └──────────────┘ └──────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    caja-db (Database Layer)                     │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (CashRegister, RegisterSale, RegisterSummary, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`reconciliation`] - Expected cash, variance, classification
//! - [`error`] - Domain error types
//! - [`validation`] - Precondition checks for register operations
//!
//! ## Example Usage
//!
//! ```rust
//! use caja_core::money::Money;
//! use caja_core::reconciliation::{classify_variance, compute_variance, VarianceClass};
//!
//! let expected: Money = "350.00".parse().unwrap();
//! let counted: Money = "340.00".parse().unwrap();
//!
//! let variance = compute_variance(expected, counted);
//! assert_eq!(variance.to_decimal_string(), "-10.00");
//! assert_eq!(classify_variance(variance), VarianceClass::Shortage);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod reconciliation;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use reconciliation::{Reconciliation, VarianceClass};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum length of opaque identifiers (branch, user, register ids).
pub const MAX_ID_LEN: usize = 64;

/// Maximum length of register notes.
///
/// ## Business Reason
/// Notes are shown in the close dialog and history table; longer text
/// belongs in an incident report, not the register record.
pub const MAX_NOTES_LEN: usize = 500;

/// Maximum length of a sale reference (ticket number, card auth code).
pub const MAX_REFERENCE_LEN: usize = 64;

/// Largest amount accepted anywhere in a register, in cents.
///
/// Bounds each sale, the opening float, the final count and the running
/// sales total, so expected cash and variance always fit in `i64`.
pub const MAX_AMOUNT_CENTS: i64 = 100_000_000_000;

/// Default page size for register history.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// Largest page size accepted for register history.
pub const MAX_HISTORY_LIMIT: u32 = 100;
