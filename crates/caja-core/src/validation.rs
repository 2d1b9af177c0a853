//! # Validation Module
//!
//! Input validation for register operations.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Front end (TypeScript forms)                                 │
//! │  └── Immediate feedback, re-prompts the operator                       │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Session coordinator                                          │
//! │  └── THIS MODULE: preconditions checked before any store call          │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Store (SQLite)                                               │
//! │  ├── CHECK constraints on amounts                                      │
//! │  └── Partial UNIQUE index: one open register per branch                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here coerces bad input into a valid value: a negative amount is an
//! error, never clamped to zero.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{
    CloseRegisterRequest, OpenRegisterRequest, RecordSaleRequest, RegisterHistoryQuery,
};
use crate::{
    MAX_AMOUNT_CENTS, MAX_HISTORY_LIMIT, MAX_ID_LEN, MAX_NOTES_LEN, MAX_REFERENCE_LEN,
};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates an opaque identifier (branch id, user id, register id).
///
/// ## Rules
/// - Must not be empty or whitespace
/// - At most 64 characters
///
/// ## Example
/// ```rust
/// use caja_core::validation::validate_id;
///
/// assert!(validate_id("branchId", "B1").is_ok());
/// assert!(validate_id("branchId", "  ").is_err());
/// ```
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates optional free text (notes, references) against a length cap.
pub fn validate_optional_text(field: &str, value: Option<&str>, max: usize) -> ValidationResult<()> {
    match value {
        Some(text) if text.chars().count() > max => Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        }),
        _ => Ok(()),
    }
}

/// Validates a UUID string format.
///
/// ## Example
/// ```rust
/// use caja_core::validation::validate_uuid;
///
/// assert!(validate_uuid("registerId", "550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_uuid("registerId", "not-a-uuid").is_err());
/// ```
pub fn validate_uuid(field: &str, id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    uuid::Uuid::parse_str(id).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: format!("must be a valid UUID ({e})"),
    })?;

    Ok(())
}

// =============================================================================
// Amount Validators
// =============================================================================

/// Validates an amount that may be zero but never negative.
///
/// ## Example
/// ```rust
/// use caja_core::validation::validate_non_negative;
///
/// assert!(validate_non_negative("openingFloat", 0).is_ok());
/// assert!(validate_non_negative("openingFloat", -1).is_err());
/// ```
pub fn validate_non_negative(field: &str, cents: i64) -> ValidationResult<Money> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    if cents > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(Money::from_cents(cents))
}

/// Validates a sale amount (strictly positive, at most `MAX_AMOUNT_CENTS`).
pub fn validate_sale_amount(cents: i64) -> ValidationResult<Money> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    if cents > MAX_AMOUNT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: 1,
            max: MAX_AMOUNT_CENTS,
        });
    }

    Ok(Money::from_cents(cents))
}

/// Checks that adding a sale keeps the register total within bounds.
///
/// Stores call this inside the write that records the sale, against the
/// total they hold at that moment, so the sum can never overflow.
pub fn validate_register_total(current_total: i64, amount: i64) -> ValidationResult<i64> {
    current_total
        .checked_add(amount)
        .filter(|total| (0..=MAX_AMOUNT_CENTS).contains(total))
        .ok_or_else(|| ValidationError::OutOfRange {
            field: "totalSales".to_string(),
            min: 0,
            max: MAX_AMOUNT_CENTS,
        })
}

// =============================================================================
// Request Validators
// =============================================================================

/// Validates an open request and returns the opening float.
pub fn validate_open_request(req: &OpenRegisterRequest) -> ValidationResult<Money> {
    validate_id("branchId", &req.branch_id)?;
    validate_id("openedByUserId", &req.opened_by_user_id)?;
    validate_optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?;
    validate_non_negative("openingFloat", req.opening_float_cents)
}

/// Validates a sale request and returns the sale amount.
pub fn validate_record_sale(req: &RecordSaleRequest) -> ValidationResult<Money> {
    validate_id("registerId", &req.register_id)?;
    validate_optional_text("reference", req.reference.as_deref(), MAX_REFERENCE_LEN)?;
    validate_sale_amount(req.amount_cents)
}

/// Validates a close request and returns the final count.
///
/// ## Close Workflow
/// ```text
/// Operator counts drawer: 340.00
///      │
///      ▼
/// validate_close_request() ← THIS FUNCTION
///      │
///      ├── count missing?   → Error: "finalCount is required"
///      ├── count negative?  → Error: "finalCount must not be negative"
///      │
///      └── OK → coordinator re-fetches totals and reconciles
/// ```
pub fn validate_close_request(req: &CloseRegisterRequest) -> ValidationResult<Money> {
    validate_id("registerId", &req.register_id)?;
    validate_id("closedByUserId", &req.closed_by_user_id)?;
    validate_optional_text("notes", req.notes.as_deref(), MAX_NOTES_LEN)?;

    let cents = req.final_count_cents.ok_or_else(|| ValidationError::Required {
        field: "finalCount".to_string(),
    })?;

    validate_non_negative("finalCount", cents)
}

/// Validates history paging and date filters.
pub fn validate_history_query(query: &RegisterHistoryQuery) -> ValidationResult<()> {
    validate_id("branchId", &query.branch_id)?;

    if query.page == 0 {
        return Err(ValidationError::MustBePositive {
            field: "page".to_string(),
        });
    }

    if query.limit == 0 || query.limit > MAX_HISTORY_LIMIT {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: i64::from(MAX_HISTORY_LIMIT),
        });
    }

    if let (Some(from), Some(to)) = (query.date_from, query.date_to) {
        if from > to {
            return Err(ValidationError::InvertedDateRange);
        }
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
