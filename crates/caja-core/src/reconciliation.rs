//! # Reconciliation Calculator
//!
//! Pure cash reconciliation math: no side effects, no I/O.
//!
//! ## Flow at Close
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  fresh register (Open)                                                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  expected_cash() = opening_float + total_sales                          │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  compute_variance(expected, final_count) = final_count - expected       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  classify_variance() ──► Exact (== 0) | Surplus (> 0) | Shortage (< 0)  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All inputs are already at cent precision, so nothing here rounds.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CashRegister, PaymentBreakdown, RegisterStatus, RegisterSummary};

/// Sign of a close-time variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarianceClass {
    /// Counted cash matches expected cash to the cent.
    Exact,
    /// More cash than expected.
    Surplus,
    /// Less cash than expected.
    Shortage,
}

/// Result of reconciling an open register against a final count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub expected_cash: Money,
    pub final_count: Money,
    pub variance: Money,
    pub class: VarianceClass,
}

/// Live expected cash for an open register.
///
/// Fails with `InvalidState` for a closed register: its totals are frozen and
/// callers must read [`CashRegister::expected_cash_snapshot`] instead.
///
/// ## Example
/// ```rust,ignore
/// let expected = expected_cash(&register)?; // 100.00 float + 250.00 sales
/// assert_eq!(expected.to_decimal_string(), "350.00");
/// ```
pub fn expected_cash(register: &CashRegister) -> CoreResult<Money> {
    if register.status != RegisterStatus::Open {
        return Err(CoreError::invalid_state(
            register.id.clone(),
            register.status,
            "estimate expected cash",
        ));
    }

    register
        .opening_float()
        .checked_add(register.total_sales())
        .ok_or_else(|| CoreError::AmountOverflow {
            what: "expected cash".to_string(),
        })
}

/// `final_count - expected`. Positive is a surplus, negative a shortage.
#[inline]
pub fn compute_variance(expected: Money, final_count: Money) -> Money {
    final_count - expected
}

/// Classifies a variance by exact integer comparison.
#[inline]
pub fn classify_variance(variance: Money) -> VarianceClass {
    if variance.is_zero() {
        VarianceClass::Exact
    } else if variance.is_positive() {
        VarianceClass::Surplus
    } else {
        VarianceClass::Shortage
    }
}

/// Computes expected cash, variance and classification in one step.
///
/// `final_count` must already be validated as non-negative.
pub fn reconcile(register: &CashRegister, final_count: Money) -> CoreResult<Reconciliation> {
    let expected = expected_cash(register)?;
    let variance = compute_variance(expected, final_count);

    Ok(Reconciliation {
        expected_cash: expected,
        final_count,
        variance,
        class: classify_variance(variance),
    })
}

/// Builds the summary view of a register from its pulled totals.
///
/// Open registers report live expected cash; closed registers report the
/// snapshot frozen at close. `breakdown` must already exclude voided sales.
pub fn summarize(
    register: &CashRegister,
    breakdown: Vec<PaymentBreakdown>,
) -> CoreResult<RegisterSummary> {
    let expected = match register.status {
        RegisterStatus::Open => expected_cash(register)?,
        RegisterStatus::Closed => register
            .expected_cash_snapshot()
            .unwrap_or_else(|| register.opening_float() + register.total_sales()),
    };

    let sales_count = breakdown.iter().map(|b| b.count).sum();

    Ok(RegisterSummary {
        register_id: register.id.clone(),
        status: register.status,
        opening_float_cents: register.opening_float_cents,
        total_sales_cents: register.total_sales_cents,
        sales_count,
        expected_cash_cents: expected.cents(),
        breakdown_by_payment_method: breakdown,
    })
}

impl CashRegister {
    /// Classification of the variance frozen at close (None while open).
    pub fn variance_class(&self) -> Option<VarianceClass> {
        self.variance().map(classify_variance)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
