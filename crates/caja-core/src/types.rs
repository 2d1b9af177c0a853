//! # Domain Types
//!
//! Core domain types for cash register sessions.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────────┐   ┌─────────────────┐   ┌─────────────────┐   │
//! │  │    CashRegister     │   │  RegisterSale   │   │ RegisterSummary │   │
//! │  │  ─────────────────  │   │  ─────────────  │   │  ─────────────  │   │
//! │  │  id (UUID)          │◄──│  register_id    │   │  expected_cash  │   │
//! │  │  branch_id          │   │  amount_cents   │   │  total_sales    │   │
//! │  │  status             │   │  payment_method │   │  sales_count    │   │
//! │  │  opening_float      │   │  status         │   │  breakdown[]    │   │
//! │  │  total_sales        │   └─────────────────┘   └─────────────────┘   │
//! │  │  final_count?       │                                               │
//! │  │  variance?          │   ┌─────────────────┐   ┌─────────────────┐   │
//! │  └─────────────────────┘   │ RegisterStatus  │   │ PaymentMethod   │   │
//! │                            │  Open           │   │  Cash  Card     │   │
//! │                            │  Closed         │   │  Transfer Credit│   │
//! │                            └─────────────────┘   └─────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Money fields are integer cents (`*_cents`) on every type; use the
//! accessor methods to get [`Money`] values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Register Status
// =============================================================================

/// Lifecycle state of a single register instance.
///
/// ```text
///   (none) ──open──► Open ──close──► Closed (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum RegisterStatus {
    /// Register is accepting sales.
    Open,
    /// Register has been counted and closed; the record is frozen.
    Closed,
}

impl fmt::Display for RegisterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterStatus::Open => write!(f, "open"),
            RegisterStatus::Closed => write!(f, "closed"),
        }
    }
}

// =============================================================================
// Sale Status
// =============================================================================

/// Status of a sale recorded against a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Sale counts toward the register totals.
    Completed,
    /// Sale was cancelled; excluded from every total.
    Voided,
}

impl Default for SaleStatus {
    fn default() -> Self {
        SaleStatus::Completed
    }
}

// =============================================================================
// Payment Method
// =============================================================================

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Physical cash into the drawer.
    Cash,
    /// Card on the external terminal.
    Card,
    /// Bank transfer.
    Transfer,
    /// Store credit (fiado).
    Credit,
}

impl PaymentMethod {
    /// Every method, in the order used by summaries.
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Cash,
        PaymentMethod::Card,
        PaymentMethod::Transfer,
        PaymentMethod::Credit,
    ];
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Cash => write!(f, "cash"),
            PaymentMethod::Card => write!(f, "card"),
            PaymentMethod::Transfer => write!(f, "transfer"),
            PaymentMethod::Credit => write!(f, "credit"),
        }
    }
}

// =============================================================================
// Cash Register
// =============================================================================

/// One open-to-close session of a physical till for a branch.
///
/// ## Field Presence
/// ```text
/// ┌──────────────────────┬─────────┬──────────┐
/// │ field                │  Open   │  Closed  │
/// ├──────────────────────┼─────────┼──────────┤
/// │ closed_at            │  None   │  Some    │
/// │ expected_cash_cents  │  None   │  Some    │  (frozen snapshot)
/// │ final_count_cents    │  None   │  Some    │
/// │ variance_cents       │  None   │  Some    │
/// │ closed_by_user_id    │  None   │  Some    │
/// └──────────────────────┴─────────┴──────────┘
/// ```
///
/// While open, expected cash is always derived through
/// [`crate::reconciliation::expected_cash`], never read from a stored field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CashRegister {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Branch this session belongs to.
    pub branch_id: String,

    pub status: RegisterStatus,

    /// Cash placed in the drawer at open.
    pub opening_float_cents: i64,

    /// Sum of non-voided sales, aggregated by the store on read.
    pub total_sales_cents: i64,

    /// Expected cash frozen at close.
    pub expected_cash_cents: Option<i64>,

    /// Operator-counted cash at close.
    pub final_count_cents: Option<i64>,

    /// `final_count - expected_cash`, frozen at close.
    pub variance_cents: Option<i64>,

    pub opened_by_user_id: String,
    pub closed_by_user_id: Option<String>,
    pub notes: Option<String>,

    #[ts(as = "String")]
    pub opened_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub closed_at: Option<DateTime<Utc>>,

    /// Bumped on every change to the register or its sales.
    pub version: i64,
}

impl CashRegister {
    /// Returns true while the register accepts sales.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == RegisterStatus::Open
    }

    /// Returns true once the register has been closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.status == RegisterStatus::Closed
    }

    #[inline]
    pub fn opening_float(&self) -> Money {
        Money::from_cents(self.opening_float_cents)
    }

    #[inline]
    pub fn total_sales(&self) -> Money {
        Money::from_cents(self.total_sales_cents)
    }

    /// Expected cash captured at close (None while open).
    #[inline]
    pub fn expected_cash_snapshot(&self) -> Option<Money> {
        self.expected_cash_cents.map(Money::from_cents)
    }

    #[inline]
    pub fn final_count(&self) -> Option<Money> {
        self.final_count_cents.map(Money::from_cents)
    }

    /// Variance frozen at close (None while open).
    #[inline]
    pub fn variance(&self) -> Option<Money> {
        self.variance_cents.map(Money::from_cents)
    }
}

// =============================================================================
// Register Sale
// =============================================================================

/// A sale recorded against a register (read-only view for the register).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSale {
    pub id: String,
    pub register_id: String,
    /// Sale amount in cents (always positive).
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    pub status: SaleStatus,
    /// External reference (ticket number, card auth code).
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub recorded_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub voided_at: Option<DateTime<Utc>>,
}

impl RegisterSale {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    #[inline]
    pub fn is_voided(&self) -> bool {
        self.status == SaleStatus::Voided
    }
}

// =============================================================================
// Summary
// =============================================================================

/// Totals for one payment method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PaymentBreakdown {
    pub method: PaymentMethod,
    pub total_cents: i64,
    pub count: i64,
}

/// Live (advisory) or frozen (closed) totals for a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSummary {
    pub register_id: String,
    pub status: RegisterStatus,
    pub opening_float_cents: i64,
    pub total_sales_cents: i64,
    pub sales_count: i64,
    pub expected_cash_cents: i64,
    pub breakdown_by_payment_method: Vec<PaymentBreakdown>,
}

impl RegisterSummary {
    #[inline]
    pub fn expected_cash(&self) -> Money {
        Money::from_cents(self.expected_cash_cents)
    }

    #[inline]
    pub fn total_sales(&self) -> Money {
        Money::from_cents(self.total_sales_cents)
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Input for opening a register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OpenRegisterRequest {
    pub branch_id: String,
    pub opening_float_cents: i64,
    pub opened_by_user_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Input for recording a sale against an open register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RecordSaleRequest {
    pub register_id: String,
    pub amount_cents: i64,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Input for closing a register.
///
/// `final_count_cents` is optional on the wire so that a missing count is
/// reported as a validation error rather than a deserialization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CloseRegisterRequest {
    pub register_id: String,
    #[serde(default)]
    pub final_count_cents: Option<i64>,
    pub closed_by_user_id: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Filters for the closed-register history list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RegisterHistoryQuery {
    pub branch_id: String,
    /// 1-based page number.
    pub page: u32,
    pub limit: u32,
    #[ts(as = "Option<String>")]
    #[serde(default)]
    pub date_from: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    #[serde(default)]
    pub date_to: Option<DateTime<Utc>>,
}

impl RegisterHistoryQuery {
    /// First page of a branch's history with the default page size.
    pub fn first_page(branch_id: impl Into<String>) -> Self {
        RegisterHistoryQuery {
            branch_id: branch_id.into(),
            page: 1,
            limit: crate::DEFAULT_HISTORY_LIMIT,
            date_from: None,
            date_to: None,
        }
    }

    /// Row offset for this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

// =============================================================================
// Paging
// =============================================================================

/// One page of a list result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    /// Builds a page, deriving `total_pages` from `total` and `limit`.
    pub fn new(items: Vec<T>, page: u32, limit: u32, total: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            u32::try_from(total.div_ceil(u64::from(limit))).unwrap_or(u32::MAX)
        };
        Page {
            items,
            page,
            limit,
            total,
            total_pages,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn open_register() -> CashRegister {
        CashRegister {
            id: "reg-1".to_string(),
            branch_id: "B1".to_string(),
            status: RegisterStatus::Open,
            opening_float_cents: 10000,
            total_sales_cents: 25000,
            expected_cash_cents: None,
            final_count_cents: None,
            variance_cents: None,
            opened_by_user_id: "user-1".to_string(),
            closed_by_user_id: None,
            notes: None,
            opened_at: Utc::now(),
            closed_at: None,
            version: 3,
        }
    }

    #[test]
    fn test_register_accessors() {
        let register = open_register();
        assert!(register.is_open());
        assert!(!register.is_closed());
        assert_eq!(register.opening_float().cents(), 10000);
        assert_eq!(register.total_sales().cents(), 25000);
        assert_eq!(register.variance(), None);
        assert_eq!(register.expected_cash_snapshot(), None);
    }

    #[test]
    fn test_register_serializes_camel_case() {
        let json = serde_json::to_value(open_register()).unwrap();
        assert_eq!(json["branchId"], "B1");
        assert_eq!(json["openingFloatCents"], 10000);
        assert_eq!(json["status"], "open");
        assert!(json["varianceCents"].is_null());
    }

    #[test]
    fn test_close_request_missing_final_count_deserializes() {
        let req: CloseRegisterRequest =
            serde_json::from_str(r#"{"registerId":"r","closedByUserId":"u"}"#).unwrap();
        assert_eq!(req.final_count_cents, None);
        assert_eq!(req.notes, None);
    }

    #[test]
    fn test_page_total_pages() {
        let page: Page<u8> = Page::new(vec![], 1, 20, 41);
        assert_eq!(page.total_pages, 3);

        let empty: Page<u8> = Page::new(vec![], 1, 20, 0);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn test_history_offset() {
        let mut query = RegisterHistoryQuery::first_page("B1");
        assert_eq!(query.offset(), 0);
        query.page = 3;
        query.limit = 10;
        assert_eq!(query.offset(), 20);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(RegisterStatus::Open.to_string(), "open");
        assert_eq!(PaymentMethod::Transfer.to_string(), "transfer");
        assert_eq!(SaleStatus::default(), SaleStatus::Completed);
    }
}
