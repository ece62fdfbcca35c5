//! Typed entities and status enums for the WashTrack core.
//!
//! The dashboard frontend passes status values around as the display labels
//! ("Ready for Pickup", "Paid", ...), so every enum parses from and renders
//! to those exact labels. Unknown labels fail with [`CoreError::Validation`].
//!
//! Currency fields use `rust_decimal::Decimal` end to end and are persisted
//! as TEXT so sums and the commission calculation never drift.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{CoreError, Result};

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Staff role as assigned by the admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaffRole {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "manager")]
    Manager,
    #[serde(rename = "staff")]
    Staff,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Admin => "admin",
            StaffRole::Manager => "manager",
            StaffRole::Staff => "staff",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "admin" => Ok(StaffRole::Admin),
            "manager" => Ok(StaffRole::Manager),
            "staff" => Ok(StaffRole::Staff),
            other => Err(CoreError::Validation(format!(
                "unknown staff role: {other}"
            ))),
        }
    }
}

/// Fulfillment status of an order.
///
/// Intended progression: Pending -> Ongoing -> Ready for Pickup -> Picked up,
/// with Cancelled reachable from any non-terminal state. Transitions are not
/// structurally restricted (the dashboard offers a direct selection), but
/// every value must be one of these labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    #[serde(rename = "Pending")]
    Pending,
    #[serde(rename = "Ongoing")]
    Ongoing,
    #[serde(rename = "Ready for Pickup")]
    ReadyForPickup,
    #[serde(rename = "Picked up")]
    PickedUp,
    #[serde(rename = "Cancelled")]
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Ongoing => "Ongoing",
            OrderStatus::ReadyForPickup => "Ready for Pickup",
            OrderStatus::PickedUp => "Picked up",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "Pending" => Ok(OrderStatus::Pending),
            "Ongoing" => Ok(OrderStatus::Ongoing),
            "Ready for Pickup" => Ok(OrderStatus::ReadyForPickup),
            "Picked up" => Ok(OrderStatus::PickedUp),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(CoreError::Validation(format!(
                "unknown order status: {other}"
            ))),
        }
    }

    /// Picked up and Cancelled end the fulfillment lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::PickedUp | OrderStatus::Cancelled)
    }
}

/// Payment status of an order. Once Paid, the normal edit path is locked;
/// only the administrative override may move it further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    #[serde(rename = "Unpaid")]
    Unpaid,
    #[serde(rename = "Paid")]
    Paid,
    #[serde(rename = "Refunded")]
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "Unpaid",
            PaymentStatus::Paid => "Paid",
            PaymentStatus::Refunded => "Refunded",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "Unpaid" => Ok(PaymentStatus::Unpaid),
            "Paid" => Ok(PaymentStatus::Paid),
            "Refunded" => Ok(PaymentStatus::Refunded),
            other => Err(CoreError::Validation(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// How an order was (or will be) paid. Orders with no recorded method are
/// counted as cash in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "cash")]
    Cash,
    #[serde(rename = "gcash")]
    Gcash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Gcash => "gcash",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "cash" => Ok(PaymentMethod::Cash),
            "gcash" => Ok(PaymentMethod::Gcash),
            other => Err(CoreError::Validation(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub branch_id: String,
    pub role: StaffRole,
}

/// One continuous work session for a staff member.
///
/// `[start_time, end_time)` is the attribution window; `end_time` is open
/// (treated as "now") while the shift is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shift {
    pub shift_id: String,
    pub primary_staff_id: String,
    pub partner_staff_id: Option<String>,
    pub branch_id: String,
    pub shift_date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub updated_at: DateTime<Utc>,
}

/// One service line on an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub service_id: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub staff_id: String,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<PaymentMethod>,
    pub created_at: DateTime<Utc>,
}

/// A stock consumption record, tied to an order or a manual adjustment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUsageEvent {
    pub id: String,
    pub stock_id: String,
    pub stock_name: String,
    pub quantity_used: i64,
    pub usage_date: DateTime<Utc>,
    pub branch_id: String,
    pub order_id: Option<String>,
}

/// Inventory line as it appears on a sales report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryUsageItem {
    pub stock_name: String,
    pub quantity_used: i64,
    pub usage_date: DateTime<Utc>,
}

/// Aggregated sales for one staff member on one date. Derived, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalesReport {
    pub staff_id: String,
    pub report_date: NaiveDate,
    pub total_orders: i64,
    pub total_sales: Decimal,
    pub cash_sales: Decimal,
    pub gcash_sales: Decimal,
    pub commission_amount: Decimal,
    pub partner_name: String,
    pub inventory_usage: Vec<InventoryUsageItem>,
}

impl SalesReport {
    /// The zero report returned when the staff member had no shift on the
    /// date. "No data" is a valid terminal state for callers, not a failure.
    pub fn empty(staff_id: &str, report_date: NaiveDate) -> Self {
        SalesReport {
            staff_id: staff_id.to_string(),
            report_date,
            total_orders: 0,
            total_sales: Decimal::ZERO,
            cash_sales: Decimal::ZERO,
            gcash_sales: Decimal::ZERO,
            commission_amount: Decimal::ZERO,
            partner_name: crate::attribution::WORKING_SOLO.to_string(),
            inventory_usage: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store-column conversions
// ---------------------------------------------------------------------------

/// Parse a caller-supplied amount. Fails with Validation on garbage.
pub fn parse_money(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| CoreError::Validation(format!("invalid amount {raw:?}: {e}")))
}

/// Parse an amount column read back from the store.
pub(crate) fn stored_money(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| CoreError::Transient(format!("corrupt amount column {raw:?}: {e}")))
}

/// Parse an RFC3339 timestamp column read back from the store.
pub(crate) fn stored_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Transient(format!("corrupt timestamp column {raw:?}: {e}")))
}

/// Parse a `%Y-%m-%d` date column read back from the store.
pub(crate) fn stored_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| CoreError::Transient(format!("corrupt date column {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_status_labels_round_trip() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Ongoing,
            OrderStatus::ReadyForPickup,
            OrderStatus::PickedUp,
            OrderStatus::Cancelled,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn test_unknown_labels_fail_validation() {
        assert_eq!(
            OrderStatus::parse("Delivered").unwrap_err().code(),
            "VALIDATION"
        );
        assert_eq!(
            PaymentStatus::parse("paid").unwrap_err().code(),
            "VALIDATION",
            "labels are case-sensitive"
        );
        assert_eq!(
            PaymentMethod::parse("card").unwrap_err().code(),
            "VALIDATION"
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(OrderStatus::PickedUp.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::Ongoing.is_terminal());
        assert!(!OrderStatus::ReadyForPickup.is_terminal());
    }

    #[test]
    fn test_line_total_is_exact() {
        let item = OrderItem {
            service_id: "svc-wash".into(),
            quantity: 3,
            unit_price: parse_money("19.99").unwrap(),
        };
        assert_eq!(item.line_total(), parse_money("59.97").unwrap());
    }

    #[test]
    fn test_parse_money_rejects_garbage() {
        assert_eq!(parse_money("12.5.0").unwrap_err().code(), "VALIDATION");
        assert!(parse_money("1000.03").is_ok());
    }

    #[test]
    fn test_empty_report_is_zeroed_and_solo() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let report = SalesReport::empty("staff-1", date);
        assert_eq!(report.total_orders, 0);
        assert_eq!(report.total_sales, Decimal::ZERO);
        assert_eq!(report.commission_amount, Decimal::ZERO);
        assert_eq!(report.partner_name, crate::attribution::WORKING_SOLO);
        assert!(report.inventory_usage.is_empty());
    }
}
