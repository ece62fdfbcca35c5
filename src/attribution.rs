//! Sales attribution and commission reporting.
//!
//! Answers "what did this staff member sell on this date, and what
//! commission do they earn". Attribution is derived, never stored: an order
//! or inventory usage event belongs to a shift when its timestamp falls in
//! the shift's `[start_time, end_time)` window (an active shift's window is
//! open-ended and read as `[start_time, now)`). Orders are attributed to the
//! primary staff of the shift regardless of partner.
//!
//! The report is a pure function of (staff, date, store snapshot); callers
//! may cache results keyed by (staff, date) once the date has fully elapsed.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use tracing::{info, warn};

use crate::db::{self, DbState};
use crate::errors::Result;
use crate::models::{InventoryUsageItem, PaymentMethod, SalesReport};
use crate::{inventory, orders, shifts};

/// Partner sentinel for unpaired shifts.
pub const WORKING_SOLO: &str = "Working Solo";

/// Flat commission rate applied when no override is configured.
pub fn default_commission_rate() -> Decimal {
    // 5%
    Decimal::new(5, 2)
}

/// Commission rate from settings (`commission`/`rate`), falling back to the
/// default on a missing or unparseable value.
pub fn commission_rate(conn: &Connection) -> Decimal {
    match db::get_setting(conn, "commission", "rate") {
        Some(raw) => match Decimal::from_str(&raw) {
            Ok(rate) => rate,
            Err(e) => {
                warn!(raw = %raw, "Ignoring malformed commission rate setting: {e}");
                default_commission_rate()
            }
        },
        None => default_commission_rate(),
    }
}

/// Commission on attributed sales: half-up to the cent.
///
/// Half-up means the exact half-cent boundary rounds away from zero, so
/// 1000.10 at 5% (= 50.005) pays 50.01 while 1000.03 (= 50.0015) pays 50.00.
pub fn commission_for(total_sales: Decimal, rate: Decimal) -> Decimal {
    (total_sales * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Build the sales report for one staff member on one date.
///
/// A date with no shift yields the zero report, not an error; "no data" is a
/// valid terminal state for the dashboard.
pub fn get_staff_sales_report(
    db: &DbState,
    staff_id: &str,
    date: NaiveDate,
) -> Result<SalesReport> {
    let conn = db.lock()?;
    let now = Utc::now();

    let day_shifts = shifts::find_by_staff_and_date_locked(&conn, staff_id, date)?;
    if day_shifts.is_empty() {
        return Ok(SalesReport::empty(staff_id, date));
    }

    let mut total_orders: i64 = 0;
    let mut total_sales = Decimal::ZERO;
    let mut cash_sales = Decimal::ZERO;
    let mut gcash_sales = Decimal::ZERO;
    let mut inventory_usage: Vec<InventoryUsageItem> = Vec::new();

    for shift in &day_shifts {
        let window_end = shift.end_time.unwrap_or(now);

        let window_orders = orders::find_by_staff_and_time_range_locked(
            &conn,
            staff_id,
            shift.start_time,
            window_end,
        )?;
        for order in &window_orders {
            total_orders += 1;
            total_sales += order.total_price;
            match order.payment_method.unwrap_or(PaymentMethod::Cash) {
                PaymentMethod::Cash => cash_sales += order.total_price,
                PaymentMethod::Gcash => gcash_sales += order.total_price,
            }
        }

        let window_usage =
            inventory::find_by_time_range_locked(&conn, shift.start_time, window_end)?;
        inventory_usage.extend(window_usage.into_iter().map(|e| InventoryUsageItem {
            stock_name: e.stock_name,
            quantity_used: e.quantity_used,
            usage_date: e.usage_date,
        }));
    }

    let rate = commission_rate(&conn);
    let commission_amount = commission_for(total_sales, rate);

    // Partner comes from the most recent shift of the day (the list is
    // ordered oldest first).
    let partner_name = match day_shifts
        .last()
        .and_then(|s| s.partner_staff_id.as_deref())
    {
        Some(partner_id) => {
            db::staff_name(&conn, partner_id).unwrap_or_else(|| partner_id.to_string())
        }
        None => WORKING_SOLO.to_string(),
    };

    info!(
        staff_id = %staff_id,
        date = %date,
        orders = total_orders,
        total = %total_sales,
        commission = %commission_amount,
        "Sales report computed"
    );

    Ok(SalesReport {
        staff_id: staff_id.to_string(),
        report_date: date,
        total_orders,
        total_sales,
        cash_sales,
        gcash_sales,
        commission_amount,
        partner_name,
        inventory_usage,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
