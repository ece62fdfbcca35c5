//! Order creation and the fulfillment status machine.
//!
//! `total_price` is always derived from the item lines at creation time.
//! Status updates are validated against the [`OrderStatus`] enum but are
//! otherwise permissive - the dashboard offers a direct status selection,
//! so any label may follow any other. Every change is written to
//! `order_status_log` with the acting staff id.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::errors::{CoreError, Result};
use crate::models::{
    stored_money, stored_time, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
};

/// Request to create an order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub staff_id: String,
    pub items: Vec<OrderItem>,
    pub payment_method: Option<PaymentMethod>,
}

/// One row of the status audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusLogEntry {
    pub order_id: String,
    pub field: String,
    pub old_value: String,
    pub new_value: String,
    pub changed_by: String,
    pub is_override: bool,
    pub reason: Option<String>,
    pub changed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Create order
// ---------------------------------------------------------------------------

/// Create an order in `Pending`/`Unpaid`. Returns the new order id.
pub fn create_order(db: &DbState, req: &NewOrder) -> Result<String> {
    if req.branch_id.trim().is_empty() {
        return Err(CoreError::Validation("branch_id is required".into()));
    }
    if req.staff_id.trim().is_empty() {
        return Err(CoreError::Validation("staff_id is required".into()));
    }
    if req.items.is_empty() {
        return Err(CoreError::Validation("order needs at least one item".into()));
    }
    let mut total = Decimal::ZERO;
    for item in &req.items {
        if item.quantity <= 0 {
            return Err(CoreError::Validation(format!(
                "item {} quantity must be positive",
                item.service_id
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(CoreError::Validation(format!(
                "item {} unit price must not be negative",
                item.service_id
            )));
        }
        total += item.line_total();
    }

    let items_json = serde_json::to_string(&req.items)
        .map_err(|e| CoreError::Validation(format!("serialize items: {e}")))?;

    let conn = db.lock()?;
    let order_id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO orders (
            id, branch_id, customer_id, staff_id, items, total_price,
            order_status, payment_status, payment_method, created_at, updated_at, updated_by
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'Pending', 'Unpaid', ?7, ?8, ?8, ?4)",
        params![
            order_id,
            req.branch_id,
            req.customer_id,
            req.staff_id,
            items_json,
            total.to_string(),
            req.payment_method.map(|m| m.as_str()),
            now,
        ],
    )
    .map_err(|e| CoreError::Transient(format!("insert order: {e}")))?;

    info!(order_id = %order_id, staff_id = %req.staff_id, total = %total, "Order created");

    Ok(order_id)
}

// ---------------------------------------------------------------------------
// Fulfillment status
// ---------------------------------------------------------------------------

/// Set the fulfillment status of an order.
///
/// `new_status` is the display label from the dashboard's selection; an
/// unknown label fails with `Validation`. Jumps between known labels are
/// allowed. The change is attributed to `acting_staff_id` in the audit log.
pub fn update_order_status(
    db: &DbState,
    order_id: &str,
    new_status: &str,
    acting_staff_id: &str,
) -> Result<()> {
    let status = OrderStatus::parse(new_status)?;

    let conn = db.lock()?;
    let now = Utc::now().to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| CoreError::Transient(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<()> {
        let current: Option<String> = conn
            .query_row(
                "SELECT order_status FROM orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::Transient(format!("query order: {e}")))?;

        let current =
            current.ok_or_else(|| CoreError::NotFound(format!("order not found: {order_id}")))?;

        conn.execute(
            "UPDATE orders SET order_status = ?1, updated_at = ?2, updated_by = ?3
             WHERE id = ?4",
            params![status.as_str(), now, acting_staff_id, order_id],
        )
        .map_err(|e| CoreError::Transient(format!("update order status: {e}")))?;

        log_status_change(
            &conn,
            order_id,
            "order_status",
            &current,
            status.as_str(),
            acting_staff_id,
            false,
            None,
            &now,
        )?;

        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| CoreError::Transient(format!("commit: {e}")))?;
            info!(
                order_id = %order_id,
                status = %status.as_str(),
                staff_id = %acting_staff_id,
                "Order status updated"
            );
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Append a row to `order_status_log`. Shared with the payment machine.
#[allow(clippy::too_many_arguments)]
pub(crate) fn log_status_change(
    conn: &Connection,
    order_id: &str,
    field: &str,
    old_value: &str,
    new_value: &str,
    changed_by: &str,
    is_override: bool,
    reason: Option<&str>,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO order_status_log (
            order_id, field, old_value, new_value, changed_by, is_override, reason, changed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            order_id,
            field,
            old_value,
            new_value,
            changed_by,
            is_override as i64,
            reason,
            now,
        ],
    )
    .map_err(|e| CoreError::Transient(format!("insert status log: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Fetch a single order.
pub fn get_order(db: &DbState, order_id: &str) -> Result<Order> {
    let conn = db.lock()?;
    let raw = conn
        .query_row(
            "SELECT id, branch_id, customer_id, staff_id, items, total_price,
                    order_status, payment_status, payment_method, created_at
             FROM orders WHERE id = ?1",
            params![order_id],
            raw_order,
        )
        .optional()
        .map_err(|e| CoreError::Transient(format!("query order: {e}")))?;

    raw.map(order_from_raw)
        .transpose()?
        .ok_or_else(|| CoreError::NotFound(format!("order not found: {order_id}")))
}

/// Orders created by a staff member with `created_at` in `[start, end)`.
pub fn find_by_staff_and_time_range(
    db: &DbState,
    staff_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Order>> {
    let conn = db.lock()?;
    find_by_staff_and_time_range_locked(&conn, staff_id, start, end)
}

pub(crate) fn find_by_staff_and_time_range_locked(
    conn: &Connection,
    staff_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Order>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, branch_id, customer_id, staff_id, items, total_price,
                    order_status, payment_status, payment_method, created_at
             FROM orders
             WHERE staff_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at ASC",
        )
        .map_err(|e| CoreError::Transient(format!("prepare order query: {e}")))?;

    let raw: Vec<RawOrder> = stmt
        .query_map(
            params![staff_id, start.to_rfc3339(), end.to_rfc3339()],
            raw_order,
        )
        .map_err(|e| CoreError::Transient(format!("query orders: {e}")))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CoreError::Transient(format!("read order row: {e}")))?;

    raw.into_iter().map(order_from_raw).collect()
}

/// Audit trail for an order, oldest first.
pub fn status_log(db: &DbState, order_id: &str) -> Result<Vec<StatusLogEntry>> {
    let conn = db.lock()?;
    let mut stmt = conn
        .prepare(
            "SELECT order_id, field, old_value, new_value, changed_by, is_override,
                    reason, changed_at
             FROM order_status_log WHERE order_id = ?1
             ORDER BY id ASC",
        )
        .map_err(|e| CoreError::Transient(format!("prepare log query: {e}")))?;

    let raw: Vec<(
        String,
        String,
        String,
        String,
        String,
        i64,
        Option<String>,
        String,
    )> = stmt
        .query_map(params![order_id], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })
        .map_err(|e| CoreError::Transient(format!("query log: {e}")))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CoreError::Transient(format!("read log row: {e}")))?;

    raw.into_iter()
        .map(
            |(order_id, field, old_value, new_value, changed_by, is_override, reason, at)| {
                Ok(StatusLogEntry {
                    order_id,
                    field,
                    old_value,
                    new_value,
                    changed_by,
                    is_override: is_override != 0,
                    reason,
                    changed_at: stored_time(&at)?,
                })
            },
        )
        .collect()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type RawOrder = (
    String,         // id
    String,         // branch_id
    Option<String>, // customer_id
    String,         // staff_id
    String,         // items JSON
    String,         // total_price
    String,         // order_status
    String,         // payment_status
    Option<String>, // payment_method
    String,         // created_at
);

fn raw_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOrder> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
    ))
}

fn order_from_raw(raw: RawOrder) -> Result<Order> {
    let (id, branch, customer, staff, items, total, ostatus, pstatus, method, created) = raw;
    let items: Vec<OrderItem> = serde_json::from_str(&items)
        .map_err(|e| CoreError::Transient(format!("corrupt items column: {e}")))?;
    Ok(Order {
        order_id: id,
        branch_id: branch,
        customer_id: customer,
        staff_id: staff,
        items,
        total_price: stored_money(&total)?,
        order_status: OrderStatus::parse(&ostatus)?,
        payment_status: PaymentStatus::parse(&pstatus)?,
        payment_method: method.as_deref().map(PaymentMethod::parse).transpose()?,
        created_at: stored_time(&created)?,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_state;
    use crate::models::parse_money;

    fn wash_item(qty: i64, price: &str) -> OrderItem {
        OrderItem {
            service_id: "svc-wash".into(),
            quantity: qty,
            unit_price: parse_money(price).unwrap(),
        }
    }

    fn new_order(staff: &str, items: Vec<OrderItem>) -> NewOrder {
        NewOrder {
            branch_id: "br-1".into(),
            customer_id: Some("cust-1".into()),
            staff_id: staff.into(),
            items,
            payment_method: None,
        }
    }

    #[test]
    fn test_create_derives_total_from_items() {
        let db = test_state();
        let id = create_order(
            &db,
            &new_order("staff-1", vec![wash_item(2, "120.50"), wash_item(1, "59.00")]),
        )
        .expect("create");

        let order = get_order(&db, &id).expect("fetch");
        assert_eq!(order.total_price, parse_money("300.00").unwrap());
        assert_eq!(order.order_status, OrderStatus::Pending);
        assert_eq!(order.payment_status, PaymentStatus::Unpaid);
        assert_eq!(order.items.len(), 2);
    }

    #[test]
    fn test_create_rejects_bad_items() {
        let db = test_state();
        assert_eq!(
            create_order(&db, &new_order("staff-1", vec![]))
                .unwrap_err()
                .code(),
            "VALIDATION"
        );
        assert_eq!(
            create_order(&db, &new_order("staff-1", vec![wash_item(0, "10.00")]))
                .unwrap_err()
                .code(),
            "VALIDATION"
        );
        assert_eq!(
            create_order(&db, &new_order("staff-1", vec![wash_item(1, "-5.00")]))
                .unwrap_err()
                .code(),
            "VALIDATION"
        );
    }

    #[test]
    fn test_status_jumps_are_permissive_but_validated() {
        let db = test_state();
        let id = create_order(&db, &new_order("staff-1", vec![wash_item(1, "80.00")]))
            .expect("create");

        // Direct jump Pending -> Picked up is allowed.
        update_order_status(&db, &id, "Picked up", "staff-1").expect("jump");
        assert_eq!(
            get_order(&db, &id).unwrap().order_status,
            OrderStatus::PickedUp
        );

        // Even leaving a terminal state is allowed through the direct selection.
        update_order_status(&db, &id, "Ongoing", "staff-1").expect("back out");

        // But unknown labels never pass.
        assert_eq!(
            update_order_status(&db, &id, "Folded", "staff-1")
                .unwrap_err()
                .code(),
            "VALIDATION"
        );
    }

    #[test]
    fn test_status_update_unknown_order() {
        let db = test_state();
        assert_eq!(
            update_order_status(&db, "no-such", "Ongoing", "staff-1")
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_status_changes_are_audited() {
        let db = test_state();
        let id = create_order(&db, &new_order("staff-1", vec![wash_item(1, "80.00")]))
            .expect("create");

        update_order_status(&db, &id, "Ongoing", "staff-2").expect("update");
        update_order_status(&db, &id, "Ready for Pickup", "staff-3").expect("update");

        let log = status_log(&db, &id).expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].old_value, "Pending");
        assert_eq!(log[0].new_value, "Ongoing");
        assert_eq!(log[0].changed_by, "staff-2");
        assert!(!log[0].is_override);
        assert_eq!(log[1].new_value, "Ready for Pickup");
        assert_eq!(log[1].changed_by, "staff-3");
    }

    #[test]
    fn test_time_range_is_half_open() {
        let db = test_state();
        {
            let conn = db.lock().unwrap();
            for (id, at) in [
                ("ord-a", "2025-03-01T09:59:00+00:00"),
                ("ord-b", "2025-03-01T10:00:00+00:00"),
                ("ord-c", "2025-03-01T11:59:00+00:00"),
                ("ord-d", "2025-03-01T12:00:00+00:00"),
            ] {
                conn.execute(
                    "INSERT INTO orders (id, branch_id, staff_id, items, total_price,
                                         created_at, updated_at)
                     VALUES (?1, 'br-1', 'staff-1', '[]', '100.00', ?2, ?2)",
                    params![id, at],
                )
                .expect("insert order");
            }
        }

        let start = "2025-03-01T10:00:00+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let end = "2025-03-01T12:00:00+00:00"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let hits = find_by_staff_and_time_range(&db, "staff-1", start, end).expect("query");

        let ids: Vec<&str> = hits.iter().map(|o| o.order_id.as_str()).collect();
        assert_eq!(ids, vec!["ord-b", "ord-c"], "start inclusive, end exclusive");
    }
}
