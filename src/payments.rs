//! Payment status machine with the "Paid" terminal lock.
//!
//! Progression: Unpaid -> Paid -> Refunded. Once an order reaches Paid, the
//! normal edit path is locked: [`update_payment_status`] fails with
//! `Precondition` for every target status. Leaving Paid requires the
//! distinct administrative path [`override_payment_status`], which demands a
//! reason and writes a flagged audit row.
//!
//! The check and the write run inside one immediate transaction, so the lock
//! holds under concurrent access.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::{info, warn};

use crate::db::DbState;
use crate::errors::{CoreError, Result};
use crate::models::PaymentStatus;
use crate::orders::log_status_change;

/// Set the payment status of an order through the normal edit path.
///
/// Fails with `Precondition` if the order is currently Paid; use
/// [`override_payment_status`] for that.
pub fn update_payment_status(
    db: &DbState,
    order_id: &str,
    new_status: &str,
    acting_staff_id: &str,
) -> Result<()> {
    let status = PaymentStatus::parse(new_status)?;
    write_payment_status(db, order_id, status, acting_staff_id, false, None)
}

/// Administrative override: move an order out of (or into) any payment
/// status, bypassing the Paid lock. Requires a reason for the audit trail.
pub fn override_payment_status(
    db: &DbState,
    order_id: &str,
    new_status: &str,
    acting_staff_id: &str,
    reason: &str,
) -> Result<()> {
    let status = PaymentStatus::parse(new_status)?;
    if reason.trim().is_empty() {
        return Err(CoreError::Validation(
            "override requires a non-empty reason".into(),
        ));
    }
    write_payment_status(db, order_id, status, acting_staff_id, true, Some(reason))
}

fn write_payment_status(
    db: &DbState,
    order_id: &str,
    status: PaymentStatus,
    acting_staff_id: &str,
    is_override: bool,
    reason: Option<&str>,
) -> Result<()> {
    let conn = db.lock()?;
    let now = Utc::now().to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| CoreError::Transient(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<String> {
        let current: Option<String> = conn
            .query_row(
                "SELECT payment_status FROM orders WHERE id = ?1",
                params![order_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::Transient(format!("query order: {e}")))?;

        let current =
            current.ok_or_else(|| CoreError::NotFound(format!("order not found: {order_id}")))?;

        if !is_override && current == PaymentStatus::Paid.as_str() {
            return Err(CoreError::Precondition(
                "payment status is locked as Paid; administrative override required".into(),
            ));
        }

        conn.execute(
            "UPDATE orders SET payment_status = ?1, updated_at = ?2, updated_by = ?3
             WHERE id = ?4",
            params![status.as_str(), now, acting_staff_id, order_id],
        )
        .map_err(|e| CoreError::Transient(format!("update payment status: {e}")))?;

        log_status_change(
            &conn,
            order_id,
            "payment_status",
            &current,
            status.as_str(),
            acting_staff_id,
            is_override,
            reason,
            &now,
        )?;

        Ok(current)
    })();

    match result {
        Ok(previous) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| CoreError::Transient(format!("commit: {e}")))?;
            if is_override {
                warn!(
                    order_id = %order_id,
                    from = %previous,
                    to = %status.as_str(),
                    staff_id = %acting_staff_id,
                    reason = reason.unwrap_or(""),
                    "Payment status changed via administrative override"
                );
            } else {
                info!(
                    order_id = %order_id,
                    from = %previous,
                    to = %status.as_str(),
                    staff_id = %acting_staff_id,
                    "Payment status updated"
                );
            }
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
