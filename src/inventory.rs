//! Inventory usage events.
//!
//! Consumption records (detergent, fabric softener, plastic, ...) tied to an
//! order or a manual adjustment. The core only tracks usage for attribution;
//! procurement and stock levels live elsewhere in the dashboard.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::db::DbState;
use crate::errors::{CoreError, Result};
use crate::models::{stored_time, InventoryUsageEvent};

/// Request to record a consumption event.
#[derive(Debug, Clone)]
pub struct NewUsage {
    pub stock_id: String,
    pub stock_name: String,
    pub quantity_used: i64,
    pub branch_id: String,
    /// Order that consumed the stock, if any (manual adjustments have none).
    pub order_id: Option<String>,
    /// Defaults to now when absent.
    pub usage_date: Option<DateTime<Utc>>,
}

/// Record a usage event. Returns the new event id.
pub fn record_usage(db: &DbState, req: &NewUsage) -> Result<String> {
    if req.stock_id.trim().is_empty() {
        return Err(CoreError::Validation("stock_id is required".into()));
    }
    if req.branch_id.trim().is_empty() {
        return Err(CoreError::Validation("branch_id is required".into()));
    }
    if req.quantity_used <= 0 {
        return Err(CoreError::Validation(
            "quantity_used must be positive".into(),
        ));
    }

    let conn = db.lock()?;
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let usage_date = req.usage_date.unwrap_or(now);

    conn.execute(
        "INSERT INTO inventory_usage (
            id, stock_id, stock_name, quantity_used, usage_date, branch_id, order_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            req.stock_id,
            req.stock_name,
            req.quantity_used,
            usage_date.to_rfc3339(),
            req.branch_id,
            req.order_id,
            now.to_rfc3339(),
        ],
    )
    .map_err(|e| CoreError::Transient(format!("insert usage event: {e}")))?;

    info!(
        stock_id = %req.stock_id,
        quantity = req.quantity_used,
        branch_id = %req.branch_id,
        "Inventory usage recorded"
    );

    Ok(id)
}

/// Usage events with `usage_date` in `[start, end)`, oldest first.
pub fn find_by_time_range(
    db: &DbState,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<InventoryUsageEvent>> {
    let conn = db.lock()?;
    find_by_time_range_locked(&conn, start, end)
}

pub(crate) fn find_by_time_range_locked(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<InventoryUsageEvent>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, stock_id, stock_name, quantity_used, usage_date, branch_id, order_id
             FROM inventory_usage
             WHERE usage_date >= ?1 AND usage_date < ?2
             ORDER BY usage_date ASC",
        )
        .map_err(|e| CoreError::Transient(format!("prepare usage query: {e}")))?;

    let raw: Vec<(
        String,
        String,
        String,
        i64,
        String,
        String,
        Option<String>,
    )> = stmt
        .query_map(params![start.to_rfc3339(), end.to_rfc3339()], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
            ))
        })
        .map_err(|e| CoreError::Transient(format!("query usage events: {e}")))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CoreError::Transient(format!("read usage row: {e}")))?;

    raw.into_iter()
        .map(|(id, stock_id, stock_name, qty, date, branch_id, order_id)| {
            Ok(InventoryUsageEvent {
                id,
                stock_id,
                stock_name,
                quantity_used: qty,
                usage_date: stored_time(&date)?,
                branch_id,
                order_id,
            })
        })
        .collect()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_state;

    fn usage(stock: &str, qty: i64, at: &str) -> NewUsage {
        NewUsage {
            stock_id: stock.into(),
            stock_name: format!("{stock} name"),
            quantity_used: qty,
            branch_id: "br-1".into(),
            order_id: None,
            usage_date: Some(at.parse::<DateTime<Utc>>().unwrap()),
        }
    }

    #[test]
    fn test_record_and_query_by_range() {
        let db = test_state();
        record_usage(&db, &usage("stk-soap", 2, "2025-03-01T09:00:00+00:00")).expect("early");
        record_usage(&db, &usage("stk-soap", 3, "2025-03-01T10:30:00+00:00")).expect("inside");
        record_usage(&db, &usage("stk-bags", 1, "2025-03-01T12:00:00+00:00")).expect("at end");

        let start = "2025-03-01T10:00:00+00:00".parse::<DateTime<Utc>>().unwrap();
        let end = "2025-03-01T12:00:00+00:00".parse::<DateTime<Utc>>().unwrap();
        let events = find_by_time_range(&db, start, end).expect("query");

        assert_eq!(events.len(), 1, "window end is exclusive");
        assert_eq!(events[0].stock_id, "stk-soap");
        assert_eq!(events[0].quantity_used, 3);
    }

    #[test]
    fn test_usage_date_defaults_to_now() {
        let db = test_state();
        let before = Utc::now();
        record_usage(
            &db,
            &NewUsage {
                stock_id: "stk-soap".into(),
                stock_name: "Detergent".into(),
                quantity_used: 1,
                branch_id: "br-1".into(),
                order_id: None,
                usage_date: None,
            },
        )
        .expect("record");

        let events =
            find_by_time_range(&db, before, Utc::now() + chrono::Duration::seconds(1))
                .expect("query");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let db = test_state();
        for qty in [0, -3] {
            assert_eq!(
                record_usage(&db, &usage("stk-soap", qty, "2025-03-01T09:00:00+00:00"))
                    .unwrap_err()
                    .code(),
                "VALIDATION"
            );
        }
    }
}
