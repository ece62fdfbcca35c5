//! Shift lifecycle management for WashTrack.
//!
//! A shift is one continuous work session for a staff member, optionally
//! paired with a partner. Invariant: a staff member has at most one active
//! shift at any time. The check-then-insert runs inside an immediate
//! transaction and the store backs it with a partial unique index, so the
//! invariant holds even when two requests race.
//!
//! State machine: NoShift -> Active (open) -> Closed (end). Closed is
//! terminal; working again means opening a new shift.

use chrono::{NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use crate::db::{self, DbState};
use crate::errors::{CoreError, Result};
use crate::models::{stored_date, stored_time, Shift};

/// Request to open a shift.
#[derive(Debug, Clone)]
pub struct OpenShift {
    pub primary_staff_id: String,
    pub branch_id: String,
    pub partner_staff_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Open shift
// ---------------------------------------------------------------------------

/// Open a new shift for a staff member. Returns the new shift id.
///
/// Fails with `Conflict` if the staff member already has an active shift.
pub fn open_shift(db: &DbState, req: &OpenShift) -> Result<String> {
    if req.primary_staff_id.trim().is_empty() {
        return Err(CoreError::Validation("primary_staff_id is required".into()));
    }
    if req.branch_id.trim().is_empty() {
        return Err(CoreError::Validation("branch_id is required".into()));
    }
    if let Some(partner) = &req.partner_staff_id {
        if partner.trim().is_empty() {
            return Err(CoreError::Validation(
                "partner_staff_id must not be blank".into(),
            ));
        }
        if *partner == req.primary_staff_id {
            return Err(CoreError::Validation(
                "staff cannot partner with themselves".into(),
            ));
        }
    }

    let conn = db.lock()?;

    let shift_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let now_str = now.to_rfc3339();
    let shift_date = now.format("%Y-%m-%d").to_string();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| CoreError::Transient(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<()> {
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM staff_shifts WHERE primary_staff_id = ?1 AND is_active = 1",
                params![req.primary_staff_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::Transient(format!("check active shift: {e}")))?;

        if let Some(existing_id) = existing {
            return Err(CoreError::Conflict(format!(
                "active shift already exists ({existing_id})"
            )));
        }

        conn.execute(
            "INSERT INTO staff_shifts (
                id, primary_staff_id, partner_staff_id, branch_id,
                shift_date, start_time, end_time, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, 1, ?6, ?6)",
            params![
                shift_id,
                req.primary_staff_id,
                req.partner_staff_id,
                req.branch_id,
                shift_date,
                now_str,
            ],
        )
        .map_err(|e| {
            // Unique-index backstop for the race the pre-check can miss.
            if db::is_constraint_violation(&e) {
                CoreError::Conflict("active shift already exists".into())
            } else {
                CoreError::Transient(format!("insert shift: {e}"))
            }
        })?;

        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| CoreError::Transient(format!("commit: {e}")))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(
        shift_id = %shift_id,
        staff_id = %req.primary_staff_id,
        partner = req.partner_staff_id.as_deref().unwrap_or("-"),
        "Shift opened"
    );

    Ok(shift_id)
}

// ---------------------------------------------------------------------------
// End shift
// ---------------------------------------------------------------------------

/// Close the active shift for a staff member and return the closed record.
///
/// Fails with `NotFound` if no active shift exists. A closed shift is
/// immutable thereafter.
pub fn end_shift(db: &DbState, staff_id: &str) -> Result<Shift> {
    let conn = db.lock()?;
    let now = Utc::now().to_rfc3339();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| CoreError::Transient(format!("begin transaction: {e}")))?;

    let result = (|| -> Result<Shift> {
        let shift_id: Option<String> = conn
            .query_row(
                "SELECT id FROM staff_shifts WHERE primary_staff_id = ?1 AND is_active = 1",
                params![staff_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| CoreError::Transient(format!("find active shift: {e}")))?;

        let shift_id = shift_id.ok_or_else(|| {
            CoreError::NotFound(format!("no active shift for staff {staff_id}"))
        })?;

        conn.execute(
            "UPDATE staff_shifts SET end_time = ?1, is_active = 0, updated_at = ?1
             WHERE id = ?2 AND is_active = 1",
            params![now, shift_id],
        )
        .map_err(|e| CoreError::Transient(format!("close shift: {e}")))?;

        let shift = query_shift(
            &conn,
            "SELECT id, primary_staff_id, partner_staff_id, branch_id, shift_date,
                    start_time, end_time, is_active, updated_at
             FROM staff_shifts WHERE id = ?1",
            params![shift_id],
        )?
        .ok_or_else(|| CoreError::Transient("closed shift row disappeared".into()))?;

        Ok(shift)
    })();

    match result {
        Ok(shift) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| CoreError::Transient(format!("commit: {e}")))?;
            info!(shift_id = %shift.shift_id, staff_id = %staff_id, "Shift closed");
            Ok(shift)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Shift queries
// ---------------------------------------------------------------------------

/// Get the active shift for a staff member, if any. Pure lookup.
pub fn get_active_shift(db: &DbState, staff_id: &str) -> Result<Option<Shift>> {
    let conn = db.lock()?;
    query_shift(
        &conn,
        "SELECT id, primary_staff_id, partner_staff_id, branch_id, shift_date,
                start_time, end_time, is_active, updated_at
         FROM staff_shifts
         WHERE primary_staff_id = ?1 AND is_active = 1 LIMIT 1",
        params![staff_id],
    )
}

/// All shifts (active or closed) belonging to a staff member on a date,
/// oldest first. A day may contain several windows if the staff member
/// started and ended more than once.
pub fn find_by_staff_and_date(db: &DbState, staff_id: &str, date: NaiveDate) -> Result<Vec<Shift>> {
    let conn = db.lock()?;
    find_by_staff_and_date_locked(&conn, staff_id, date)
}

/// Same as [`find_by_staff_and_date`] but on an already-locked connection,
/// for use inside the attribution calculator.
pub(crate) fn find_by_staff_and_date_locked(
    conn: &Connection,
    staff_id: &str,
    date: NaiveDate,
) -> Result<Vec<Shift>> {
    let date_str = date.format("%Y-%m-%d").to_string();
    let mut stmt = conn
        .prepare(
            "SELECT id, primary_staff_id, partner_staff_id, branch_id, shift_date,
                    start_time, end_time, is_active, updated_at
             FROM staff_shifts
             WHERE primary_staff_id = ?1 AND shift_date = ?2
             ORDER BY start_time ASC",
        )
        .map_err(|e| CoreError::Transient(format!("prepare shift query: {e}")))?;

    let raw: Vec<RawShift> = stmt
        .query_map(params![staff_id, date_str], raw_shift)
        .map_err(|e| CoreError::Transient(format!("query shifts: {e}")))?
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| CoreError::Transient(format!("read shift row: {e}")))?;

    raw.into_iter().map(shift_from_raw).collect()
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

type RawShift = (
    String,         // id
    String,         // primary_staff_id
    Option<String>, // partner_staff_id
    String,         // branch_id
    String,         // shift_date
    String,         // start_time
    Option<String>, // end_time
    i64,            // is_active
    String,         // updated_at
);

fn raw_shift(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawShift> {
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
    ))
}

fn shift_from_raw(raw: RawShift) -> Result<Shift> {
    let (id, primary, partner, branch, date, start, end, active, updated) = raw;
    Ok(Shift {
        shift_id: id,
        primary_staff_id: primary,
        partner_staff_id: partner,
        branch_id: branch,
        shift_date: stored_date(&date)?,
        start_time: stored_time(&start)?,
        end_time: end.as_deref().map(stored_time).transpose()?,
        is_active: active != 0,
        updated_at: stored_time(&updated)?,
    })
}

pub(crate) fn query_shift<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Option<Shift>> {
    let raw = conn
        .query_row(sql, params, raw_shift)
        .optional()
        .map_err(|e| CoreError::Transient(format!("query shift: {e}")))?;
    raw.map(shift_from_raw).transpose()
}

// ===========================================================================
// Tests
// ===========================================================================
