//! Partner pairing for active shifts.
//!
//! A partner is a second staff member jointly credited for a shift's work.
//! Pairing never changes attribution ownership - the primary staff remains
//! the attribution key. All three operations require the target shift to be
//! active; a closed shift is immutable.
//!
//! Partner exclusivity across shifts is intentionally NOT enforced: by
//! convention a partner works with one primary at a time, but the product
//! has not made that a hard rule.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use tracing::info;

use crate::db::DbState;
use crate::errors::{CoreError, Result};

/// Set (or overwrite) the partner on an active shift.
pub fn add_partner(db: &DbState, shift_id: &str, partner_staff_id: &str) -> Result<()> {
    if partner_staff_id.trim().is_empty() {
        return Err(CoreError::Validation(
            "partner_staff_id must not be blank".into(),
        ));
    }

    let conn = db.lock()?;

    let primary: Option<String> = conn
        .query_row(
            "SELECT primary_staff_id FROM staff_shifts WHERE id = ?1",
            params![shift_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CoreError::Transient(format!("query shift: {e}")))?;
    match primary {
        None => return Err(CoreError::NotFound(format!("shift not found: {shift_id}"))),
        Some(primary) if primary == partner_staff_id => {
            return Err(CoreError::Validation(
                "staff cannot partner with themselves".into(),
            ));
        }
        Some(_) => {}
    }

    let changed = set_partner(&conn, shift_id, Some(partner_staff_id))?;
    if changed == 0 {
        return Err(CoreError::Precondition("shift not active".into()));
    }

    info!(shift_id = %shift_id, partner = %partner_staff_id, "Partner added");
    Ok(())
}

/// Clear the partner on an active shift.
pub fn remove_partner(db: &DbState, shift_id: &str) -> Result<()> {
    let conn = db.lock()?;

    let exists: Option<String> = conn
        .query_row(
            "SELECT id FROM staff_shifts WHERE id = ?1",
            params![shift_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CoreError::Transient(format!("query shift: {e}")))?;
    if exists.is_none() {
        return Err(CoreError::NotFound(format!("shift not found: {shift_id}")));
    }

    let changed = set_partner(&conn, shift_id, None)?;
    if changed == 0 {
        return Err(CoreError::Precondition("shift not active".into()));
    }

    info!(shift_id = %shift_id, "Partner removed");
    Ok(())
}

/// Replace the current partner with a new one. The overwrite semantics are
/// the same as [`add_partner`]; the last call wins.
pub fn switch_partner(db: &DbState, shift_id: &str, new_partner_staff_id: &str) -> Result<()> {
    add_partner(db, shift_id, new_partner_staff_id)
}

/// Conditional write: only an active shift may be repaired. Returns the
/// number of rows changed (0 means the shift exists but is closed).
/// Every pairing change stamps `updated_at`.
fn set_partner(
    conn: &rusqlite::Connection,
    shift_id: &str,
    partner: Option<&str>,
) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE staff_shifts SET partner_staff_id = ?1, updated_at = ?2
         WHERE id = ?3 AND is_active = 1",
        params![partner, now, shift_id],
    )
    .map_err(|e| CoreError::Transient(format!("update partner: {e}")))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_state;
    use crate::shifts::{end_shift, get_active_shift, open_shift, OpenShift};

    fn open_solo(db: &DbState, staff: &str) -> String {
        open_shift(
            db,
            &OpenShift {
                primary_staff_id: staff.into(),
                branch_id: "br-1".into(),
                partner_staff_id: None,
            },
        )
        .expect("open shift")
    }

    #[test]
    fn test_add_and_remove_partner() {
        let db = test_state();
        let shift_id = open_solo(&db, "staff-1");

        add_partner(&db, &shift_id, "staff-2").expect("add");
        let shift = get_active_shift(&db, "staff-1").unwrap().unwrap();
        assert_eq!(shift.partner_staff_id.as_deref(), Some("staff-2"));

        remove_partner(&db, &shift_id).expect("remove");
        let shift = get_active_shift(&db, "staff-1").unwrap().unwrap();
        assert_eq!(shift.partner_staff_id, None);
    }

    #[test]
    fn test_switch_partner_last_call_wins() {
        let db = test_state();
        let shift_id = open_solo(&db, "staff-1");

        add_partner(&db, &shift_id, "staff-2").expect("add");
        switch_partner(&db, &shift_id, "staff-3").expect("switch");

        let shift = get_active_shift(&db, "staff-1").unwrap().unwrap();
        assert_eq!(
            shift.partner_staff_id.as_deref(),
            Some("staff-3"),
            "exactly one partner, second call's value wins"
        );
    }

    #[test]
    fn test_pairing_change_stamps_updated_at() {
        let db = test_state();
        let shift_id = open_solo(&db, "staff-1");
        let before = get_active_shift(&db, "staff-1").unwrap().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        add_partner(&db, &shift_id, "staff-2").expect("add");

        let after = get_active_shift(&db, "staff-1").unwrap().unwrap();
        assert!(after.updated_at > before.updated_at);
    }

    #[test]
    fn test_pairing_on_closed_shift_fails_precondition() {
        let db = test_state();
        let shift_id = open_solo(&db, "staff-1");
        end_shift(&db, "staff-1").expect("close");

        for result in [
            add_partner(&db, &shift_id, "staff-2"),
            remove_partner(&db, &shift_id),
            switch_partner(&db, &shift_id, "staff-3"),
        ] {
            match result {
                Err(CoreError::Precondition(msg)) => assert_eq!(msg, "shift not active"),
                other => panic!("expected Precondition, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_pairing_on_unknown_shift_fails_not_found() {
        let db = test_state();
        assert_eq!(
            add_partner(&db, "no-such-shift", "staff-2")
                .unwrap_err()
                .code(),
            "NOT_FOUND"
        );
        assert_eq!(
            remove_partner(&db, "no-such-shift").unwrap_err().code(),
            "NOT_FOUND"
        );
    }

    #[test]
    fn test_self_pairing_rejected() {
        let db = test_state();
        let shift_id = open_solo(&db, "staff-1");
        assert_eq!(
            add_partner(&db, &shift_id, "staff-1").unwrap_err().code(),
            "VALIDATION"
        );
    }

    #[test]
    fn test_partner_exclusivity_not_enforced() {
        let db = test_state();
        let s1 = open_solo(&db, "staff-1");
        let s2 = open_solo(&db, "staff-2");

        // The same partner may be paired onto two open shifts.
        add_partner(&db, &s1, "staff-9").expect("pair on first");
        add_partner(&db, &s2, "staff-9").expect("pair on second");
    }
}
