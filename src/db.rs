//! Local SQLite store for the WashTrack core.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings
//! helpers, and the shared connection state passed to every operation.
//!
//! The one cross-request invariant in the system - at most one active shift
//! per staff member - is enforced here with a partial unique index on
//! `staff_shifts(primary_staff_id) WHERE is_active = 1`, so it holds even if
//! two requests race past the application-level pre-check.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::errors::{CoreError, Result};

/// Shared state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Lock the connection for one request.
    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| CoreError::Transient("database lock poisoned".into()))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Initialize the database at `{data_dir}/washtrack.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState> {
    fs::create_dir_all(data_dir)
        .map_err(|e| CoreError::Transient(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("washtrack.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)
                .map_err(|e| CoreError::Transient(format!("database open after retry: {e}")))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).map_err(|e| CoreError::Transient(format!("sqlite open: {e}")))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| CoreError::Transient(format!("pragma setup: {e}")))?;

    Ok(conn)
}

/// True when a write failed on a UNIQUE/CHECK constraint rather than on I/O.
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| CoreError::Transient(format!("create schema_version: {e}")))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }
    if current < 3 {
        migrate_v3(conn)?;
    }
    if current < 4 {
        migrate_v4(conn)?;
    }

    Ok(())
}

/// Migration v1: settings store and staff registry.
fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- staff registry (identity, branch, role)
        CREATE TABLE IF NOT EXISTS staff (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'staff'
                CHECK (role IN ('admin', 'manager', 'staff')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key
            ON local_settings(setting_category, setting_key);
        CREATE INDEX IF NOT EXISTS idx_staff_branch_id ON staff(branch_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        CoreError::Transient(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (settings + staff)");
    Ok(())
}

/// Migration v2: shift tracking.
fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- staff_shifts (one row per work session)
        CREATE TABLE IF NOT EXISTS staff_shifts (
            id TEXT PRIMARY KEY,
            primary_staff_id TEXT NOT NULL,
            partner_staff_id TEXT,
            branch_id TEXT NOT NULL,
            shift_date TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Invariant: at most one active shift per staff member.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_staff_shifts_one_active
            ON staff_shifts(primary_staff_id) WHERE is_active = 1;

        CREATE INDEX IF NOT EXISTS idx_staff_shifts_staff_date
            ON staff_shifts(primary_staff_id, shift_date);
        CREATE INDEX IF NOT EXISTS idx_staff_shifts_branch_id
            ON staff_shifts(branch_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        CoreError::Transient(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (staff_shifts)");
    Ok(())
}

/// Migration v3: orders and the status audit log.
fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- orders (items as JSON, amounts as exact-decimal TEXT)
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            branch_id TEXT NOT NULL,
            customer_id TEXT,
            staff_id TEXT NOT NULL,
            items TEXT NOT NULL DEFAULT '[]',
            total_price TEXT NOT NULL DEFAULT '0',
            order_status TEXT NOT NULL DEFAULT 'Pending'
                CHECK (order_status IN
                    ('Pending', 'Ongoing', 'Ready for Pickup', 'Picked up', 'Cancelled')),
            payment_status TEXT NOT NULL DEFAULT 'Unpaid'
                CHECK (payment_status IN ('Unpaid', 'Paid', 'Refunded')),
            payment_method TEXT
                CHECK (payment_method IS NULL OR payment_method IN ('cash', 'gcash')),
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            updated_by TEXT
        );

        -- order_status_log (who changed which status field, and how)
        CREATE TABLE IF NOT EXISTS order_status_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            order_id TEXT NOT NULL,
            field TEXT NOT NULL CHECK (field IN ('order_status', 'payment_status')),
            old_value TEXT NOT NULL,
            new_value TEXT NOT NULL,
            changed_by TEXT NOT NULL,
            is_override INTEGER NOT NULL DEFAULT 0,
            reason TEXT,
            changed_at TEXT NOT NULL,
            FOREIGN KEY(order_id) REFERENCES orders(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_orders_staff_created
            ON orders(staff_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_orders_branch_id ON orders(branch_id);
        CREATE INDEX IF NOT EXISTS idx_order_status_log_order_id
            ON order_status_log(order_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        CoreError::Transient(format!("migration v3: {e}"))
    })?;

    info!("Applied migration v3 (orders + order_status_log)");
    Ok(())
}

/// Migration v4: inventory usage events.
fn migrate_v4(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- inventory_usage (consumption tied to an order or manual adjustment)
        CREATE TABLE IF NOT EXISTS inventory_usage (
            id TEXT PRIMARY KEY,
            stock_id TEXT NOT NULL,
            stock_name TEXT NOT NULL,
            quantity_used INTEGER NOT NULL CHECK (quantity_used > 0),
            usage_date TEXT NOT NULL,
            branch_id TEXT NOT NULL,
            order_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_inventory_usage_date
            ON inventory_usage(usage_date);
        CREATE INDEX IF NOT EXISTS idx_inventory_usage_stock_id
            ON inventory_usage(stock_id);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (4);
        ",
    )
    .map_err(|e| {
        error!("Migration v4 failed: {e}");
        CoreError::Transient(format!("migration v4: {e}"))
    })?;

    info!("Applied migration v4 (inventory_usage)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| CoreError::Transient(format!("set_setting: {e}")))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Staff registry
// ---------------------------------------------------------------------------

/// Insert or update a staff record (admin collaborators drive this).
pub fn upsert_staff(db: &DbState, staff: &crate::models::Staff) -> Result<()> {
    let conn = db.lock()?;
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO staff (id, name, branch_id, role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            branch_id = excluded.branch_id,
            role = excluded.role,
            updated_at = excluded.updated_at",
        params![
            staff.id,
            staff.name,
            staff.branch_id,
            staff.role.as_str(),
            now
        ],
    )
    .map_err(|e| CoreError::Transient(format!("upsert staff: {e}")))?;
    Ok(())
}

/// Look up a staff member's display name.
pub fn staff_name(conn: &Connection, staff_id: &str) -> Option<String> {
    conn.query_row(
        "SELECT name FROM staff WHERE id = ?1",
        params![staff_id],
        |row| row.get(0),
    )
    .ok()
}

/// Install a tracing subscriber for test runs, once per process. Honors
/// `RUST_LOG`; output goes through the test writer so it stays captured.
#[cfg(test)]
fn init_test_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Open an in-memory store with all migrations applied (test helper).
#[cfg(test)]
pub fn test_state() -> DbState {
    init_test_tracing();
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations(&conn).expect("run_migrations should succeed in test");
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
