//! Local SQLite database layer for tableside.
//!
//! Uses rusqlite with WAL mode so several polling UI sessions (waiter
//! terminals, kitchen display, admin console) can share one store. Provides
//! schema migrations, settings helpers, and the shared connection state
//! passed explicitly to every operation.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::PosError;

/// Shared state holding the database connection.
///
/// The connection is an explicit dependency of every catalog/ledger/billing
/// operation; there is no ambient or global handle.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 3;

/// Initialize the database at `{data_dir}/tableside.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// runs any pending migrations, and seeds the default menu on first run.
/// On corruption or open failure, deletes the file and retries once.
pub fn init(data_dir: &Path) -> Result<DbState, PosError> {
    fs::create_dir_all(data_dir)?;

    let db_path = data_dir.join("tableside.db");
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
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;
    crate::catalog::seed_default_menu(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, PosError> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), PosError> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

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

    Ok(())
}

/// Migration v1: menu catalog, order ledger, local settings.
fn migrate_v1(conn: &Connection) -> Result<(), PosError> {
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

        -- menu (priced catalog; name is the natural key)
        CREATE TABLE IF NOT EXISTS menu (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            price REAL NOT NULL CHECK (price >= 0)
        );

        -- orders (one row per add-to-order action; price is a snapshot)
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            table_id INTEGER NOT NULL,
            section_id INTEGER NOT NULL,
            item TEXT NOT NULL,
            qty INTEGER NOT NULL CHECK (qty >= 1),
            status TEXT NOT NULL DEFAULT 'preparing'
                CHECK (status IN ('preparing', 'ready', 'served')),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            price REAL NOT NULL DEFAULT 0
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_orders_table_section ON orders(table_id, section_id);
        CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
        CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        e
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: legacy chair/group split-bill assignments.
fn migrate_v2(conn: &Connection) -> Result<(), PosError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chair_groups (
            table_id INTEGER NOT NULL,
            chair_id INTEGER NOT NULL,
            group_id INTEGER NOT NULL DEFAULT 1,
            PRIMARY KEY (table_id, chair_id)
        );

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        e
    })?;

    info!("Applied migration v2 (chair_groups table)");
    Ok(())
}

/// Migration v3: take-away (parcel) flag on order lines.
fn migrate_v3(conn: &Connection) -> Result<(), PosError> {
    conn.execute_batch(
        "
        ALTER TABLE orders ADD COLUMN is_parcel INTEGER NOT NULL DEFAULT 0;

        INSERT INTO schema_version (version) VALUES (3);
        ",
    )
    .map_err(|e| {
        error!("Migration v3 failed: {e}");
        e
    })?;

    info!("Applied migration v3 (is_parcel column)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a setting value, or `None` if unset.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), PosError> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )?;
    Ok(())
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    /// Open an in-memory database and apply pragmas (mirrors open_and_configure).
    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        conn
    }

    /// Helper: list table names in the database.
    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        stmt.query_map([], |row| row.get(0))
            .expect("query tables")
            .collect::<Result<Vec<String>, _>>()
            .expect("collect tables")
    }

    #[test]
    fn test_migrations_create_all_tables() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let tables = table_names(&conn);
        for expected in ["chair_groups", "local_settings", "menu", "orders"] {
            assert!(
                tables.iter().any(|t| t == expected),
                "missing table {expected}"
            );
        }
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = test_db();
        run_migrations(&conn).expect("first run");
        run_migrations(&conn).expect("second run");

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_orders_check_constraints() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        // qty = 0 rejected at the store layer
        let zero_qty = conn.execute(
            "INSERT INTO orders (table_id, section_id, item, qty, price) VALUES (1, 1, 'Dosa', 0, 40.0)",
            [],
        );
        assert!(zero_qty.is_err(), "qty = 0 should be rejected");

        // Unknown status text rejected
        let bad_status = conn.execute(
            "INSERT INTO orders (table_id, section_id, item, qty, status, price)
             VALUES (1, 1, 'Dosa', 1, 'burnt', 40.0)",
            [],
        );
        assert!(bad_status.is_err(), "invalid status should be rejected");

        // Negative menu price rejected
        let bad_price = conn.execute("INSERT INTO menu (name, price) VALUES ('Dosa', -1.0)", []);
        assert!(bad_price.is_err(), "negative price should be rejected");
    }

    #[test]
    fn test_menu_name_unique() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute("INSERT INTO menu (name, price) VALUES ('Dosa', 40.0)", [])
            .expect("first insert");
        let dup = conn.execute("INSERT INTO menu (name, price) VALUES ('Dosa', 50.0)", []);
        assert!(dup.is_err(), "duplicate menu name should be rejected");
    }

    #[test]
    fn test_chair_groups_primary_key_replaces() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        conn.execute(
            "INSERT OR REPLACE INTO chair_groups VALUES (3, 2, 1)",
            [],
        )
        .expect("insert assignment");
        conn.execute(
            "INSERT OR REPLACE INTO chair_groups VALUES (3, 2, 4)",
            [],
        )
        .expect("replace assignment");

        let group: i64 = conn
            .query_row(
                "SELECT group_id FROM chair_groups WHERE table_id = 3 AND chair_id = 2",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(group, 4);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chair_groups", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1, "PK should keep one row per (table, chair)");
    }

    #[test]
    fn test_settings_crud() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        set_setting(&conn, "catalog", "seeded", "1").expect("set");
        assert_eq!(
            get_setting(&conn, "catalog", "seeded"),
            Some("1".to_string())
        );

        // Update
        set_setting(&conn, "catalog", "seeded", "2").expect("update");
        assert_eq!(
            get_setting(&conn, "catalog", "seeded"),
            Some("2".to_string())
        );

        // Unset key
        assert!(get_setting(&conn, "catalog", "missing").is_none());
    }

    #[test]
    fn test_migrations_do_not_seed_menu() {
        let conn = test_db();
        run_migrations(&conn).expect("migrations");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM menu", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "seeding belongs to catalog::seed_default_menu");
        assert!(get_setting(&conn, "catalog", "seeded").is_none());
    }
}
