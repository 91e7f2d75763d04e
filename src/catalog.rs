//! Menu catalog for tableside.
//!
//! CRUD over named, priced menu items, plus the `price_of` lookup the order
//! ledger uses to snapshot prices at insert time. The catalog seeds itself
//! from `DEFAULT_MENU` exactly once on first run; emptying it later never
//! re-seeds (the one-shot marker lives in `local_settings`).

use rusqlite::{params, Connection, ErrorCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::db::{self, DbState};
use crate::error::PosError;
use crate::DEFAULT_MENU;

/// A priced catalog entry. `name` is the natural key for lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

fn validate(name: &str, price: f64) -> Result<(), PosError> {
    if name.trim().is_empty() {
        return Err(PosError::InvalidName);
    }
    if price < 0.0 {
        return Err(PosError::InvalidPrice(price));
    }
    Ok(())
}

/// List all menu items sorted by name. Side-effect-free.
pub fn list_items(db: &DbState) -> Result<Vec<MenuItem>, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let mut stmt = conn.prepare("SELECT id, name, price FROM menu ORDER BY name")?;
    let items = stmt
        .query_map([], |row| {
            Ok(MenuItem {
                id: row.get(0)?,
                name: row.get(1)?,
                price: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Create a new menu item. Fails with `DuplicateName` if the name is taken
/// (case-sensitive exact match on the stored name).
pub fn add_item(db: &DbState, name: &str, price: f64) -> Result<MenuItem, PosError> {
    validate(name, price)?;
    let name = name.trim();

    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    match conn.execute(
        "INSERT INTO menu (name, price) VALUES (?1, ?2)",
        params![name, price],
    ) {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(PosError::DuplicateName(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    }

    let id = conn.last_insert_rowid();
    info!(id, name, price, "Menu item added");

    Ok(MenuItem {
        id,
        name: name.to_string(),
        price,
    })
}

/// Rename and/or re-price an item. Renaming onto a name used by a different
/// item fails with `DuplicateName` without mutating state.
pub fn update_item(db: &DbState, id: i64, name: &str, price: f64) -> Result<(), PosError> {
    validate(name, price)?;
    let name = name.trim();

    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let changed = match conn.execute(
        "UPDATE menu SET name = ?1, price = ?2 WHERE id = ?3",
        params![name, price, id],
    ) {
        Ok(n) => n,
        Err(e) if is_unique_violation(&e) => {
            return Err(PosError::DuplicateName(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };

    if changed == 0 {
        return Err(PosError::menu_item_not_found(id));
    }

    info!(id, name, price, "Menu item updated");
    Ok(())
}

/// Delete a catalog entry.
///
/// Never cascades to order rows: their `item`/`price` snapshots stay valid
/// and displayable on past bills.
pub fn delete_item(db: &DbState, id: i64) -> Result<(), PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let deleted = conn.execute("DELETE FROM menu WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(PosError::menu_item_not_found(id));
    }

    info!(id, "Menu item deleted");
    Ok(())
}

/// Current price for an item name, or 0.0 when the name is unknown.
///
/// The zero fallback is the contract order insertion relies on: entering an
/// order must never hard-fail on catalog drift.
pub fn price_of(db: &DbState, name: &str) -> Result<f64, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;
    Ok(price_of_conn(&conn, name))
}

/// Connection-level `price_of` for callers already holding the lock.
pub(crate) fn price_of_conn(conn: &Connection, name: &str) -> f64 {
    match conn.query_row(
        "SELECT price FROM menu WHERE name = ?1",
        params![name],
        |row| row.get(0),
    ) {
        Ok(price) => price,
        Err(rusqlite::Error::QueryReturnedNoRows) => {
            debug!(name, "Unknown menu item, pricing at 0");
            0.0
        }
        Err(e) => {
            warn!(name, "price_of query failed, pricing at 0: {e}");
            0.0
        }
    }
}

/// Seed the catalog from `DEFAULT_MENU` on first run.
///
/// Guarded by the `catalog/seeded` settings flag, so an admin who deletes
/// every item afterwards is left with a genuinely empty catalog.
pub(crate) fn seed_default_menu(conn: &Connection) -> Result<(), PosError> {
    if db::get_setting(conn, "catalog", "seeded").is_some() {
        return Ok(());
    }

    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM menu", [], |row| row.get(0))?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<(), PosError> {
        if existing == 0 {
            for (name, price) in DEFAULT_MENU {
                conn.execute(
                    "INSERT INTO menu (name, price) VALUES (?1, ?2)",
                    params![name, price],
                )?;
            }
        }
        db::set_setting(conn, "catalog", "seeded", "1")?;
        Ok(())
    })();

    match result {
        Ok(()) => conn.execute_batch("COMMIT")?,
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    if existing == 0 {
        info!("Seeded default menu ({} items)", DEFAULT_MENU.len());
    }
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
