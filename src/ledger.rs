//! Order ledger for tableside.
//!
//! One row per "add to order" action: table, section, item name and price
//! snapshotted from the catalog at insert time, quantity, kitchen status and
//! the take-away (parcel) flag. Supports composable filtered queries,
//! quantity adjustment with delete-on-zero, forward-only status transitions
//! and section/table bulk deletion.
//!
//! **Rules:**
//! - `qty >= 1` while a row exists; a delta that drops it to 0 or below
//!   deletes the row instead
//! - status only moves Preparing -> Ready -> Served; same-state writes are
//!   idempotent no-ops so racing pollers never surface errors
//! - the parcel flag is frozen once a row is Served
//! - `price` is immutable after insert (snapshot semantics)

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, params_from_iter, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::catalog;
use crate::db::DbState;
use crate::error::PosError;
use crate::NUM_TABLES;

// ---------------------------------------------------------------------------
// Status state machine
// ---------------------------------------------------------------------------

/// Kitchen lifecycle of an order line.
///
/// Preparing is the only creation state; Served is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Preparing,
    Ready,
    Served,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::Served => "served",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "preparing" => Some(OrderStatus::Preparing),
            "ready" => Some(OrderStatus::Ready),
            "served" => Some(OrderStatus::Served),
            _ => None,
        }
    }

    /// Transition table: kitchen confirms Preparing -> Ready, waiter confirms
    /// Ready -> Served. Nothing moves backward or skips a step.
    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Preparing, OrderStatus::Ready)
                | (OrderStatus::Ready, OrderStatus::Served)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for OrderStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for OrderStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        OrderStatus::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown order status: {s}").into()))
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A single ledger line (one "add to order" action, not one dish instance).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub table_id: i64,
    pub section_id: i64,
    pub item: String,
    pub qty: i64,
    pub status: OrderStatus,
    pub created_at: String,
    pub price: f64,
    pub is_parcel: bool,
}

/// Outcome of a quantity adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QtyOutcome {
    /// Row updated in place to the given quantity.
    Updated(i64),
    /// Cumulative quantity dropped to 0 or below; the row was deleted.
    Deleted,
}

/// Composable query filter. Every field is optional and the provided ones
/// combine with logical AND.
///
/// `Some(&[])` for `statuses`/`items` is an explicit empty filter and
/// matches nothing, distinct from `None` which leaves the dimension
/// unfiltered.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderFilter<'a> {
    pub table_id: Option<i64>,
    pub section_id: Option<i64>,
    pub statuses: Option<&'a [OrderStatus]>,
    pub items: Option<&'a [&'a str]>,
}

const ORDER_COLUMNS: &str = "id, table_id, section_id, item, qty, status, created_at, price, is_parcel";

fn order_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get(0)?,
        table_id: row.get(1)?,
        section_id: row.get(2)?,
        item: row.get(3)?,
        qty: row.get(4)?,
        status: row.get(5)?,
        created_at: row.get(6)?,
        price: row.get(7)?,
        is_parcel: row.get::<_, i64>(8)? != 0,
    })
}

fn check_table_id(table_id: i64) -> Result<(), PosError> {
    if !(1..=NUM_TABLES).contains(&table_id) {
        return Err(PosError::InvalidTable {
            table_id,
            max: NUM_TABLES,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Insertion
// ---------------------------------------------------------------------------

/// Record a new order line and return its id.
///
/// The current catalog price is snapshotted onto the row; an unknown item
/// name prices at 0.0 rather than failing, so order entry is never blocked
/// by catalog drift. Status starts at Preparing.
pub fn add_order(
    db: &DbState,
    table_id: i64,
    section_id: i64,
    item: &str,
    qty: i64,
    is_parcel: bool,
) -> Result<i64, PosError> {
    check_table_id(table_id)?;
    if section_id < 1 {
        return Err(PosError::InvalidSection(section_id));
    }
    if qty < 1 {
        return Err(PosError::InvalidQuantity(qty));
    }

    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let price = catalog::price_of_conn(&conn, item);
    let created_at = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT INTO orders (table_id, section_id, item, qty, status, created_at, price, is_parcel)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            table_id,
            section_id,
            item,
            qty,
            OrderStatus::Preparing,
            created_at,
            price,
            is_parcel as i64,
        ],
    )?;

    let id = conn.last_insert_rowid();
    info!(id, table_id, section_id, item, qty, price, "Order added");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Fetch order lines matching the filter, newest first.
pub fn get_orders(db: &DbState, filter: &OrderFilter<'_>) -> Result<Vec<Order>, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let mut sql = format!("SELECT {ORDER_COLUMNS} FROM orders");
    let mut clauses: Vec<String> = Vec::new();
    let mut bind: Vec<Value> = Vec::new();

    if let Some(table_id) = filter.table_id {
        clauses.push("table_id = ?".to_string());
        bind.push(Value::Integer(table_id));
    }
    if let Some(section_id) = filter.section_id {
        clauses.push("section_id = ?".to_string());
        bind.push(Value::Integer(section_id));
    }
    if let Some(statuses) = filter.statuses {
        if statuses.is_empty() {
            // Explicit empty filter matches nothing
            clauses.push("1 = 0".to_string());
        } else {
            let marks = vec!["?"; statuses.len()].join(", ");
            clauses.push(format!("status IN ({marks})"));
            for status in statuses {
                bind.push(Value::Text(status.as_str().to_string()));
            }
        }
    }
    if let Some(items) = filter.items {
        if items.is_empty() {
            clauses.push("1 = 0".to_string());
        } else {
            let marks = vec!["?"; items.len()].join(", ");
            clauses.push(format!("item IN ({marks})"));
            for item in items {
                bind.push(Value::Text((*item).to_string()));
            }
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at DESC, id DESC");

    let mut stmt = conn.prepare(&sql)?;
    let orders = stmt
        .query_map(params_from_iter(bind), order_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(orders)
}

/// Next unused section id for a table: `max(existing) + 1`, or 1 when the
/// table has no sections.
pub fn next_section_id(db: &DbState, table_id: i64) -> Result<i64, PosError> {
    check_table_id(table_id)?;
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let next: i64 = conn.query_row(
        "SELECT COALESCE(MAX(section_id), 0) + 1 FROM orders WHERE table_id = ?1",
        params![table_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// Apply `delta` to a row's quantity inside one transaction.
///
/// A resulting quantity of 0 or below deletes the row instead of storing a
/// non-positive value; concurrent double-decrements past zero are absorbed
/// by the deletion (the second caller sees `NotFound`, a benign race).
pub fn adjust_qty(db: &DbState, order_id: i64, delta: i64) -> Result<QtyOutcome, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<QtyOutcome, PosError> {
        let qty: i64 = match conn.query_row(
            "SELECT qty FROM orders WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        ) {
            Ok(q) => q,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(PosError::order_not_found(order_id));
            }
            Err(e) => return Err(e.into()),
        };

        let new_qty = qty + delta;
        if new_qty <= 0 {
            conn.execute("DELETE FROM orders WHERE id = ?1", params![order_id])?;
            Ok(QtyOutcome::Deleted)
        } else {
            conn.execute(
                "UPDATE orders SET qty = ?1 WHERE id = ?2",
                params![new_qty, order_id],
            )?;
            Ok(QtyOutcome::Updated(new_qty))
        }
    })();

    match result {
        Ok(outcome) => {
            conn.execute_batch("COMMIT")?;
            debug!(order_id, delta, ?outcome, "Quantity adjusted");
            Ok(outcome)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Advance a row's status.
///
/// Only the forward path passes the transition table; writing the current
/// status again is an idempotent no-op so two sessions advancing the same
/// row don't surface spurious errors.
pub fn set_status(db: &DbState, order_id: i64, new_status: OrderStatus) -> Result<(), PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<bool, PosError> {
        let current: OrderStatus = match conn.query_row(
            "SELECT status FROM orders WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        ) {
            Ok(s) => s,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(PosError::order_not_found(order_id));
            }
            Err(e) => return Err(e.into()),
        };

        if current == new_status {
            return Ok(false);
        }
        if !current.can_advance_to(new_status) {
            return Err(PosError::InvalidTransition {
                from: current,
                to: new_status,
            });
        }

        conn.execute(
            "UPDATE orders SET status = ?1 WHERE id = ?2",
            params![new_status, order_id],
        )?;
        Ok(true)
    })();

    match result {
        Ok(changed) => {
            conn.execute_batch("COMMIT")?;
            if changed {
                info!(order_id, status = %new_status, "Order status advanced");
            }
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Flip the take-away flag and return its new value.
///
/// Rejected with `ParcelFrozen` once the row is Served.
pub fn toggle_parcel(db: &DbState, order_id: i64) -> Result<bool, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<bool, PosError> {
        let (status, is_parcel): (OrderStatus, i64) = match conn.query_row(
            "SELECT status, is_parcel FROM orders WHERE id = ?1",
            params![order_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(pair) => pair,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(PosError::order_not_found(order_id));
            }
            Err(e) => return Err(e.into()),
        };

        if status == OrderStatus::Served {
            return Err(PosError::ParcelFrozen(order_id));
        }

        let new_flag = is_parcel == 0;
        conn.execute(
            "UPDATE orders SET is_parcel = ?1 WHERE id = ?2",
            params![new_flag as i64, order_id],
        )?;
        Ok(new_flag)
    })();

    match result {
        Ok(flag) => {
            conn.execute_batch("COMMIT")?;
            debug!(order_id, is_parcel = flag, "Parcel flag toggled");
            Ok(flag)
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

/// Delete a single order line.
pub fn delete_order(db: &DbState, order_id: i64) -> Result<(), PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let deleted = conn.execute("DELETE FROM orders WHERE id = ?1", params![order_id])?;
    if deleted == 0 {
        return Err(PosError::order_not_found(order_id));
    }

    info!(order_id, "Order deleted");
    Ok(())
}

/// Delete every line in a section. A missing section deletes 0 rows and is
/// not an error.
pub fn delete_section(db: &DbState, table_id: i64, section_id: i64) -> Result<usize, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let deleted = conn.execute(
        "DELETE FROM orders WHERE table_id = ?1 AND section_id = ?2",
        params![table_id, section_id],
    )?;

    if deleted > 0 {
        info!(table_id, section_id, deleted, "Section deleted");
    }
    Ok(deleted)
}

/// Clear a table: delete all its order lines across every section, and drop
/// its chair-group assignments so a reseated table starts from group 1.
pub fn clear_table(db: &DbState, table_id: i64) -> Result<usize, PosError> {
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    conn.execute_batch("BEGIN IMMEDIATE")?;

    let result = (|| -> Result<usize, PosError> {
        let deleted = conn.execute("DELETE FROM orders WHERE table_id = ?1", params![table_id])?;
        conn.execute(
            "DELETE FROM chair_groups WHERE table_id = ?1",
            params![table_id],
        )?;
        Ok(deleted)
    })();

    match result {
        Ok(deleted) => {
            conn.execute_batch("COMMIT")?;
            info!(table_id, deleted, "Table cleared");
            Ok(deleted)
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
