//! Split-bill grouping and totals for tableside.
//!
//! The canonical model groups a table's lines by section and prices each
//! section from the rows' snapshot prices. The legacy chair/group view
//! (each chair assigned to a split group 1..=4, quantities only) is kept as
//! a variant strategy over the same ledger; sections double as chairs there.

use rusqlite::params;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::db::DbState;
use crate::error::PosError;
use crate::ledger::{self, Order, OrderFilter};
use crate::{CHAIRS_PER_TABLE, MAX_SPLIT_GROUPS, NUM_TABLES};

/// One section's share of a table bill.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionBill {
    /// Lines newest first, with snapshot prices.
    pub lines: Vec<Order>,
    /// Σ(qty × snapshot price) over the section's rows.
    pub subtotal: f64,
}

/// One split group's share in the legacy chair/group view (quantities only).
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupBill {
    /// Chairs assigned to this group.
    pub chairs: Vec<i64>,
    /// Item name -> summed quantity across the group's chairs.
    pub items: BTreeMap<String, i64>,
    pub total_items: i64,
}

/// How a table's bill is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Grouping {
    BySection,
    ByChairGroup,
}

/// A table's bill under one grouping strategy.
#[derive(Debug, Serialize)]
#[serde(tag = "grouping", rename_all = "camelCase")]
pub enum TableBill {
    #[serde(rename_all = "camelCase")]
    BySection {
        sections: BTreeMap<i64, SectionBill>,
        grand_total: f64,
    },
    #[serde(rename_all = "camelCase")]
    ByChairGroup { groups: BTreeMap<i64, GroupBill> },
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
// Section totals (canonical)
// ---------------------------------------------------------------------------

/// Per-section bills for a table, keyed by section id.
///
/// Subtotals use each row's stored snapshot price, never the live catalog.
pub fn totals_by_section(
    db: &DbState,
    table_id: i64,
) -> Result<BTreeMap<i64, SectionBill>, PosError> {
    check_table_id(table_id)?;

    let orders = ledger::get_orders(
        db,
        &OrderFilter {
            table_id: Some(table_id),
            ..Default::default()
        },
    )?;

    let mut sections: BTreeMap<i64, SectionBill> = BTreeMap::new();
    for order in orders {
        let bill = sections.entry(order.section_id).or_default();
        bill.subtotal += order.qty as f64 * order.price;
        bill.lines.push(order);
    }

    Ok(sections)
}

/// Grand total across all of a table's sections.
pub fn grand_total(db: &DbState, table_id: i64) -> Result<f64, PosError> {
    check_table_id(table_id)?;
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    let total: f64 = conn.query_row(
        "SELECT COALESCE(SUM(qty * price), 0) FROM orders WHERE table_id = ?1",
        params![table_id],
        |row| row.get(0),
    )?;
    Ok(total)
}

// ---------------------------------------------------------------------------
// Legacy chair/group splitting
// ---------------------------------------------------------------------------

/// Assign a chair to a split group.
pub fn set_chair_group(
    db: &DbState,
    table_id: i64,
    chair_id: i64,
    group_id: i64,
) -> Result<(), PosError> {
    check_table_id(table_id)?;
    if !(1..=CHAIRS_PER_TABLE).contains(&chair_id) {
        return Err(PosError::InvalidChair {
            chair_id,
            max: CHAIRS_PER_TABLE,
        });
    }
    if !(1..=MAX_SPLIT_GROUPS).contains(&group_id) {
        return Err(PosError::InvalidGroup {
            group_id,
            max: MAX_SPLIT_GROUPS,
        });
    }

    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;
    conn.execute(
        "INSERT INTO chair_groups (table_id, chair_id, group_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(table_id, chair_id) DO UPDATE SET group_id = excluded.group_id",
        params![table_id, chair_id, group_id],
    )?;

    debug!(table_id, chair_id, group_id, "Chair group set");
    Ok(())
}

/// The split group a chair belongs to; 1 if never explicitly assigned.
pub fn chair_group_of(db: &DbState, table_id: i64, chair_id: i64) -> Result<i64, PosError> {
    check_table_id(table_id)?;
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;
    Ok(chair_group_of_conn(&conn, table_id, chair_id))
}

fn chair_group_of_conn(conn: &rusqlite::Connection, table_id: i64, chair_id: i64) -> i64 {
    conn.query_row(
        "SELECT group_id FROM chair_groups WHERE table_id = ?1 AND chair_id = ?2",
        params![table_id, chair_id],
        |row| row.get(0),
    )
    .unwrap_or(1)
}

/// Per-group bills for a table in the legacy chair view, keyed by group id.
///
/// Each chair's orders aggregate by summing qty per distinct item name; a
/// chair with no explicit assignment belongs to group 1. Sections double as
/// chairs, so only section ids 1..=CHAIRS_PER_TABLE participate.
pub fn totals_by_group(db: &DbState, table_id: i64) -> Result<BTreeMap<i64, GroupBill>, PosError> {
    check_table_id(table_id)?;
    let conn = db.conn.lock().map_err(|_| PosError::LockPoisoned)?;

    // Explicit assignments for this table
    let mut assignments: HashMap<i64, i64> = HashMap::new();
    {
        let mut stmt =
            conn.prepare("SELECT chair_id, group_id FROM chair_groups WHERE table_id = ?1")?;
        let rows = stmt.query_map(params![table_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (chair_id, group_id) = row?;
            assignments.insert(chair_id, group_id);
        }
    }

    // Summed quantities per chair and item
    let mut per_chair: HashMap<i64, Vec<(String, i64)>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT section_id, item, SUM(qty) FROM orders
             WHERE table_id = ?1 AND section_id BETWEEN 1 AND ?2
             GROUP BY section_id, item
             ORDER BY section_id, item",
        )?;
        let rows = stmt.query_map(params![table_id, CHAIRS_PER_TABLE], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        for row in rows {
            let (chair_id, item, qty) = row?;
            per_chair.entry(chair_id).or_default().push((item, qty));
        }
    }

    let mut groups: BTreeMap<i64, GroupBill> = BTreeMap::new();
    for chair_id in 1..=CHAIRS_PER_TABLE {
        let group_id = assignments.get(&chair_id).copied().unwrap_or(1);
        let bill = groups.entry(group_id).or_default();
        bill.chairs.push(chair_id);
        if let Some(items) = per_chair.get(&chair_id) {
            for (item, qty) in items {
                *bill.items.entry(item.clone()).or_insert(0) += qty;
                bill.total_items += qty;
            }
        }
    }

    Ok(groups)
}

// ---------------------------------------------------------------------------
// Strategy surface
// ---------------------------------------------------------------------------

/// A table's bill under the requested grouping strategy.
pub fn table_bill(db: &DbState, table_id: i64, grouping: Grouping) -> Result<TableBill, PosError> {
    match grouping {
        Grouping::BySection => {
            let sections = totals_by_section(db, table_id)?;
            let grand_total = sections.values().map(|s| s.subtotal).sum();
            Ok(TableBill::BySection {
                sections,
                grand_total,
            })
        }
        Grouping::ByChairGroup => Ok(TableBill::ByChairGroup {
            groups: totals_by_group(db, table_id)?,
        }),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::db;
    use crate::ledger::{add_order, set_status, toggle_parcel, OrderStatus};
    use rusqlite::Connection;

    fn test_db() -> DbState {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )
        .expect("pragma setup");
        db::run_migrations_for_test(&conn);
        DbState {
            conn: std::sync::Mutex::new(conn),
            db_path: std::path::PathBuf::from(":memory:"),
        }
    }

    fn seed_menu(db: &DbState) {
        catalog::add_item(db, "Dosa", 40.0).expect("seed Dosa");
        catalog::add_item(db, "Chaya", 10.0).expect("seed Chaya");
        catalog::add_item(db, "Porotta", 12.0).expect("seed Porotta");
    }

    #[test]
    fn test_section_subtotal_scenario() {
        // Table 3, section 1: 2x Dosa (40) + 1x Chaya (10) = 90
        let db = test_db();
        seed_menu(&db);
        let dosa_id = add_order(&db, 3, 1, "Dosa", 2, false).unwrap();
        let chaya_id = add_order(&db, 3, 1, "Chaya", 1, false).unwrap();

        let sections = totals_by_section(&db, 3).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[&1].subtotal, 90.0);
        assert_eq!(sections[&1].lines.len(), 2);

        // Parcel toggle leaves price/qty untouched
        toggle_parcel(&db, dosa_id).unwrap();
        let sections = totals_by_section(&db, 3).unwrap();
        assert_eq!(sections[&1].subtotal, 90.0);
        let dosa = sections[&1].lines.iter().find(|o| o.id == dosa_id).unwrap();
        assert!(dosa.is_parcel);
        assert_eq!(dosa.qty, 2);
        assert_eq!(dosa.price, 40.0);

        // A served line still participates in totals
        set_status(&db, chaya_id, OrderStatus::Ready).unwrap();
        set_status(&db, chaya_id, OrderStatus::Served).unwrap();
        assert_eq!(totals_by_section(&db, 3).unwrap()[&1].subtotal, 90.0);
    }

    #[test]
    fn test_subtotals_use_snapshot_prices() {
        let db = test_db();
        seed_menu(&db);
        add_order(&db, 2, 1, "Dosa", 1, false).unwrap();

        // Re-price Dosa after the order was taken
        let dosa = catalog::list_items(&db)
            .unwrap()
            .into_iter()
            .find(|i| i.name == "Dosa")
            .unwrap();
        catalog::update_item(&db, dosa.id, "Dosa", 100.0).unwrap();

        assert_eq!(totals_by_section(&db, 2).unwrap()[&1].subtotal, 40.0);
        assert_eq!(grand_total(&db, 2).unwrap(), 40.0);
    }

    #[test]
    fn test_grand_total_sums_sections() {
        let db = test_db();
        seed_menu(&db);
        add_order(&db, 5, 1, "Dosa", 2, false).unwrap(); // 80
        add_order(&db, 5, 2, "Chaya", 3, false).unwrap(); // 30
        add_order(&db, 5, 2, "Porotta", 2, false).unwrap(); // 24
        add_order(&db, 6, 1, "Dosa", 1, false).unwrap(); // other table

        let sections = totals_by_section(&db, 5).unwrap();
        assert_eq!(sections[&1].subtotal, 80.0);
        assert_eq!(sections[&2].subtotal, 54.0);

        let summed: f64 = sections.values().map(|s| s.subtotal).sum();
        assert_eq!(grand_total(&db, 5).unwrap(), summed);
        assert_eq!(summed, 134.0);
    }

    #[test]
    fn test_empty_table_has_no_sections() {
        let db = test_db();
        assert!(totals_by_section(&db, 7).unwrap().is_empty());
        assert_eq!(grand_total(&db, 7).unwrap(), 0.0);
    }

    #[test]
    fn test_chair_group_defaults_to_one() {
        let db = test_db();
        assert_eq!(chair_group_of(&db, 1, 1).unwrap(), 1);

        set_chair_group(&db, 1, 3, 2).unwrap();
        assert_eq!(chair_group_of(&db, 1, 3).unwrap(), 2);
        // Reassignment replaces
        set_chair_group(&db, 1, 3, 4).unwrap();
        assert_eq!(chair_group_of(&db, 1, 3).unwrap(), 4);
    }

    #[test]
    fn test_set_chair_group_validation() {
        let db = test_db();
        assert!(matches!(
            set_chair_group(&db, 1, 5, 1).unwrap_err(),
            PosError::InvalidChair { .. }
        ));
        assert!(matches!(
            set_chair_group(&db, 1, 1, 0).unwrap_err(),
            PosError::InvalidGroup { .. }
        ));
        assert!(matches!(
            set_chair_group(&db, 9, 1, 1).unwrap_err(),
            PosError::InvalidTable { .. }
        ));
    }

    #[test]
    fn test_totals_by_group_sums_quantities() {
        let db = test_db();
        seed_menu(&db);
        // Chairs 1 and 2 share group 1 (defaults), chair 3 split to group 2
        add_order(&db, 4, 1, "Dosa", 2, false).unwrap();
        add_order(&db, 4, 1, "Chaya", 1, false).unwrap();
        add_order(&db, 4, 2, "Dosa", 1, false).unwrap();
        add_order(&db, 4, 3, "Porotta", 3, false).unwrap();
        set_chair_group(&db, 4, 3, 2).unwrap();

        let groups = totals_by_group(&db, 4).unwrap();
        assert_eq!(groups.len(), 2);

        let g1 = &groups[&1];
        assert_eq!(g1.chairs, vec![1, 2, 4]);
        assert_eq!(g1.items["Dosa"], 3);
        assert_eq!(g1.items["Chaya"], 1);
        assert_eq!(g1.total_items, 4);

        let g2 = &groups[&2];
        assert_eq!(g2.chairs, vec![3]);
        assert_eq!(g2.items["Porotta"], 3);
        assert_eq!(g2.total_items, 3);
    }

    #[test]
    fn test_totals_by_group_all_chairs_default_together() {
        let db = test_db();
        let groups = totals_by_group(&db, 1).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[&1].chairs, vec![1, 2, 3, 4]);
        assert_eq!(groups[&1].total_items, 0);
    }

    #[test]
    fn test_table_bill_strategies() {
        let db = test_db();
        seed_menu(&db);
        add_order(&db, 3, 1, "Dosa", 2, false).unwrap();
        add_order(&db, 3, 2, "Chaya", 1, false).unwrap();

        match table_bill(&db, 3, Grouping::BySection).unwrap() {
            TableBill::BySection {
                sections,
                grand_total,
            } => {
                assert_eq!(sections.len(), 2);
                assert_eq!(grand_total, 90.0);
            }
            other => panic!("expected section bill, got {other:?}"),
        }

        match table_bill(&db, 3, Grouping::ByChairGroup).unwrap() {
            TableBill::ByChairGroup { groups } => {
                assert_eq!(groups[&1].total_items, 3);
            }
            other => panic!("expected chair-group bill, got {other:?}"),
        }
    }

    #[test]
    fn test_table_bill_serializes_tagged() {
        let db = test_db();
        seed_menu(&db);
        add_order(&db, 3, 1, "Chaya", 1, false).unwrap();

        let bill = table_bill(&db, 3, Grouping::BySection).unwrap();
        let json = serde_json::to_value(&bill).unwrap();
        assert_eq!(json["grouping"], "bySection");
        assert_eq!(json["grandTotal"], 10.0);
        assert_eq!(json["sections"]["1"]["subtotal"], 10.0);
    }
}
